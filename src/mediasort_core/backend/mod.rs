//! Storage backends the sort engine runs against.
//!
//! A backend owns every piece of I/O the engine performs: enumerating the
//! source, probing and claiming destination names, streaming content and
//! writing the run log. The engine itself only talks to [`StorageBackend`].

pub mod blob;
pub mod local;
pub mod object;

use std::io::{Read, Seek};

use crate::mediasort_core::error::Result;
use crate::mediasort_core::media::MediaItem;
use crate::mediasort_core::runlog::LogSink;

pub use blob::{BlobBackend, BlobProperties, BlobStore, MemoryBlobStore};
pub use local::LocalBackend;
pub use object::ObjectBlobStore;

/// A readable, seekable byte source.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Capability set shared by the local-filesystem and blob-store backends.
///
/// A *location* is a root directory (local) or a container name (blob). A *key*
/// is a `/`-separated path relative to a location.
pub trait StorageBackend: Send + Sync {
    /// List every item under `location`, optionally narrowed to `prefix`.
    /// Fails when the location does not exist or cannot be enumerated.
    fn enumerate(&self, location: &str, prefix: Option<&str>) -> Result<Vec<MediaItem>>;

    /// Create the destination location if it is absent.
    fn ensure_location(&self, location: &str) -> Result<()>;

    /// Make `prefix` usable as a parent for new keys (directories on disk, no-op for blobs).
    fn prepare_prefix(&self, location: &str, prefix: &str) -> Result<()>;

    fn exists(&self, location: &str, key: &str) -> Result<bool>;

    fn open_read(&self, item: &MediaItem) -> Result<Box<dyn ReadSeek + Send>>;

    /// Stream an item's content to `location/key`.
    ///
    /// Must fail with `DestinationExists` rather than overwrite an existing key.
    fn copy_stream(
        &self,
        item: &MediaItem,
        location: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<()>;

    fn delete(&self, item: &MediaItem) -> Result<()>;

    /// Fully qualified form of `location/key`, comparable with [`Self::item_location`].
    fn locate(&self, location: &str, key: &str) -> String;

    /// Fully qualified form of an enumerated item.
    fn item_location(&self, item: &MediaItem) -> String;

    /// Open a sink for the run log at `log_location` under a temporary name.
    fn open_log_sink(&self, log_location: &str, temp_name: &str) -> Result<Box<dyn LogSink>>;
}

/// Join a key prefix and a name with `/`, tolerating empty prefixes and stray separators.
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}
