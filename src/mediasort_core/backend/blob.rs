//! Blob-container backend.
//!
//! [`BlobStore`] is the service-level client (containers of flat, `/`-named
//! blobs); [`BlobBackend`] adapts any store to the engine. Content is streamed
//! from the source blob into the destination blob, so a copy never needs a
//! cross-container credential.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex, MutexGuard};

use time::OffsetDateTime;

use crate::mediasort_core::backend::{ReadSeek, StorageBackend, join_key};
use crate::mediasort_core::date::{get_current_time, get_local_tz};
use crate::mediasort_core::error::{MediasortError, Result};
use crate::mediasort_core::media::MediaItem;
use crate::mediasort_core::naming::resolve_unique_name;
use crate::mediasort_core::runlog::LogSink;

/// Properties reported by a blob listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    pub name: String,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<OffsetDateTime>,
}

/// Operations the sort engine needs from a blob service.
pub trait BlobStore: Send + Sync {
    fn container_exists(&self, container: &str) -> Result<bool>;

    fn create_container_if_not_exists(&self, container: &str) -> Result<()>;

    fn list_blobs(&self, container: &str, prefix: Option<&str>) -> Result<Vec<BlobProperties>>;

    fn blob_exists(&self, container: &str, name: &str) -> Result<bool>;

    fn open_blob(&self, container: &str, name: &str) -> Result<Box<dyn ReadSeek + Send>>;

    /// Upload `data`. With `overwrite == false` an existing blob is an error
    /// (`DestinationExists`), making the upload a conditional create.
    fn upload_blob(
        &self,
        container: &str,
        name: &str,
        data: &mut dyn Read,
        content_type: Option<&str>,
        overwrite: bool,
    ) -> Result<()>;

    /// Returns whether a blob was deleted.
    fn delete_blob_if_exists(&self, container: &str, name: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Arc<Vec<u8>>,
    content_type: Option<String>,
    last_modified: OffsetDateTime,
}

/// In-process blob service. Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    containers: Mutex<BTreeMap<String, BTreeMap<String, StoredBlob>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, BTreeMap<String, StoredBlob>>>> {
        self.containers
            .lock()
            .map_err(|_| MediasortError::Blob("blob store lock poisoned".to_string()))
    }

    /// Store a blob with an explicit last-modified time, creating the container if needed.
    pub fn put(
        &self,
        container: &str,
        name: &str,
        data: impl Into<Vec<u8>>,
        content_type: Option<&str>,
        last_modified: OffsetDateTime,
    ) -> Result<()> {
        let mut containers = self.lock()?;
        containers.entry(container.to_string()).or_default().insert(
            name.to_string(),
            StoredBlob {
                data: Arc::new(data.into()),
                content_type: content_type.map(str::to_string),
                last_modified,
            },
        );
        Ok(())
    }

    /// Content of a blob, if present.
    pub fn get(&self, container: &str, name: &str) -> Option<Vec<u8>> {
        let containers = self.lock().ok()?;
        containers
            .get(container)?
            .get(name)
            .map(|blob| blob.data.as_ref().clone())
    }

    pub fn content_type(&self, container: &str, name: &str) -> Option<String> {
        let containers = self.lock().ok()?;
        containers.get(container)?.get(name)?.content_type.clone()
    }

    /// All blob names in a container, sorted.
    pub fn blob_names(&self, container: &str) -> Vec<String> {
        self.lock()
            .ok()
            .and_then(|containers| containers.get(container).map(|c| c.keys().cloned().collect()))
            .unwrap_or_default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn container_exists(&self, container: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(container))
    }

    fn create_container_if_not_exists(&self, container: &str) -> Result<()> {
        self.lock()?.entry(container.to_string()).or_default();
        Ok(())
    }

    fn list_blobs(&self, container: &str, prefix: Option<&str>) -> Result<Vec<BlobProperties>> {
        let containers = self.lock()?;
        let blobs = containers
            .get(container)
            .ok_or_else(|| MediasortError::Blob(format!("container '{}' not found", container)))?;
        Ok(blobs
            .iter()
            .filter(|(name, _)| prefix.is_none_or(|p| name.starts_with(p)))
            .map(|(name, blob)| BlobProperties {
                name: name.clone(),
                content_length: blob.data.len() as u64,
                content_type: blob.content_type.clone(),
                last_modified: Some(blob.last_modified),
            })
            .collect())
    }

    fn blob_exists(&self, container: &str, name: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .get(container)
            .is_some_and(|blobs| blobs.contains_key(name)))
    }

    fn open_blob(&self, container: &str, name: &str) -> Result<Box<dyn ReadSeek + Send>> {
        let containers = self.lock()?;
        let blob = containers
            .get(container)
            .and_then(|blobs| blobs.get(name))
            .ok_or_else(|| MediasortError::Blob(format!("blob '{}/{}' not found", container, name)))?;
        Ok(Box::new(Cursor::new(blob.data.as_ref().clone())))
    }

    fn upload_blob(
        &self,
        container: &str,
        name: &str,
        data: &mut dyn Read,
        content_type: Option<&str>,
        overwrite: bool,
    ) -> Result<()> {
        // Read before taking the lock; `data` may be slow.
        let mut buffer = Vec::new();
        data.read_to_end(&mut buffer)?;

        let mut containers = self.lock()?;
        let blobs = containers
            .get_mut(container)
            .ok_or_else(|| MediasortError::Blob(format!("container '{}' not found", container)))?;
        if !overwrite && blobs.contains_key(name) {
            return Err(MediasortError::DestinationExists(format!("{}/{}", container, name)));
        }
        blobs.insert(
            name.to_string(),
            StoredBlob {
                data: Arc::new(buffer),
                content_type: content_type.map(str::to_string),
                last_modified: OffsetDateTime::now_utc(),
            },
        );
        Ok(())
    }

    fn delete_blob_if_exists(&self, container: &str, name: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .get_mut(container)
            .is_some_and(|blobs| blobs.remove(name).is_some()))
    }
}

/// Sorts blobs between containers of one blob service. Locations are container names.
pub struct BlobBackend<S: BlobStore> {
    store: Arc<S>,
}

impl<S: BlobStore> BlobBackend<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S: BlobStore> std::fmt::Debug for BlobBackend<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobBackend").finish_non_exhaustive()
    }
}

/// Virtual directory markers are zero-length blobs whose name ends in `/`.
fn is_directory_marker(blob: &BlobProperties) -> bool {
    blob.content_length == 0 && blob.name.ends_with('/')
}

/// Split `container[/prefix]`.
fn split_log_location(log_location: &str) -> (&str, &str) {
    let trimmed = log_location.trim_matches('/');
    match trimmed.split_once('/') {
        Some((container, prefix)) => (container, prefix),
        None => (trimmed, ""),
    }
}

impl<S: BlobStore + 'static> StorageBackend for BlobBackend<S> {
    fn enumerate(&self, location: &str, prefix: Option<&str>) -> Result<Vec<MediaItem>> {
        if !self.store.container_exists(location)? {
            return Err(MediasortError::SourceNotFound(location.to_string()));
        }

        let items: Vec<MediaItem> = self
            .store
            .list_blobs(location, prefix.filter(|p| !p.is_empty()))?
            .into_iter()
            .filter(|blob| !is_directory_marker(blob))
            .map(|blob| MediaItem {
                source_location: location.to_string(),
                last_modified_fallback: blob
                    .last_modified
                    .map(|t| t.to_offset(get_local_tz()))
                    .unwrap_or_else(get_current_time),
                source_key: blob.name,
                size_hint: blob.content_length,
                declared_content_type: blob.content_type,
            })
            .collect();

        log::debug!("Enumerated {} blobs in {}", items.len(), location);
        Ok(items)
    }

    fn ensure_location(&self, location: &str) -> Result<()> {
        self.store
            .create_container_if_not_exists(location)
            .map_err(|e| MediasortError::DestinationUnavailable {
                location: location.to_string(),
                reason: e.to_string(),
            })
    }

    fn prepare_prefix(&self, _location: &str, _prefix: &str) -> Result<()> {
        Ok(())
    }

    fn exists(&self, location: &str, key: &str) -> Result<bool> {
        self.store.blob_exists(location, key)
    }

    fn open_read(&self, item: &MediaItem) -> Result<Box<dyn ReadSeek + Send>> {
        self.store.open_blob(&item.source_location, &item.source_key)
    }

    fn copy_stream(
        &self,
        item: &MediaItem,
        location: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<()> {
        let mut source = self.store.open_blob(&item.source_location, &item.source_key)?;
        self.store
            .upload_blob(location, key, &mut source, content_type, false)
    }

    fn delete(&self, item: &MediaItem) -> Result<()> {
        if !self
            .store
            .delete_blob_if_exists(&item.source_location, &item.source_key)?
        {
            log::debug!("{} was already gone when deleting", item.source_key);
        }
        Ok(())
    }

    fn locate(&self, location: &str, key: &str) -> String {
        format!("{}/{}", location, key)
    }

    fn item_location(&self, item: &MediaItem) -> String {
        format!("{}/{}", item.source_location, item.source_key)
    }

    fn open_log_sink(&self, log_location: &str, temp_name: &str) -> Result<Box<dyn LogSink>> {
        let (container, prefix) = split_log_location(log_location);
        if container.is_empty() {
            return Err(MediasortError::Argument(format!(
                "log location '{}' names no container",
                log_location
            )));
        }
        self.store.create_container_if_not_exists(container)?;
        Ok(Box::new(BlobLogSink {
            store: Arc::clone(&self.store),
            container: container.to_string(),
            prefix: prefix.to_string(),
            temp_name: temp_name.to_string(),
            buffer: String::new(),
        }))
    }
}

/// Buffers the run log and uploads it once at the end.
pub struct BlobLogSink<S: BlobStore> {
    store: Arc<S>,
    container: String,
    prefix: String,
    temp_name: String,
    buffer: String,
}

impl<S: BlobStore> BlobLogSink<S> {
    fn upload(&self, key: &str, overwrite: bool) -> Result<()> {
        let mut data = self.buffer.as_bytes();
        self.store.upload_blob(
            &self.container,
            key,
            &mut data,
            Some("text/plain; charset=utf-8"),
            overwrite,
        )
    }
}

impl<S: BlobStore> LogSink for BlobLogSink<S> {
    fn temp_location(&self) -> String {
        format!("{}/{}", self.container, join_key(&self.prefix, &self.temp_name))
    }

    fn append(&mut self, line: &str) -> Result<()> {
        self.buffer.push_str(line);
        self.buffer.push('\n');
        Ok(())
    }

    fn finalize(&mut self, final_name: &str) -> Result<String> {
        let name = resolve_unique_name(final_name, |candidate| {
            self.store
                .blob_exists(&self.container, &join_key(&self.prefix, candidate))
        })?;
        let key = join_key(&self.prefix, &name);
        self.upload(&key, false)?;
        Ok(format!("{}/{}", self.container, key))
    }

    fn abandon(&mut self) -> Option<String> {
        let key = join_key(&self.prefix, &self.temp_name);
        match self.upload(&key, true) {
            Ok(()) => Some(format!("{}/{}", self.container, key)),
            Err(e) => {
                log::warn!("Could not store run log in {}: {}", self.container, e);
                None
            }
        }
    }
}
