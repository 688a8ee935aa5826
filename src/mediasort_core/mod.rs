pub mod backend;
pub mod cli;
pub mod config;
pub mod date;
pub mod error;
pub mod media;
pub mod metadata;
pub mod naming;
pub mod planner;
pub mod quicktime;
pub mod runlog;
pub mod sorter;
pub mod workers;

pub use backend::{
    BlobBackend, BlobStore, LocalBackend, MemoryBlobStore, ObjectBlobStore, StorageBackend,
};
pub use cli::{Cli, Commands};
pub use config::{BlobServiceConfig, SortConfig};
pub use date::{DateResolver, DateSource, ResolvedDate, get_current_time, get_local_tz};
pub use error::MediasortError;
pub use media::{MediaItem, MediaType};
pub use metadata::{MetadataReader, StandardMetadataReader};
pub use planner::{EnglishMonthNames, MonthNames};
pub use sorter::{CancellationToken, RunStatus, RunSummary, SortRequest, Sorter, sort};
