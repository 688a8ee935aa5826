use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediasortError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Filesystem errors
    #[error("Directory walker error: {0}")]
    Walkdir(#[from] walkdir::Error),

    #[error("Source location does not exist: {0}")]
    SourceNotFound(String),

    #[error("Destination location '{location}' could not be created: {reason}")]
    DestinationUnavailable { location: String, reason: String },

    #[error("Destination already exists: {0}")]
    DestinationExists(String),

    // Metadata errors
    #[error("EXIF error: {0}")]
    Exif(#[from] exif::Error),

    #[error("Unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("Date parsing error: {0}")]
    InvalidDateFormat(String),

    // Storage errors
    #[error("Blob storage error: {0}")]
    Blob(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("'{key}' timed out after {seconds}s")]
    Timeout { key: String, seconds: u64 },

    #[error("Copied to '{destination}' but the source could not be deleted: {reason}")]
    SourceNotDeleted { destination: String, reason: String },

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Argument error: {0}")]
    Argument(String),

    #[error("{0}")]
    Other(String),
}

impl MediasortError {
    /// Fatal errors abort the whole run; everything else is charged to a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MediasortError::SourceNotFound(_)
                | MediasortError::DestinationUnavailable { .. }
                | MediasortError::Walkdir(_)
        )
    }
}

/// Result type for mediasort operations.
pub type Result<T> = std::result::Result<T, MediasortError>;
