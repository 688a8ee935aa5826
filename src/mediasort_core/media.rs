use std::path::Path;
use time::OffsetDateTime;

/// One unit of work produced by a backend's enumeration step.
#[derive(Debug, Clone)]
pub struct MediaItem {
    /// Root directory or container the item was enumerated from.
    pub source_location: String,
    /// Absolute path for local items, blob name for blob items.
    pub source_key: String,
    pub size_hint: u64,
    pub declared_content_type: Option<String>,
    /// Timestamp the backend knows independently of embedded metadata.
    pub last_modified_fallback: OffsetDateTime,
}

impl MediaItem {
    /// The final path segment of the source key.
    pub fn file_name(&self) -> &str {
        file_name_of(&self.source_key)
    }

    pub fn media_type(&self) -> Option<MediaType> {
        detect_media_type(self.file_name())
    }

    /// Content type to stamp on the destination copy.
    pub fn content_type(&self) -> Option<String> {
        self.declared_content_type.clone().or_else(|| {
            mime_guess::from_path(self.file_name())
                .first_raw()
                .map(str::to_string)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Image file extensions accepted by the sorter (lowercase).
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "heic", "heif", "dng",
];

/// Video file extensions accepted by the sorter (lowercase).
const VIDEO_EXTENSIONS: &[&str] = &["mov", "mp4", "avi"];

/// Detect media type from a file name. Anything not on the allow-list is `None`.
pub fn detect_media_type(name: &str) -> Option<MediaType> {
    let ext = Path::new(name).extension()?.to_str()?.to_lowercase();

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        return Some(MediaType::Image);
    }

    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        return Some(MediaType::Video);
    }

    None
}

/// Whether a key names a file the sorter should pick up.
pub fn is_sortable(name: &str) -> bool {
    detect_media_type(name).is_some()
}

/// Last segment of a path or blob name, tolerating both separators.
pub fn file_name_of(key: &str) -> &str {
    let trimmed = key.trim_end_matches(['/', '\\']);
    match trimmed.rfind(['/', '\\']) {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}
