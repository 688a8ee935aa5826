use std::sync::Arc;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::mediasort_core::backend::StorageBackend;
use crate::mediasort_core::error::Result;
use crate::mediasort_core::media::MediaItem;
use crate::mediasort_core::metadata::{ExifTag, MetadataReader, MetadataSet};

/// Timestamp format of the run log header and footer.
pub const LOG_DATE_FORMAT: &[FormatItem] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Timestamp format embedded in temporary log names.
pub const LOG_NAME_DATE_FORMAT: &[FormatItem] =
    format_description!("[year][month][day]-[hour][minute][second]");

/// Which probe produced a resolved date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateSource {
    ExifOriginal,
    ExifDigitized,
    ExifModify,
    QuickTimeMovieHeader,
    QuickTimeTrackHeader,
    FilesystemFallback,
}

impl DateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateSource::ExifOriginal => "EXIF:DateTimeOriginal",
            DateSource::ExifDigitized => "EXIF:DateTimeDigitized",
            DateSource::ExifModify => "EXIF:DateTime",
            DateSource::QuickTimeMovieHeader => "QuickTime:MovieHeaderCreated",
            DateSource::QuickTimeTrackHeader => "QuickTime:TrackHeaderCreated",
            DateSource::FilesystemFallback => "Fallback:LastModified",
        }
    }
}

impl std::fmt::Display for DateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Best-known creation instant of an item, with its provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDate {
    pub instant: OffsetDateTime,
    pub source: DateSource,
}

impl ResolvedDate {
    /// The backend-supplied timestamp of `item`.
    pub fn fallback(item: &MediaItem) -> Self {
        Self {
            instant: item.last_modified_fallback,
            source: DateSource::FilesystemFallback,
        }
    }
}

type Probe = fn(&MetadataSet) -> Result<Option<OffsetDateTime>>;

/// Metadata probes in priority order. The first one yielding a value wins.
const PROBES: [(DateSource, Probe); 5] = [
    (DateSource::ExifOriginal, probe_exif_original),
    (DateSource::ExifDigitized, probe_exif_digitized),
    (DateSource::ExifModify, probe_exif_modify),
    (DateSource::QuickTimeMovieHeader, probe_quicktime_movie),
    (DateSource::QuickTimeTrackHeader, probe_quicktime_track),
];

fn probe_exif_original(set: &MetadataSet) -> Result<Option<OffsetDateTime>> {
    let Some(dir) = &set.exif_sub_ifd else {
        return Ok(None);
    };
    dir.date_time(ExifTag::DateTimeOriginal, dir.get(ExifTag::OffsetTimeOriginal))
}

fn probe_exif_digitized(set: &MetadataSet) -> Result<Option<OffsetDateTime>> {
    let Some(dir) = &set.exif_sub_ifd else {
        return Ok(None);
    };
    dir.date_time(ExifTag::DateTimeDigitized, dir.get(ExifTag::OffsetTimeDigitized))
}

fn probe_exif_modify(set: &MetadataSet) -> Result<Option<OffsetDateTime>> {
    let Some(dir) = &set.exif_ifd0 else {
        return Ok(None);
    };
    // OffsetTime lives in the sub-IFD but describes IFD0's DateTime.
    let offset = set
        .exif_sub_ifd
        .as_ref()
        .and_then(|sub| sub.get(ExifTag::OffsetTime));
    dir.date_time(ExifTag::DateTime, offset)
}

fn probe_quicktime_movie(set: &MetadataSet) -> Result<Option<OffsetDateTime>> {
    let Some(qt) = &set.quicktime else {
        return Ok(None);
    };
    match qt.movie()? {
        Some(header) => Ok(header.created_at()?.map(|t| t.to_offset(get_local_tz()))),
        None => Ok(None),
    }
}

fn probe_quicktime_track(set: &MetadataSet) -> Result<Option<OffsetDateTime>> {
    let Some(qt) = &set.quicktime else {
        return Ok(None);
    };
    match qt.track()? {
        Some(header) => Ok(header.created_at()?.map(|t| t.to_offset(get_local_tz()))),
        None => Ok(None),
    }
}

/// Run the probe chain over a metadata set. Each probe's failure stays local to it.
pub fn date_from_metadata(set: &MetadataSet) -> Option<ResolvedDate> {
    for (source, probe) in PROBES {
        match probe(set) {
            Ok(Some(instant)) => return Some(ResolvedDate { instant, source }),
            Ok(None) => {}
            Err(e) => log::debug!("Probe {} failed: {}", source, e),
        }
    }
    None
}

/// Resolves the creation date of media items. Never fails: when every probe
/// comes up empty the backend's fallback timestamp is used.
#[derive(Clone)]
pub struct DateResolver {
    reader: Arc<dyn MetadataReader>,
}

impl DateResolver {
    pub fn new(reader: Arc<dyn MetadataReader>) -> Self {
        Self { reader }
    }

    pub fn resolve(&self, item: &MediaItem, backend: &dyn StorageBackend) -> ResolvedDate {
        match backend.open_read(item) {
            Ok(mut source) => match self.reader.read(source.as_mut()) {
                Ok(set) => {
                    if let Some(resolved) = date_from_metadata(&set) {
                        log::debug!(
                            "{} dated {} from {}",
                            item.source_key,
                            resolved.instant,
                            resolved.source
                        );
                        return resolved;
                    }
                }
                Err(e) => log::debug!("No metadata for {}: {}", item.source_key, e),
            },
            Err(e) => log::warn!(
                "Could not open {} for metadata, using fallback date: {}",
                item.source_key,
                e
            ),
        }

        log::debug!(
            "{} dated {} from fallback timestamp",
            item.source_key,
            item.last_modified_fallback
        );
        ResolvedDate::fallback(item)
    }
}

impl std::fmt::Debug for DateResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DateResolver").finish_non_exhaustive()
    }
}

/// Get the local timezone offset, falling back to UTC if unavailable.
pub fn get_local_tz() -> UtcOffset {
    OffsetDateTime::now_local()
        .map(|dt| dt.offset())
        .unwrap_or(UtcOffset::UTC)
}

/// Get the current local time, falling back to UTC if local time cannot be determined.
pub fn get_current_time() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Format a timestamp for the run log.
pub fn format_log_date(date: &OffsetDateTime) -> String {
    date.format(LOG_DATE_FORMAT).unwrap_or_else(|_| date.to_string())
}
