use std::collections::BTreeMap;
use std::io::{BufReader, Seek, SeekFrom};

use exif::{In, Reader, Tag, Value};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::mediasort_core::backend::ReadSeek;
use crate::mediasort_core::date::get_local_tz;
use crate::mediasort_core::error::{MediasortError, Result};
use crate::mediasort_core::quicktime::{self, QuickTimeHeaders};

/// Date format used in EXIF data.
pub const EXIF_DATE_FORMAT: &[FormatItem] =
    format_description!("[year]:[month]:[day] [hour]:[minute]:[second]");

/// Offset format used by the EXIF `OffsetTime*` tags.
pub const EXIF_OFFSET_FORMAT: &[FormatItem] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]");

/// Reads the metadata directories out of a media byte stream.
///
/// Implementations may fail on unsupported or corrupt input; callers treat a
/// failure as "no metadata".
pub trait MetadataReader: Send + Sync {
    fn read(&self, source: &mut dyn ReadSeek) -> Result<MetadataSet>;
}

/// EXIF tags the date probes care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExifTag {
    DateTimeOriginal,
    DateTimeDigitized,
    DateTime,
    OffsetTimeOriginal,
    OffsetTimeDigitized,
    OffsetTime,
}

impl ExifTag {
    const SUB_IFD: [ExifTag; 5] = [
        ExifTag::DateTimeOriginal,
        ExifTag::DateTimeDigitized,
        ExifTag::OffsetTimeOriginal,
        ExifTag::OffsetTimeDigitized,
        ExifTag::OffsetTime,
    ];

    fn tag(self) -> Tag {
        match self {
            ExifTag::DateTimeOriginal => Tag::DateTimeOriginal,
            ExifTag::DateTimeDigitized => Tag::DateTimeDigitized,
            ExifTag::DateTime => Tag::DateTime,
            ExifTag::OffsetTimeOriginal => Tag::OffsetTimeOriginal,
            ExifTag::OffsetTimeDigitized => Tag::OffsetTimeDigitized,
            ExifTag::OffsetTime => Tag::OffsetTime,
        }
    }
}

/// The ASCII values of one EXIF directory (IFD0 or the Exif sub-IFD).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExifDirectory {
    entries: BTreeMap<ExifTag, String>,
}

impl ExifDirectory {
    pub fn with(mut self, tag: ExifTag, value: impl Into<String>) -> Self {
        self.entries.insert(tag, value.into());
        self
    }

    pub fn get(&self, tag: ExifTag) -> Option<&str> {
        self.entries.get(&tag).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a date tag. A missing tag is `Ok(None)`; a present but unparsable one is an error.
    pub fn date_time(&self, tag: ExifTag, offset: Option<&str>) -> Result<Option<OffsetDateTime>> {
        match self.get(tag) {
            Some(raw) => parse_exif_date(raw, offset).map(Some),
            None => Ok(None),
        }
    }
}

/// Every metadata directory recovered from one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataSet {
    pub exif_sub_ifd: Option<ExifDirectory>,
    pub exif_ifd0: Option<ExifDirectory>,
    pub quicktime: Option<QuickTimeHeaders>,
}

impl MetadataSet {
    pub fn is_empty(&self) -> bool {
        self.exif_sub_ifd.is_none() && self.exif_ifd0.is_none() && self.quicktime.is_none()
    }
}

/// EXIF via `kamadak-exif`, QuickTime headers via [`quicktime`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardMetadataReader;

impl MetadataReader for StandardMetadataReader {
    fn read(&self, source: &mut dyn ReadSeek) -> Result<MetadataSet> {
        let mut buffered = BufReader::new(source);
        let mut set = MetadataSet::default();

        let exif_error = match Reader::new().read_from_container(&mut buffered) {
            Ok(exif) => {
                let (sub_ifd, ifd0) = split_directories(&exif);
                set.exif_sub_ifd = Some(sub_ifd).filter(|d| !d.is_empty());
                set.exif_ifd0 = Some(ifd0).filter(|d| !d.is_empty());
                None
            }
            Err(e) => Some(e),
        };

        buffered.seek(SeekFrom::Start(0))?;
        let quicktime_error = match quicktime::read_headers(&mut buffered) {
            Ok(headers) => {
                set.quicktime = Some(headers);
                None
            }
            Err(e) => Some(e),
        };

        match (exif_error, quicktime_error) {
            (Some(exif_err), Some(qt_err)) => {
                log::debug!("No readable metadata: exif: {}; quicktime: {}", exif_err, qt_err);
                Err(MediasortError::Exif(exif_err))
            }
            _ => Ok(set),
        }
    }
}

fn split_directories(exif: &exif::Exif) -> (ExifDirectory, ExifDirectory) {
    let mut sub_ifd = ExifDirectory::default();
    for tag in ExifTag::SUB_IFD {
        if let Some(value) = ascii_field(exif, tag) {
            sub_ifd = sub_ifd.with(tag, value);
        }
    }

    let mut ifd0 = ExifDirectory::default();
    if let Some(value) = ascii_field(exif, ExifTag::DateTime) {
        ifd0 = ifd0.with(ExifTag::DateTime, value);
    }

    (sub_ifd, ifd0)
}

fn ascii_field(exif: &exif::Exif, tag: ExifTag) -> Option<String> {
    let field = exif.get_field(tag.tag(), In::PRIMARY)?;
    match &field.value {
        Value::Ascii(parts) => {
            let first = parts.first()?;
            let text = String::from_utf8_lossy(first);
            let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
            (!text.is_empty()).then(|| text.to_string())
        }
        _ => None,
    }
}

/// Parse an EXIF date string, applying its `OffsetTime*` companion when present
/// and the local offset otherwise. An unreadable offset never rejects the date.
pub fn parse_exif_date(date_str: &str, offset_str: Option<&str>) -> Result<OffsetDateTime> {
    let cleaned = normalize_exif_date(date_str.trim());
    let date_time = PrimitiveDateTime::parse(&cleaned, EXIF_DATE_FORMAT)
        .map_err(|e| MediasortError::InvalidDateFormat(format!("'{}': {}", date_str, e)))?;
    let offset = match offset_str.map(str::trim).filter(|o| !o.is_empty()) {
        Some(o) => UtcOffset::parse(o, EXIF_OFFSET_FORMAT).unwrap_or_else(|e| {
            log::debug!("Ignoring EXIF offset '{}' on '{}': {}", o, date_str, e);
            get_local_tz()
        }),
        None => get_local_tz(),
    };
    Ok(date_time.assume_offset(offset))
}

/// Some writers separate the date part with `-` or `/` instead of `:`.
fn normalize_exif_date(s: &str) -> String {
    s.char_indices()
        .map(|(i, c)| if i < 10 && (c == '-' || c == '/') { ':' } else { c })
        .collect()
}
