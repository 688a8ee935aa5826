#![allow(dead_code)]

use assert_fs::TempDir;
use assert_fs::fixture::ChildPath;
use assert_fs::prelude::*;
use std::path::Path;

const TAG_DATE_TIME: u16 = 0x0132;
const TAG_EXIF_IFD_POINTER: u16 = 0x8769;
const TAG_DATE_TIME_ORIGINAL: u16 = 0x9003;
const TAG_DATE_TIME_DIGITIZED: u16 = 0x9004;

/// Seconds between 1904-01-01 and 2024-03-15T10:00:00Z.
pub const QT_2024_03_15: u32 = 3_793_341_600;

/// EXIF dates to embed, as `YYYY:MM:DD HH:MM:SS`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifDates<'a> {
    pub original: Option<&'a str>,
    pub digitized: Option<&'a str>,
    pub modified: Option<&'a str>,
}

impl<'a> ExifDates<'a> {
    pub fn original(date: &'a str) -> Self {
        Self {
            original: Some(date),
            ..Default::default()
        }
    }
}

fn ascii_entry(tag: u16, value: &str, data: &mut Vec<u8>, data_start: usize) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    let offset = data_start + data.len();
    data.extend_from_slice(&bytes);
    if data.len() % 2 == 1 {
        data.push(0);
    }

    let mut entry = Vec::with_capacity(12);
    entry.extend_from_slice(&tag.to_le_bytes());
    entry.extend_from_slice(&2u16.to_le_bytes());
    entry.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    entry.extend_from_slice(&(offset as u32).to_le_bytes());
    entry
}

fn ifd(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for entry in entries {
        out.extend_from_slice(entry);
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

/// A little-endian TIFF structure holding the given dates.
pub fn tiff_with_dates(dates: ExifDates) -> Vec<u8> {
    let ifd0_tags = usize::from(dates.modified.is_some()) + 1;
    let exif_tags = usize::from(dates.original.is_some()) + usize::from(dates.digitized.is_some());

    let ifd0_start = 8;
    let exif_start = ifd0_start + 2 + 12 * ifd0_tags + 4;
    let data_start = exif_start + 2 + 12 * exif_tags + 4;
    let mut data = Vec::new();

    let mut ifd0_entries = Vec::new();
    if let Some(modified) = dates.modified {
        ifd0_entries.push(ascii_entry(TAG_DATE_TIME, modified, &mut data, data_start));
    }
    let mut pointer = Vec::with_capacity(12);
    pointer.extend_from_slice(&TAG_EXIF_IFD_POINTER.to_le_bytes());
    pointer.extend_from_slice(&4u16.to_le_bytes());
    pointer.extend_from_slice(&1u32.to_le_bytes());
    pointer.extend_from_slice(&(exif_start as u32).to_le_bytes());
    ifd0_entries.push(pointer);

    let mut exif_entries = Vec::new();
    if let Some(original) = dates.original {
        exif_entries.push(ascii_entry(TAG_DATE_TIME_ORIGINAL, original, &mut data, data_start));
    }
    if let Some(digitized) = dates.digitized {
        exif_entries.push(ascii_entry(TAG_DATE_TIME_DIGITIZED, digitized, &mut data, data_start));
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&(ifd0_start as u32).to_le_bytes());
    out.extend_from_slice(&ifd(&ifd0_entries));
    out.extend_from_slice(&ifd(&exif_entries));
    out.extend_from_slice(&data);
    out
}

/// A minimal JPEG: SOI, an APP1 Exif segment, EOI.
pub fn jpeg_with_exif(dates: ExifDates) -> Vec<u8> {
    let tiff = tiff_with_dates(dates);
    let mut out = vec![0xFF, 0xD8, 0xFF, 0xE1];
    out.extend_from_slice(&((2 + 6 + tiff.len()) as u16).to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

/// A JPEG without any metadata segment.
pub fn bare_jpeg() -> Vec<u8> {
    vec![0xFF, 0xD8, 0xFF, 0xD9]
}

fn atom(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(&((body.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

fn header_v0(created: u32, len: usize) -> Vec<u8> {
    let mut body = vec![0, 0, 0, 0];
    body.extend_from_slice(&created.to_be_bytes());
    body.extend_from_slice(&created.to_be_bytes());
    body.resize(len, 0);
    body
}

/// A `.mov`-shaped stream: `ftyp`, then `moov` with movie and track headers.
pub fn quicktime_movie(movie_created: u32, track_created: u32) -> Vec<u8> {
    let trak = atom(b"trak", &atom(b"tkhd", &header_v0(track_created, 84)));
    let mut moov_body = atom(b"mvhd", &header_v0(movie_created, 100));
    moov_body.extend_from_slice(&trak);

    let mut out = atom(b"ftyp", b"qt  \0\0\0\0qt  ");
    out.extend_from_slice(&atom(b"moov", &moov_body));
    out.extend_from_slice(&atom(b"mdat", &[0u8; 16]));
    out
}

/// Write `bytes` to `name` under `dir` and pin its modification time.
pub fn write_media(dir: &ChildPath, name: &str, bytes: &[u8], mtime_unix: i64) -> ChildPath {
    let file = dir.child(name);
    file.write_binary(bytes).unwrap();
    filetime::set_file_mtime(file.path(), filetime::FileTime::from_unix_time(mtime_unix, 0))
        .unwrap();
    file
}

pub fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Source, destination and log directories inside a fresh temp dir.
pub fn workspace() -> (TempDir, ChildPath, ChildPath, ChildPath) {
    let temp = TempDir::new().unwrap();
    let source = temp.child("inbox");
    let destination = temp.child("sorted");
    let logs = temp.child("logs");
    source.create_dir_all().unwrap();
    (temp, source, destination, logs)
}
