//! Minimal reader for the creation timestamps of QuickTime / ISO-BMFF
//! containers (`.mov`, `.mp4`).
//!
//! Only the `moov/mvhd` (movie header) and `moov/trak/tkhd` (track header)
//! atoms are decoded. Everything else, including `mdat`, is skipped with a seek.

use std::io::{Read, Seek, SeekFrom};

use time::{Duration, OffsetDateTime, macros::datetime};

use crate::mediasort_core::error::{MediasortError, Result};

/// Start of the QuickTime clock.
const QUICKTIME_EPOCH: OffsetDateTime = datetime!(1904-01-01 0:00 UTC);

/// Atoms that may legally open a QuickTime / ISO-BMFF file.
const LEADING_ATOMS: &[&[u8; 4]] = &[b"ftyp", b"moov", b"mdat", b"wide", b"free", b"skip", b"pnot"];

/// Nesting deeper than this is treated as corruption.
const MAX_DEPTH: usize = 8;

/// Raw creation field of a movie or track header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuickTimeHeader {
    /// Seconds since 1904-01-01T00:00:00Z. Zero means the muxer left it unset.
    pub created: u64,
}

impl QuickTimeHeader {
    /// The creation instant, `None` when unset.
    pub fn created_at(&self) -> Result<Option<OffsetDateTime>> {
        if self.created == 0 {
            return Ok(None);
        }
        let seconds = i64::try_from(self.created).map_err(|_| {
            MediasortError::MalformedMetadata(format!("creation time {} overflows", self.created))
        })?;
        QUICKTIME_EPOCH
            .checked_add(Duration::seconds(seconds))
            .map(Some)
            .ok_or_else(|| {
                MediasortError::MalformedMetadata(format!("creation time {} out of range", seconds))
            })
    }
}

/// Headers found in the `moov` atom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuickTimeHeaders {
    pub movie: Option<QuickTimeHeader>,
    /// First track header encountered.
    pub track: Option<QuickTimeHeader>,
    /// Why a present `mvhd` could not be decoded.
    pub movie_error: Option<String>,
    /// Why a present `tkhd` could not be decoded.
    pub track_error: Option<String>,
}

impl QuickTimeHeaders {
    /// The movie header, or the reason it could not be decoded.
    pub fn movie(&self) -> Result<Option<QuickTimeHeader>> {
        header_or_error(self.movie, self.movie_error.as_deref())
    }

    /// The first track header, or the reason it could not be decoded.
    pub fn track(&self) -> Result<Option<QuickTimeHeader>> {
        header_or_error(self.track, self.track_error.as_deref())
    }
}

fn header_or_error(header: Option<QuickTimeHeader>, error: Option<&str>) -> Result<Option<QuickTimeHeader>> {
    match (header, error) {
        (None, Some(reason)) => Err(MediasortError::MalformedMetadata(reason.to_string())),
        (header, _) => Ok(header),
    }
}

struct AtomHeader {
    kind: [u8; 4],
    /// Offset of the payload.
    body_start: u64,
    /// Offset one past the end of the atom.
    end: u64,
}

/// Read the movie and track headers out of a QuickTime / ISO-BMFF stream.
///
/// Returns `UnsupportedContainer` if the stream does not open with a known atom.
pub fn read_headers<R: Read + Seek>(reader: &mut R) -> Result<QuickTimeHeaders> {
    let len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut lead = [0u8; 8];
    if len < 8 {
        return Err(MediasortError::UnsupportedContainer("stream too short".to_string()));
    }
    reader.read_exact(&mut lead)?;
    if !LEADING_ATOMS.iter().any(|kind| kind[..] == lead[4..]) {
        return Err(MediasortError::UnsupportedContainer(
            "not a QuickTime container".to_string(),
        ));
    }

    let mut headers = QuickTimeHeaders::default();
    let mut pos = 0;
    while pos < len {
        let Some(atom) = read_atom_header(reader, pos, len)? else {
            break;
        };
        if &atom.kind == b"moov" {
            walk_container(reader, &atom, &mut headers, 0)?;
        }
        pos = atom.end;
    }

    Ok(headers)
}

fn walk_container<R: Read + Seek>(
    reader: &mut R,
    parent: &AtomHeader,
    headers: &mut QuickTimeHeaders,
    depth: usize,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(MediasortError::MalformedMetadata("atoms nested too deeply".to_string()));
    }

    let mut pos = parent.body_start;
    while pos < parent.end {
        let Some(atom) = read_atom_header(reader, pos, parent.end)? else {
            break;
        };
        // A bad header only spoils its own probe.
        match &atom.kind {
            b"mvhd" if headers.movie.is_none() => match read_header_created(reader, &atom) {
                Ok(header) => headers.movie = Some(header),
                Err(e) => {
                    log::debug!("Unreadable movie header: {}", e);
                    headers.movie_error.get_or_insert_with(|| e.to_string());
                }
            },
            b"tkhd" if headers.track.is_none() => match read_header_created(reader, &atom) {
                Ok(header) => headers.track = Some(header),
                Err(e) => {
                    log::debug!("Unreadable track header: {}", e);
                    headers.track_error.get_or_insert_with(|| e.to_string());
                }
            },
            b"trak" => walk_container(reader, &atom, headers, depth + 1)?,
            _ => {}
        }
        if headers.movie.is_some() && headers.track.is_some() {
            return Ok(());
        }
        pos = atom.end;
    }
    Ok(())
}

fn read_atom_header<R: Read + Seek>(reader: &mut R, pos: u64, limit: u64) -> Result<Option<AtomHeader>> {
    if limit.saturating_sub(pos) < 8 {
        return Ok(None);
    }
    reader.seek(SeekFrom::Start(pos))?;

    let mut raw = [0u8; 8];
    reader.read_exact(&mut raw)?;
    let size32 = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let kind = [raw[4], raw[5], raw[6], raw[7]];

    let (size, header_len) = match size32 {
        // Extends to the end of the enclosing scope.
        0 => (limit - pos, 8),
        1 => {
            let mut large = [0u8; 8];
            reader.read_exact(&mut large)?;
            (u64::from_be_bytes(large), 16)
        }
        n => (u64::from(n), 8),
    };

    if size < header_len {
        return Err(MediasortError::MalformedMetadata(format!(
            "atom '{}' has invalid size {}",
            String::from_utf8_lossy(&kind),
            size
        )));
    }
    let end = pos.checked_add(size).filter(|end| *end <= limit).ok_or_else(|| {
        MediasortError::MalformedMetadata(format!(
            "atom '{}' overruns its container",
            String::from_utf8_lossy(&kind)
        ))
    })?;

    Ok(Some(AtomHeader {
        kind,
        body_start: pos + header_len,
        end,
    }))
}

/// `mvhd` and `tkhd` share the version/flags + creation-time prefix.
fn read_header_created<R: Read + Seek>(reader: &mut R, atom: &AtomHeader) -> Result<QuickTimeHeader> {
    reader.seek(SeekFrom::Start(atom.body_start))?;
    let mut version_flags = [0u8; 4];
    reader.read_exact(&mut version_flags)?;

    let needed = match version_flags[0] {
        0 => 4 + 4,
        1 => 4 + 8,
        v => {
            return Err(MediasortError::MalformedMetadata(format!(
                "unknown header version {}",
                v
            )));
        }
    };
    if atom.end - atom.body_start < needed {
        return Err(MediasortError::MalformedMetadata("truncated header atom".to_string()));
    }

    let created = if version_flags[0] == 0 {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        u64::from(u32::from_be_bytes(buf))
    } else {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        u64::from_be_bytes(buf)
    };

    Ok(QuickTimeHeader { created })
}
