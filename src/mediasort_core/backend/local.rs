use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use time::OffsetDateTime;
use walkdir::WalkDir;

use crate::mediasort_core::backend::{ReadSeek, StorageBackend};
use crate::mediasort_core::date::{get_current_time, get_local_tz};
use crate::mediasort_core::error::{MediasortError, Result};
use crate::mediasort_core::media::MediaItem;
use crate::mediasort_core::naming::resolve_unique_name;
use crate::mediasort_core::runlog::LogSink;

/// Creation times this close to the epoch are placeholders, not real values.
const CREATION_TIME_FLOOR: Duration = Duration::from_secs(24 * 60 * 60);

/// Sorts files on a local (or mounted) filesystem. Locations are directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }

    /// Describe a single file the way enumeration would.
    pub fn item_for(path: &Path) -> Result<MediaItem> {
        let meta = fs::metadata(path)?;
        let path = std::path::absolute(path)?;
        let parent = normalize_dir(path.parent().unwrap_or(Path::new("/")));
        let path = match path.file_name() {
            Some(name) => parent.join(name),
            None => path,
        };
        Ok(Self::describe(parent.to_string_lossy().to_string(), path, &meta))
    }

    fn describe(location: String, path: PathBuf, meta: &fs::Metadata) -> MediaItem {
        MediaItem {
            source_location: location,
            last_modified_fallback: fallback_timestamp(meta, &path),
            source_key: path.to_string_lossy().to_string(),
            size_hint: meta.len(),
            declared_content_type: None,
        }
    }

    fn resolve(location: impl Into<PathBuf>, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(location.into(), |path, segment| path.join(segment))
    }
}

/// Absolute form of `dir` with `..` and symlinks resolved. Falls back to the
/// lexical absolute path while the directory does not exist yet.
fn normalize_dir(dir: &Path) -> PathBuf {
    fs::canonicalize(dir)
        .or_else(|_| std::path::absolute(dir))
        .unwrap_or_else(|_| dir.to_path_buf())
}

/// Creation time unless it is unavailable or a sentinel, then last-write time.
fn fallback_timestamp(meta: &fs::Metadata, path: &Path) -> OffsetDateTime {
    let created = meta.created().ok().filter(|t| {
        t.duration_since(SystemTime::UNIX_EPOCH)
            .map(|since| since > CREATION_TIME_FLOOR)
            .unwrap_or(false)
    });
    let chosen = created.or_else(|| meta.modified().ok());
    match chosen {
        Some(t) => OffsetDateTime::from(t).to_offset(get_local_tz()),
        None => {
            log::warn!(
                "No filesystem timestamps for {}. Using current time.",
                path.display()
            );
            get_current_time()
        }
    }
}

impl StorageBackend for LocalBackend {
    fn enumerate(&self, location: &str, prefix: Option<&str>) -> Result<Vec<MediaItem>> {
        let root = match prefix.filter(|p| !p.is_empty()) {
            Some(p) => Self::resolve(location, p),
            None => PathBuf::from(location),
        };
        if !root.is_dir() {
            return Err(MediasortError::SourceNotFound(root.display().to_string()));
        }
        let root = fs::canonicalize(&root)?;

        let mut items = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let meta = entry.metadata()?;
            items.push(Self::describe(location.to_string(), entry.into_path(), &meta));
        }

        log::debug!("Enumerated {} files under {}", items.len(), root.display());
        Ok(items)
    }

    fn ensure_location(&self, location: &str) -> Result<()> {
        fs::create_dir_all(location).map_err(|e| MediasortError::DestinationUnavailable {
            location: location.to_string(),
            reason: e.to_string(),
        })
    }

    fn prepare_prefix(&self, location: &str, prefix: &str) -> Result<()> {
        fs::create_dir_all(Self::resolve(location, prefix))?;
        Ok(())
    }

    fn exists(&self, location: &str, key: &str) -> Result<bool> {
        Ok(Self::resolve(location, key).try_exists()?)
    }

    fn open_read(&self, item: &MediaItem) -> Result<Box<dyn ReadSeek + Send>> {
        Ok(Box::new(File::open(&item.source_key)?))
    }

    fn copy_stream(
        &self,
        item: &MediaItem,
        location: &str,
        key: &str,
        _content_type: Option<&str>,
    ) -> Result<()> {
        let dest = Self::resolve(location, key);
        let mut source = File::open(&item.source_key)?;
        let out = match OpenOptions::new().write(true).create_new(true).open(&dest) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(MediasortError::DestinationExists(dest.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut writer = BufWriter::new(out);
        let copied = io::copy(&mut source, &mut writer).and_then(|_| writer.flush());
        if let Err(e) = copied {
            // Do not leave a truncated copy behind to shadow the name.
            drop(writer);
            if let Err(cleanup) = fs::remove_file(&dest) {
                log::warn!("Could not remove partial copy {}: {}", dest.display(), cleanup);
            }
            return Err(e.into());
        }
        drop(writer);

        // Keep the original modification time so a re-run dates the copy the same way.
        if let Ok(meta) = fs::metadata(&item.source_key) {
            let mtime = filetime::FileTime::from_last_modification_time(&meta);
            if let Err(e) = filetime::set_file_mtime(&dest, mtime) {
                log::debug!("Could not preserve mtime on {}: {}", dest.display(), e);
            }
        }
        Ok(())
    }

    fn delete(&self, item: &MediaItem) -> Result<()> {
        fs::remove_file(&item.source_key)?;
        Ok(())
    }

    fn locate(&self, location: &str, key: &str) -> String {
        Self::resolve(normalize_dir(Path::new(location)), key)
            .to_string_lossy()
            .to_string()
    }

    fn item_location(&self, item: &MediaItem) -> String {
        item.source_key.clone()
    }

    fn open_log_sink(&self, log_location: &str, temp_name: &str) -> Result<Box<dyn LogSink>> {
        Ok(Box::new(FileLogSink::create(Path::new(log_location), temp_name)?))
    }
}

/// Run log written line by line to a temporary file, renamed on finalize.
pub struct FileLogSink {
    dir: PathBuf,
    temp_path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileLogSink {
    pub fn create(dir: &Path, temp_name: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let temp_path = dir.join(temp_name);
        let file = OpenOptions::new().create(true).append(true).open(&temp_path)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            temp_path,
            writer: Some(BufWriter::new(file)),
        })
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

impl LogSink for FileLogSink {
    fn temp_location(&self) -> String {
        self.temp_path.display().to_string()
    }

    fn append(&mut self, line: &str) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| MediasortError::Other("run log already closed".to_string()))?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }

    fn finalize(&mut self, final_name: &str) -> Result<String> {
        self.close()?;
        let name = resolve_unique_name(final_name, |candidate| {
            Ok(self.dir.join(candidate).try_exists()?)
        })?;
        let final_path = self.dir.join(name);
        fs::rename(&self.temp_path, &final_path)?;
        Ok(final_path.display().to_string())
    }

    fn abandon(&mut self) -> Option<String> {
        if let Err(e) = self.close() {
            log::warn!("Could not flush run log {}: {}", self.temp_path.display(), e);
        }
        self.temp_path
            .exists()
            .then(|| self.temp_path.display().to_string())
    }
}
