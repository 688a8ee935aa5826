use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{ProgressBar, ProgressStyle};

use crate::mediasort_core::backend::{StorageBackend, join_key};
use crate::mediasort_core::config::SortConfig;
use crate::mediasort_core::date::{DateResolver, get_current_time};
use crate::mediasort_core::error::{MediasortError, Result};
use crate::mediasort_core::media::{MediaItem, is_sortable};
use crate::mediasort_core::metadata::{MetadataReader, StandardMetadataReader};
use crate::mediasort_core::naming::resolve_unique_name;
use crate::mediasort_core::planner::{DestinationPlan, FolderPlan, MonthNames, plan};
use crate::mediasort_core::runlog::{
    LogLine, LogWriter, RunCounts, RunLog, source_log_name, temp_log_name,
};
use crate::mediasort_core::workers::{resolve_dates, run_with_timeout};

/// How many times a name is re-resolved when another writer claims it first.
const NAME_CLAIM_ATTEMPTS: u32 = 3;

/// Cooperative cancellation flag, checked between items.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortRequest {
    pub source_location: String,
    pub source_prefix: Option<String>,
    pub destination_location: String,
    /// Delete each source after a successful transfer.
    pub move_files: bool,
    pub log_location: Option<String>,
}

impl SortRequest {
    pub fn new(source_location: impl Into<String>, destination_location: impl Into<String>) -> Self {
        Self {
            source_location: source_location.into(),
            source_prefix: None,
            destination_location: destination_location.into(),
            move_files: false,
            log_location: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.source_prefix = Some(prefix.into());
        self
    }

    pub fn moving(mut self, move_files: bool) -> Self {
        self.move_files = move_files;
        self
    }

    pub fn with_log_location(mut self, log_location: impl Into<String>) -> Self {
        self.log_location = Some(log_location.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub moved_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    /// Final (or, if finalization failed, temporary) location of the run log.
    pub log_location: Option<String>,
    pub status: RunStatus,
}

enum Outcome {
    Moved(String),
    Skipped,
}

/// The sort engine. One instance can serve many runs.
pub struct Sorter {
    backend: Arc<dyn StorageBackend>,
    resolver: DateResolver,
    months: Arc<dyn MonthNames>,
    config: SortConfig,
    token: CancellationToken,
    show_progress: bool,
}

impl Sorter {
    pub fn new(backend: Arc<dyn StorageBackend>, config: SortConfig) -> Result<Self> {
        let months = config.month_names()?;
        Ok(Self {
            backend,
            resolver: DateResolver::new(Arc::new(StandardMetadataReader)),
            months,
            config,
            token: CancellationToken::new(),
            show_progress: false,
        })
    }

    pub fn with_metadata_reader(mut self, reader: Arc<dyn MetadataReader>) -> Self {
        self.resolver = DateResolver::new(reader);
        self
    }

    pub fn with_month_names(mut self, months: Arc<dyn MonthNames>) -> Self {
        self.months = months;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    fn progress_bar(&self, len: usize, message: &'static str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar_style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let bar = ProgressBar::new(len as u64).with_style(bar_style);
        bar.set_message(message);
        bar
    }

    /// Sort every media item under the request's source into
    /// `destination/Year/MM - MonthName/`.
    ///
    /// Fails only when the source cannot be enumerated or the destination
    /// cannot be created. Per-item problems are counted and logged.
    pub fn run(&self, request: &SortRequest) -> Result<RunSummary> {
        let started = get_current_time();
        let prefix = request.source_prefix.as_deref().filter(|p| !p.is_empty());

        log::info!("Sort Phase 1: Enumerating {}", request.source_location);
        let items: Vec<MediaItem> = self
            .backend
            .enumerate(&request.source_location, prefix)?
            .into_iter()
            .filter(|item| is_sortable(item.file_name()))
            .collect();
        self.backend.ensure_location(&request.destination_location)?;
        log::info!("Found {} media files to sort", items.len());

        let source_name = source_log_name(&request.source_location, prefix);
        let log_location = self
            .config
            .resolve_log_location(request.log_location.as_deref());
        let sink = match self
            .backend
            .open_log_sink(&log_location, &temp_log_name(&started, &source_name))
        {
            Ok(sink) => Some(sink),
            Err(e) => {
                log::warn!("Run log at {} unavailable, continuing without it: {}", log_location, e);
                None
            }
        };
        let source_display = match prefix {
            Some(p) => self.backend.locate(&request.source_location, p),
            None => request.source_location.clone(),
        };
        let mut writer = LogWriter::start(
            RunLog::new(&source_display, &request.destination_location, started),
            &source_name,
            sink,
        );

        let scan_bar = self.progress_bar(items.len(), "Reading dates");
        let dates = resolve_dates(
            &items,
            &self.resolver,
            &self.backend,
            self.config.worker_count(),
            self.config.item_timeout(),
            &self.token,
            &scan_bar,
        );
        scan_bar.finish_with_message("Dates resolved");

        log::info!("Sort Phase 2: Transferring to {}", request.destination_location);
        let sort_bar = self.progress_bar(items.len(), "Sorting");
        let mut counts = RunCounts::default();
        let mut not_processed = None;

        for (index, (item, date)) in items.iter().zip(dates).enumerate() {
            if self.token.is_cancelled() {
                not_processed = Some(items.len() - index);
                log::warn!("Cancelled with {} item(s) left", items.len() - index);
                break;
            }

            let date = date.unwrap_or_else(|| self.resolver.resolve(item, self.backend.as_ref()));
            let folder = plan(&date.instant, self.months.as_ref());

            match self.sort_item(item, request, &folder) {
                Ok(Outcome::Moved(destination)) => {
                    log::debug!("{} -> {} ({})", item.source_key, destination, date.source);
                    counts.moved += 1;
                    writer.record(LogLine::moved(&item.source_key, &destination));
                }
                Ok(Outcome::Skipped) => {
                    log::debug!("{} is already in place", item.source_key);
                    counts.skipped += 1;
                    writer.record(LogLine::skipped(&item.source_key));
                }
                Err(e) => {
                    log::error!("Failed to sort {}: {}", item.source_key, e);
                    counts.errors += 1;
                    writer.record(LogLine::error(&item.source_key, &e.to_string()));
                }
            }
            sort_bar.inc(1);
        }
        sort_bar.finish_with_message("Sorting complete");

        let status = if not_processed.is_some() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        let (_, log_location) = writer.finish(counts, not_processed, get_current_time());

        log::info!(
            "Sort finished: {} moved, {} skipped, {} errors",
            counts.moved,
            counts.skipped,
            counts.errors
        );

        Ok(RunSummary {
            moved_count: counts.moved,
            skipped_count: counts.skipped,
            error_count: counts.errors,
            log_location,
            status,
        })
    }

    /// Name, transfer and (in move mode) delete one item.
    fn sort_item(&self, item: &MediaItem, request: &SortRequest, folder: &FolderPlan) -> Result<Outcome> {
        let destination = request.destination_location.as_str();
        let prefix = folder.prefix();
        self.backend.prepare_prefix(destination, &prefix)?;

        let own_location = self.backend.item_location(item);
        let content_type = item.content_type();
        let mut attempt = 0;

        loop {
            attempt += 1;

            // The item's own location counts as free so an item already in
            // place keeps its name and is then skipped.
            let final_name = resolve_unique_name(item.file_name(), |candidate| {
                let key = join_key(&prefix, candidate);
                if self.backend.locate(destination, &key) == own_location {
                    return Ok(false);
                }
                self.backend.exists(destination, &key)
            })?;
            let target = DestinationPlan {
                directory_or_prefix: prefix.clone(),
                final_name,
            };
            let key = join_key(&target.directory_or_prefix, &target.final_name);
            let located = self.backend.locate(destination, &key);

            if located == own_location {
                return Ok(Outcome::Skipped);
            }

            match self.copy_item(item, destination, &key, content_type.clone()) {
                Ok(()) => {
                    if request.move_files {
                        self.backend.delete(item).map_err(|e| {
                            MediasortError::SourceNotDeleted {
                                destination: located.clone(),
                                reason: e.to_string(),
                            }
                        })?;
                    }
                    return Ok(Outcome::Moved(located));
                }
                Err(MediasortError::DestinationExists(_)) if attempt < NAME_CLAIM_ATTEMPTS => {
                    log::debug!(
                        "{} was claimed before the copy started, renaming (attempt {})",
                        located,
                        attempt
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn copy_item(
        &self,
        item: &MediaItem,
        destination: &str,
        key: &str,
        content_type: Option<String>,
    ) -> Result<()> {
        let backend = Arc::clone(&self.backend);
        let item = item.clone();
        let destination = destination.to_string();
        let job_key = key.to_string();
        run_with_timeout(key, self.config.item_timeout(), move || {
            backend.copy_stream(&item, &destination, &job_key, content_type.as_deref())
        })
    }
}

/// Run one sort with the standard metadata reader.
pub fn sort(
    backend: Arc<dyn StorageBackend>,
    config: SortConfig,
    request: &SortRequest,
) -> Result<RunSummary> {
    Sorter::new(backend, config)?.run(request)
}
