//! The run log: a plain UTF-8 audit trail of one sort run.
//!
//! Layout (the structure is stable; tooling parses it):
//!
//! ```text
//! Source: {source}
//! Destination: {destination}
//! Started: yyyy-MM-dd HH:mm:ss
//!
//! Moved: {source} -> {destination}
//! Skipped (same destination): {source}
//! Error: {source} | Reason: {message}
//!
//! Finished: yyyy-MM-dd HH:mm:ss
//! Summary -> Moved: n, Skipped: n, Errors: n
//! ```

use time::OffsetDateTime;

use crate::mediasort_core::date::{LOG_NAME_DATE_FORMAT, format_log_date};
use crate::mediasort_core::error::Result;
use crate::mediasort_core::media::file_name_of;
use crate::mediasort_core::naming::sanitize_file_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Moved,
    Skipped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub kind: LineKind,
    pub detail: String,
}

impl LogLine {
    pub fn moved(source: &str, destination: &str) -> Self {
        Self {
            kind: LineKind::Moved,
            detail: format!("{} -> {}", source, destination),
        }
    }

    pub fn skipped(source: &str) -> Self {
        Self {
            kind: LineKind::Skipped,
            detail: source.to_string(),
        }
    }

    pub fn error(source: &str, reason: &str) -> Self {
        Self {
            kind: LineKind::Error,
            detail: format!("{} | Reason: {}", source, reason),
        }
    }

    pub fn render(&self) -> String {
        match self.kind {
            LineKind::Moved => format!("Moved: {}", self.detail),
            LineKind::Skipped => format!("Skipped (same destination): {}", self.detail),
            LineKind::Error => format!("Error: {}", self.detail),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub moved: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl RunCounts {
    pub fn total(&self) -> usize {
        self.moved + self.skipped + self.errors
    }
}

/// In-memory copy of everything written to the log during a run.
#[derive(Debug, Clone)]
pub struct RunLog {
    pub source: String,
    pub destination: String,
    pub started: OffsetDateTime,
    pub lines: Vec<LogLine>,
    pub finished: Option<OffsetDateTime>,
    pub counts: RunCounts,
    /// Items left untouched because the run was cancelled.
    pub not_processed: Option<usize>,
}

impl RunLog {
    pub fn new(source: &str, destination: &str, started: OffsetDateTime) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            started,
            lines: Vec::new(),
            finished: None,
            counts: RunCounts::default(),
            not_processed: None,
        }
    }

    fn header_lines(&self) -> Vec<String> {
        vec![
            format!("Source: {}", self.source),
            format!("Destination: {}", self.destination),
            format!("Started: {}", format_log_date(&self.started)),
            String::new(),
        ]
    }

    fn footer_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(remaining) = self.not_processed {
            lines.push(format!("Cancelled: {} item(s) not processed", remaining));
        }
        // The header already ends with a blank line.
        if !self.lines.is_empty() || self.not_processed.is_some() {
            lines.push(String::new());
        }
        if let Some(finished) = &self.finished {
            lines.push(format!("Finished: {}", format_log_date(finished)));
        }
        lines.push(format!(
            "Summary -> Moved: {}, Skipped: {}, Errors: {}",
            self.counts.moved, self.counts.skipped, self.counts.errors
        ));
        lines
    }

    pub fn lines_of(&self, kind: LineKind) -> impl Iterator<Item = &LogLine> {
        self.lines.iter().filter(move |l| l.kind == kind)
    }

    /// The complete log text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in self.header_lines() {
            out.push_str(&line);
            out.push('\n');
        }
        for line in &self.lines {
            out.push_str(&line.render());
            out.push('\n');
        }
        if self.finished.is_some() {
            for line in self.footer_lines() {
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    }
}

/// Destination of the run log text.
pub trait LogSink: Send {
    /// Where the log lives until it is finalized.
    fn temp_location(&self) -> String;

    /// Append one line (without its terminator).
    fn append(&mut self, line: &str) -> Result<()>;

    /// Move the log to `final_name`, de-duplicated against existing logs.
    /// Returns the final location.
    fn finalize(&mut self, final_name: &str) -> Result<String>;

    /// Called when finalization failed: leave the log at its temporary
    /// location if possible and report it.
    fn abandon(&mut self) -> Option<String>;
}

/// Writes the run log incrementally and finalizes it under
/// `"{moved} - {source name}.txt"`.
pub struct LogWriter {
    log: RunLog,
    sink: Option<Box<dyn LogSink>>,
    source_name: String,
    append_failed: bool,
}

impl LogWriter {
    pub fn start(
        log: RunLog,
        source_name: &str,
        sink: Option<Box<dyn LogSink>>,
    ) -> Self {
        let mut writer = Self {
            log,
            sink,
            source_name: source_name.to_string(),
            append_failed: false,
        };
        for line in writer.log.header_lines() {
            writer.write(&line);
        }
        writer
    }

    pub fn record(&mut self, line: LogLine) {
        let rendered = line.render();
        self.log.lines.push(line);
        self.write(&rendered);
    }

    /// Write the footer and finalize the sink. Returns the log and its final
    /// location; `None` when no sink was available at all.
    pub fn finish(
        mut self,
        counts: RunCounts,
        not_processed: Option<usize>,
        finished: OffsetDateTime,
    ) -> (RunLog, Option<String>) {
        self.log.counts = counts;
        self.log.not_processed = not_processed;
        self.log.finished = Some(finished);
        for line in self.log.footer_lines() {
            self.write(&line);
        }

        let location = self.sink.as_mut().and_then(|sink| {
            let final_name = format!("{} - {}.txt", counts.moved, self.source_name);
            match sink.finalize(&final_name) {
                Ok(location) => Some(location),
                Err(e) => {
                    log::warn!(
                        "Could not finalize run log as '{}': {}. Leaving it at {}",
                        final_name,
                        e,
                        sink.temp_location()
                    );
                    sink.abandon()
                }
            }
        });

        (self.log, location)
    }

    fn write(&mut self, line: &str) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if let Err(e) = sink.append(line) {
            if !self.append_failed {
                log::warn!("Failed to write to run log {}: {}", sink.temp_location(), e);
                self.append_failed = true;
            }
        }
    }
}

/// Sanitized display name of a run's source, used in log names.
pub fn source_log_name(location: &str, prefix: Option<&str>) -> String {
    let candidate = prefix
        .map(file_name_of)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| Some(file_name_of(location)).filter(|s| !s.trim().is_empty()))
        .unwrap_or("root");
    sanitize_file_name(candidate)
}

/// `sorting-{yyyyMMdd-HHmmss}-{source name}.txt`
pub fn temp_log_name(started: &OffsetDateTime, source_name: &str) -> String {
    let stamp = started
        .format(LOG_NAME_DATE_FORMAT)
        .unwrap_or_else(|_| started.unix_timestamp().to_string());
    format!("sorting-{}-{}.txt", stamp, source_name)
}
