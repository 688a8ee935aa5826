use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::mediasort_core::error::{MediasortError, Result};
use crate::mediasort_core::planner::{CustomMonthNames, EnglishMonthNames, MonthNames};

/// Config file picked up from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "mediasort.json";

/// Where run logs go when neither the request nor the config names a location.
pub const DEFAULT_LOG_LOCATION: &str = "sorting-logs";

/// Stands for the container name in [`BlobServiceConfig::url`].
pub const CONTAINER_PLACEHOLDER: &str = "{container}";

/// How to reach the blob service used by `sort --blob`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlobServiceConfig {
    /// Container URL with a `{container}` placeholder, e.g. `az://{container}`.
    pub url: String,
    /// Client options such as `azure_storage_account_name` or `aws_region`.
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Engine settings. Every field is optional in the JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SortConfig {
    /// Log directory (local) or `container[/prefix]` (blob).
    pub default_log_location: Option<String>,
    /// Upper bound for reading or transferring a single item. `None` waits indefinitely.
    pub item_timeout_secs: Option<u64>,
    /// Date-resolution worker count. Defaults to the number of CPUs.
    pub workers: Option<usize>,
    /// Twelve month names, January first.
    pub month_names: Option<Vec<String>>,
    pub blob: Option<BlobServiceConfig>,
}

impl SortConfig {
    /// Load `path` if given (it must exist), else `mediasort.json` in the
    /// working directory if present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate: Option<PathBuf> = match path {
            Some(p) => {
                if !p.is_file() {
                    return Err(MediasortError::Config(format!(
                        "config file '{}' does not exist",
                        p.display()
                    )));
                }
                Some(p.to_path_buf())
            }
            None => Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.is_file()),
        };

        match candidate {
            Some(p) => {
                log::info!("Loading configuration from {}", p.display());
                Self::from_json(&fs::read_to_string(&p)?)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: SortConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == Some(0) {
            return Err(MediasortError::Config("workers must be at least 1".to_string()));
        }
        if self.item_timeout_secs == Some(0) {
            return Err(MediasortError::Config(
                "item_timeout_secs must be at least 1".to_string(),
            ));
        }
        if let Some(names) = &self.month_names {
            CustomMonthNames::new(names.clone())?;
        }
        if let Some(blob) = &self.blob {
            if !blob.url.contains(CONTAINER_PLACEHOLDER) {
                return Err(MediasortError::Config(format!(
                    "blob url '{}' has no {} placeholder",
                    blob.url, CONTAINER_PLACEHOLDER
                )));
            }
        }
        Ok(())
    }

    /// Request value, then configured default, then [`DEFAULT_LOG_LOCATION`].
    pub fn resolve_log_location(&self, requested: Option<&str>) -> String {
        requested
            .filter(|s| !s.trim().is_empty())
            .or(self
                .default_log_location
                .as_deref()
                .filter(|s| !s.trim().is_empty()))
            .unwrap_or(DEFAULT_LOG_LOCATION)
            .to_string()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn item_timeout(&self) -> Option<Duration> {
        self.item_timeout_secs.map(Duration::from_secs)
    }

    pub fn month_names(&self) -> Result<Arc<dyn MonthNames>> {
        let months: Arc<dyn MonthNames> = match &self.month_names {
            Some(names) => Arc::new(CustomMonthNames::new(names.clone())?),
            None => Arc::new(EnglishMonthNames),
        };
        Ok(months)
    }
}
