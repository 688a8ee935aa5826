use time::{Month, OffsetDateTime};

use crate::mediasort_core::error::{MediasortError, Result};
use crate::mediasort_core::naming::sanitize_file_name;

/// Supplies the display name of a month for the `MM - Name` folders.
pub trait MonthNames: Send + Sync {
    fn month_name(&self, month: Month) -> String;
}

/// English month names.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnglishMonthNames;

impl MonthNames for EnglishMonthNames {
    fn month_name(&self, month: Month) -> String {
        month.to_string()
    }
}

/// Month names taken from configuration, January first.
#[derive(Debug, Clone)]
pub struct CustomMonthNames {
    names: [String; 12],
}

impl CustomMonthNames {
    pub fn new(names: Vec<String>) -> Result<Self> {
        let count = names.len();
        let names: [String; 12] = names.try_into().map_err(|_| {
            MediasortError::Config(format!("month_names needs 12 entries, got {}", count))
        })?;
        if let Some(blank) = names.iter().position(|n| n.trim().is_empty()) {
            return Err(MediasortError::Config(format!(
                "month_names entry {} is empty",
                blank + 1
            )));
        }
        // Each name becomes one folder segment.
        if let Some(bad) = names.iter().find(|n| sanitize_file_name(n) != n.as_str()) {
            return Err(MediasortError::Config(format!(
                "month_names entry '{}' is not a valid folder name",
                bad
            )));
        }
        Ok(Self { names })
    }
}

impl MonthNames for CustomMonthNames {
    fn month_name(&self, month: Month) -> String {
        self.names[usize::from(u8::from(month)) - 1].clone()
    }
}

/// Destination folder pair for one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderPlan {
    pub year: String,
    pub month_folder: String,
}

impl FolderPlan {
    /// `"{year}/{month_folder}"`, the form used for both directories and blob prefixes.
    pub fn prefix(&self) -> String {
        format!("{}/{}", self.year, self.month_folder)
    }
}

/// Where a successfully processed item ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPlan {
    pub directory_or_prefix: String,
    pub final_name: String,
}

/// Plan the `Year/MM - MonthName` folder for an instant, in the instant's own offset.
pub fn plan(instant: &OffsetDateTime, months: &dyn MonthNames) -> FolderPlan {
    let month = instant.month();
    FolderPlan {
        year: format!("{:04}", instant.year()),
        month_folder: format!("{:02} - {}", u8::from(month), months.month_name(month)),
    }
}
