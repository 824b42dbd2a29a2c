// src/archive/catalog.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::core::{DAY_FORMAT, parse_day};

/// Read-only view of the dated archive tree written by the engine.
#[derive(Debug, Clone)]
pub struct ArchiveCatalog {
    root: PathBuf,
    extension: String,
}

impl ArchiveCatalog {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Day directories (`YYYY.MM.DD`), sorted. A missing root is empty.
    pub fn days(&self) -> std::io::Result<Vec<NaiveDate>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut days: Vec<NaiveDate> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str().and_then(parse_day))
            .collect();
        days.sort();
        Ok(days)
    }

    pub fn days_in_month(&self, year: i32, month: u32) -> std::io::Result<Vec<NaiveDate>> {
        use chrono::Datelike;
        Ok(self
            .days()?
            .into_iter()
            .filter(|day| day.year() == year && day.month() == month)
            .collect())
    }

    /// Archived files of one day grouped by hour (`HH`). Partial copies
    /// and foreign files are skipped; a missing day is empty.
    pub fn recordings(&self, day: NaiveDate) -> std::io::Result<BTreeMap<String, Vec<String>>> {
        let dir = self.root.join(day.format(DAY_FORMAT).to_string());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e),
        };

        let suffix = format!(".{}", self.extension.to_ascii_lowercase());
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.to_ascii_lowercase().ends_with(&suffix))
            .collect();
        names.sort();

        let mut by_hour: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in names {
            let Some(hour) = name.split('.').next().map(str::to_string) else {
                continue;
            };
            by_hour.entry(hour).or_default().push(name);
        }
        Ok(by_hour)
    }
}
