use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};

/// Directory name of one archive day, e.g. `2024.03.09`.
pub const DAY_FORMAT: &str = "%Y.%m.%d";
/// File stem of one archive entry, e.g. `17.04.59`.
pub const TIME_FORMAT: &str = "%H.%M.%S";
/// Timestamp shown to trigger callers, e.g. `2024.03.09:17.04.59`.
pub const EVENT_FORMAT: &str = "%Y.%m.%d:%H.%M.%S";

pub fn now_local() -> DateTime<Local> {
    Local::now()
}

pub fn day_dir_name(stamp: &DateTime<Local>) -> String {
    stamp.format(DAY_FORMAT).to_string()
}

pub fn entry_file_name(stamp: &DateTime<Local>, extension: &str) -> String {
    format!("{}.{}", stamp.format(TIME_FORMAT), extension)
}

pub fn format_event_time(stamp: &DateTime<Local>) -> String {
    stamp.format(EVENT_FORMAT).to_string()
}

/// `<root>/<YYYY.MM.DD>/<HH.MM.SS>.<ext>`
pub fn archive_entry_path(root: &Path, stamp: &DateTime<Local>, extension: &str) -> PathBuf {
    root.join(day_dir_name(stamp))
        .join(entry_file_name(stamp, extension))
}

pub fn parse_day(name: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(name, DAY_FORMAT).ok()
}
