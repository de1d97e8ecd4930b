//! Timestamped log lines and their on-disk text forms.
//!
//! A [`LogLine`] lives only between the moment a line is read off the socket
//! and the moment it is appended to the day's log file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};

/// Prefix shared by every log file the recorder owns.
pub const LOG_FILE_PREFIX: &str = "runlog_";

/// Extension shared by every log file the recorder owns.
pub const LOG_FILE_SUFFIX: &str = ".log";

const FILE_DATE_FORMAT: &str = "%Y%m%d";
const RECORD_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single received line, stamped with the local time it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Moment the line was taken off the stream
    pub timestamp: DateTime<Local>,

    /// Line text, without the trailing CR/LF
    pub text: String,
}

impl LogLine {
    /// Create a log line with an explicit timestamp.
    pub fn new(timestamp: DateTime<Local>, text: impl Into<String>) -> Self {
        Self {
            timestamp,
            text: text.into(),
        }
    }

    /// Stamp `text` with the current local time.
    pub fn now(text: impl Into<String>) -> Self {
        Self::new(Local::now(), text)
    }

    /// Calendar day (local time) the line belongs to.
    pub fn day(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Render the `[YYYY-MM-DD HH:MM:SS] text\n` record.
    pub fn to_record(&self) -> String {
        format!(
            "[{}] {}\n",
            self.timestamp.format(RECORD_TIME_FORMAT),
            self.text
        )
    }
}

/// File name for `day`, e.g. `runlog_20240131.log`.
pub fn log_file_name(day: NaiveDate) -> String {
    format!(
        "{}{}{}",
        LOG_FILE_PREFIX,
        day.format(FILE_DATE_FORMAT),
        LOG_FILE_SUFFIX
    )
}

/// Full path of the log file for `day` inside `dir`.
pub fn log_file_path(dir: &Path, day: NaiveDate) -> PathBuf {
    dir.join(log_file_name(day))
}

/// Whether `name` follows the `runlog_<YYYYMMDD>.log` pattern.
///
/// Only files matching this are ever considered by the retention sweep.
pub fn is_log_file_name(name: &str) -> bool {
    name.strip_prefix(LOG_FILE_PREFIX)
        .and_then(|rest| rest.strip_suffix(LOG_FILE_SUFFIX))
        .map(|date| {
            date.len() == 8
                && date.bytes().all(|b| b.is_ascii_digit())
                && NaiveDate::parse_from_str(date, FILE_DATE_FORMAT).is_ok()
        })
        .unwrap_or(false)
}
