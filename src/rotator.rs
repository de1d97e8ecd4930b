//! Daily log file rotation.
//!
//! The [`LogRotator`] is the only owner of the open log file. Every record
//! goes through [`LogRotator::write`], which rotates first whenever the
//! record's local date differs from the open file's day, so a record always
//! lands in the file named after its own date.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use tracing::{debug, info, warn};

use crate::config::LogDirectory;
use crate::record::{log_file_path, LogLine};
use crate::retention;

/// Errors that leave the recorder without a writable destination.
///
/// These are fatal: the process cannot do its job without a log file.
#[derive(Debug)]
pub enum RotateError {
    /// The log directory could not be created
    CreateDir { path: PathBuf, source: io::Error },

    /// The day's log file could not be opened for appending
    Open { path: PathBuf, source: io::Error },
}

impl std::fmt::Display for RotateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotateError::CreateDir { path, source } => {
                write!(f, "Cannot create log directory {}: {}", path.display(), source)
            }
            RotateError::Open { path, source } => {
                write!(f, "Cannot open log file {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for RotateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RotateError::CreateDir { source, .. } | RotateError::Open { source, .. } => {
                Some(source)
            }
        }
    }
}

/// Counters kept by the rotator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotatorStats {
    /// Records appended to a log file
    pub records_written: u64,

    /// Records that could not be appended
    pub write_failures: u64,

    /// Files opened, including the first one
    pub rotations: u64,

    /// Files closed
    pub closes: u64,

    /// Expired files removed by retention sweeps
    pub files_expired: u64,
}

/// The currently open day file.
#[derive(Debug)]
pub struct ActiveLogFile {
    path: PathBuf,
    day: NaiveDate,
    file: File,
}

impl ActiveLogFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }
}

/// Owns the active log file and rotates it on day change.
pub struct LogRotator {
    dir: LogDirectory,
    active: Option<ActiveLogFile>,
    echo: bool,
    stats: RotatorStats,
}

impl LogRotator {
    /// Create a rotator with no file open yet.
    ///
    /// Records are mirrored to standard output by default.
    pub fn new(dir: LogDirectory) -> Self {
        Self {
            dir,
            active: None,
            echo: true,
            stats: RotatorStats::default(),
        }
    }

    /// Create a rotator and open today's file (local time).
    ///
    /// # Errors
    ///
    /// Returns `RotateError` if the directory or file cannot be created.
    pub fn open(dir: LogDirectory) -> Result<Self, RotateError> {
        let mut rotator = Self::new(dir);
        rotator.rotate(Local::now().date_naive())?;
        Ok(rotator)
    }

    /// Enable or disable mirroring records to standard output.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Append `line` to the file for its own date, rotating first if needed.
    ///
    /// A failed append is logged and counted but not returned: only failing
    /// to open a destination is fatal.
    ///
    /// # Errors
    ///
    /// Returns `RotateError` if a required rotation cannot open the new file.
    pub fn write(&mut self, line: &LogLine) -> Result<(), RotateError> {
        let day = line.day();
        if self.active_day() != Some(day) {
            self.rotate(day)?;
        }

        let record = line.to_record();

        if self.echo {
            let mut stdout = io::stdout().lock();
            let _ = stdout.write_all(record.as_bytes());
            let _ = stdout.flush();
        }

        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };

        // One write_all per record on an O_APPEND handle
        match active.file.write_all(record.as_bytes()) {
            Ok(()) => self.stats.records_written += 1,
            Err(e) => {
                self.stats.write_failures += 1;
                warn!(file = %active.path.display(), error = %e, "Failed to append log record");
            }
        }

        Ok(())
    }

    /// Close the current file (if any), open the file for `day` and run a
    /// retention sweep that spares the new file.
    ///
    /// # Errors
    ///
    /// Returns `RotateError` if the directory or file cannot be created. The
    /// previous file is closed either way.
    pub fn rotate(&mut self, day: NaiveDate) -> Result<(), RotateError> {
        self.close();

        fs::create_dir_all(&self.dir.path).map_err(|source| RotateError::CreateDir {
            path: self.dir.path.clone(),
            source,
        })?;

        let path = log_file_path(&self.dir.path, day);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RotateError::Open {
                path: path.clone(),
                source,
            })?;

        info!(file = %path.display(), day = %day, "Opened log file");
        self.stats.rotations += 1;

        let report = retention::sweep(&self.dir, Some(&path));
        self.stats.files_expired += report.deleted.len() as u64;

        self.active = Some(ActiveLogFile { path, day, file });
        Ok(())
    }

    /// Close the active file. Returns `false` if nothing was open.
    pub fn close(&mut self) -> bool {
        match self.active.take() {
            Some(mut active) => {
                if let Err(e) = active.file.flush() {
                    warn!(file = %active.path.display(), error = %e, "Failed to flush log file");
                }
                debug!(file = %active.path.display(), "Closed log file");
                self.stats.closes += 1;
                true
            }
            None => false,
        }
    }

    /// The open file, if any.
    pub fn active(&self) -> Option<&ActiveLogFile> {
        self.active.as_ref()
    }

    /// Day of the open file, if any.
    pub fn active_day(&self) -> Option<NaiveDate> {
        self.active.as_ref().map(|a| a.day)
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn stats(&self) -> &RotatorStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, m, d, h, min, s)
            .single()
            .expect("unambiguous local time")
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rotator_in(tmp: &TempDir) -> LogRotator {
        LogRotator::new(LogDirectory::new(tmp.path().join("logs"), 7)).with_echo(false)
    }

    #[test]
    fn test_first_write_opens_file_for_its_day() {
        let tmp = TempDir::new().unwrap();
        let mut rotator = rotator_in(&tmp);
        assert!(!rotator.is_open());

        rotator
            .write(&LogLine::new(at(2024, 5, 1, 8, 30, 0), "boot ok"))
            .unwrap();

        let path = tmp.path().join("logs/runlog_20240501.log");
        assert_eq!(fs::read_to_string(&path).unwrap(), "[2024-05-01 08:30:00] boot ok\n");
        assert_eq!(rotator.active_day(), Some(day(2024, 5, 1)));
        assert_eq!(rotator.stats().rotations, 1);
    }

    #[test]
    fn test_day_change_rotates_exactly_once() {
        let tmp = TempDir::new().unwrap();
        let mut rotator = rotator_in(&tmp);
        rotator.rotate(day(2024, 5, 1)).unwrap();

        rotator
            .write(&LogLine::new(at(2024, 5, 1, 23, 59, 59), "before midnight"))
            .unwrap();
        rotator
            .write(&LogLine::new(at(2024, 5, 2, 0, 0, 0), "after midnight"))
            .unwrap();
        rotator
            .write(&LogLine::new(at(2024, 5, 2, 0, 0, 1), "still day two"))
            .unwrap();

        let logs = tmp.path().join("logs");
        assert_eq!(
            fs::read_to_string(logs.join("runlog_20240501.log")).unwrap(),
            "[2024-05-01 23:59:59] before midnight\n"
        );
        assert_eq!(
            fs::read_to_string(logs.join("runlog_20240502.log")).unwrap(),
            "[2024-05-02 00:00:00] after midnight\n[2024-05-02 00:00:01] still day two\n"
        );
        assert_eq!(rotator.stats().rotations, 2);
        assert_eq!(rotator.stats().closes, 1);
        assert_eq!(rotator.stats().records_written, 3);
    }

    #[test]
    fn test_reopen_appends_to_existing_file() {
        let tmp = TempDir::new().unwrap();
        let line = LogLine::new(at(2024, 5, 1, 9, 0, 0), "one");

        let mut first = rotator_in(&tmp);
        first.write(&line).unwrap();
        assert!(first.close());

        let mut second = rotator_in(&tmp);
        second.write(&line).unwrap();

        let text = fs::read_to_string(tmp.path().join("logs/runlog_20240501.log")).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn test_rotation_sweeps_expired_files_but_not_new_one() {
        let tmp = TempDir::new().unwrap();
        let logs = tmp.path().join("logs");
        fs::create_dir_all(&logs).unwrap();

        let now = SystemTime::now();
        let expired = logs.join("runlog_20000101.log");
        File::create(&expired)
            .unwrap()
            .set_modified(now - Duration::from_secs(30 * 86_400))
            .unwrap();

        // The day being opened also carries an old mtime
        let current = logs.join("runlog_20000102.log");
        File::create(&current)
            .unwrap()
            .set_modified(now - Duration::from_secs(30 * 86_400))
            .unwrap();

        let mut rotator = rotator_in(&tmp);
        rotator.rotate(day(2000, 1, 2)).unwrap();

        assert!(!expired.exists());
        assert!(current.exists());
        assert_eq!(rotator.stats().files_expired, 1);
    }

    #[test]
    fn test_failed_append_is_counted_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut rotator = rotator_in(&tmp);
        rotator.rotate(day(2024, 5, 1)).unwrap();

        // Swap in a read-only handle on the same file so appends fail
        let path = rotator.active().unwrap().path().to_path_buf();
        rotator.active = Some(ActiveLogFile {
            path: path.clone(),
            day: day(2024, 5, 1),
            file: File::open(&path).unwrap(),
        });

        let result = rotator.write(&LogLine::new(at(2024, 5, 1, 10, 0, 0), "lost"));

        assert!(result.is_ok());
        assert_eq!(rotator.stats().write_failures, 1);
        assert_eq!(rotator.stats().records_written, 0);
        assert_eq!(rotator.stats().rotations, 1);
        assert!(rotator.is_open());
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_close_is_reported_once() {
        let tmp = TempDir::new().unwrap();
        let mut rotator = rotator_in(&tmp);
        rotator.rotate(day(2024, 5, 1)).unwrap();

        assert!(rotator.close());
        assert!(!rotator.close());
        assert_eq!(rotator.stats().closes, 1);
        assert!(!rotator.is_open());
    }

    #[test]
    fn test_unwritable_directory_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, b"file in the way").unwrap();

        let mut rotator = LogRotator::new(LogDirectory::new(&blocker, 7)).with_echo(false);
        let err = rotator.rotate(day(2024, 5, 1)).unwrap_err();

        assert!(matches!(err, RotateError::CreateDir { .. }));
        assert!(err.to_string().contains("Cannot create log directory"));
        assert!(!rotator.is_open());
    }

    #[test]
    fn test_open_uses_today() {
        let tmp = TempDir::new().unwrap();
        let rotator = LogRotator::open(LogDirectory::new(tmp.path(), 7)).unwrap();

        assert_eq!(rotator.active_day(), Some(Local::now().date_naive()));
        assert!(rotator.active().unwrap().path().exists());
    }
}
