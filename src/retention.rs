//! Age-based cleanup of old log files.
//!
//! Deletion is best effort on purpose: a file that cannot be stat'ed or
//! removed is skipped and the sweep carries on with the next one. Nothing in
//! here returns an error to the caller.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::config::LogDirectory;
use crate::record::is_log_file_name;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Files removed by this sweep
    pub deleted: Vec<PathBuf>,

    /// Matching files that were old enough but could not be removed
    pub failed: usize,
}

/// Sweep `dir` against the current time.
pub fn sweep(dir: &LogDirectory, active: Option<&Path>) -> SweepReport {
    sweep_at(dir, active, SystemTime::now())
}

/// Delete every `runlog_<YYYYMMDD>.log` file in `dir` last modified strictly
/// before `now - retention_days`.
///
/// `active` is never deleted, whatever its timestamp says. Files not matching
/// the log file pattern are never touched.
pub fn sweep_at(dir: &LogDirectory, active: Option<&Path>, now: SystemTime) -> SweepReport {
    sweep_with(dir, active, now, |path| fs::remove_file(path))
}

fn sweep_with<F>(
    dir: &LogDirectory,
    active: Option<&Path>,
    now: SystemTime,
    mut remove: F,
) -> SweepReport
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut report = SweepReport::default();

    let retention = Duration::from_secs(u64::from(dir.retention_days) * SECS_PER_DAY);
    let Some(cutoff) = now.checked_sub(retention) else {
        return report;
    };

    let entries = match fs::read_dir(&dir.path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.path.display(), error = %e, "Cannot list log directory for retention sweep");
            return report;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();

        let matches = entry
            .file_name()
            .to_str()
            .map(is_log_file_name)
            .unwrap_or(false);
        if !matches || active == Some(path.as_path()) {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| {
            if m.is_file() {
                m.modified()
            } else {
                Err(io::Error::other("not a regular file"))
            }
        }) {
            Ok(modified) => modified,
            Err(e) => {
                debug!(file = %path.display(), error = %e, "Skipping file in retention sweep");
                continue;
            }
        };

        if modified >= cutoff {
            continue;
        }

        match remove(&path) {
            Ok(()) => {
                info!(file = %path.display(), "Deleted expired log file");
                report.deleted.push(path);
            }
            Err(e) => {
                debug!(file = %path.display(), error = %e, "Could not delete expired log file");
                report.failed += 1;
            }
        }
    }

    report
}
