//! Per-run log file.
//!
//! When a batch has an output directory, every log line of the run is also
//! written to `fleetrun_YYYYmmdd_HHMMSS.log` there, next to the JSON report.

use chrono::{DateTime, Utc};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

use super::ReportError;

/// Log file for one run.
///
/// Lines are written from a background worker; dropping the `RunLog`
/// flushes whatever is still queued.
pub struct RunLog {
    path: PathBuf,
    writer: NonBlocking,
    _guard: WorkerGuard,
}

impl RunLog {
    /// Create the log file in `dir`, creating the directory if needed.
    pub fn create(dir: &Path) -> Result<Self, ReportError> {
        Self::create_at(dir, Utc::now())
    }

    fn create_at(dir: &Path, started: DateTime<Utc>) -> Result<Self, ReportError> {
        std::fs::create_dir_all(dir).map_err(|source| ReportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(file_name(started));
        let file = File::create(&path).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        Ok(Self {
            path,
            writer,
            _guard: guard,
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writer for a `tracing_subscriber::fmt` layer.
    pub fn writer(&self) -> NonBlocking {
        self.writer.clone()
    }
}

fn file_name(started: DateTime<Utc>) -> String {
    format!("fleetrun_{}.log", started.format("%Y%m%d_%H%M%S"))
}
