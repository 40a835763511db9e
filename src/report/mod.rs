//! Batch result reporting.
//!
//! A finished [`BatchResult`] is rendered twice: as structured log lines,
//! one per (script, instance) pair, and as a JSON document written to the
//! configured output directory. The same directory receives the run's log
//! file (see [`RunLog`]).
//!
//! Exit codes for the CLI are decided here as well.

mod run_log;

pub use run_log::RunLog;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

use crate::client::{ExcludedInstance, Inventory, TargetResolution, resolve_targets};
use crate::core::result::BatchResult;
use crate::core::types::InstanceId;

/// Exit code when no configured instance could be targeted.
pub const EXIT_NO_TARGETS: i32 = 1;

/// Exit code when scripts failed and the run asked to fail on them.
pub const EXIT_SCRIPT_FAILURES: i32 = 2;

/// Exit code when the configuration could not be loaded.
pub const EXIT_CONFIG_ERROR: i32 = 3;

/// Errors that can occur when writing a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to create the output directory or write the file.
    #[error("failed to write report '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize the report.
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Log every (script, instance) outcome of a batch.
///
/// Successes log at info with their output; failures log at error with
/// the captured error text.
pub fn log_batch_result(batch: &BatchResult) {
    for (script, results) in batch.iter() {
        info!(script = %script, instances = results.len(), "script results");
        let sorted: BTreeMap<&InstanceId, _> = results.iter().collect();
        for (instance, result) in sorted {
            if result.is_success() {
                info!(
                    script = %script,
                    instance = %instance,
                    status = %result.status,
                    attempts = result.attempts,
                    "execution succeeded"
                );
                for line in result.output.trim().lines() {
                    info!(script = %script, instance = %instance, "  stdout: {}", line);
                }
            } else {
                error!(
                    script = %script,
                    instance = %instance,
                    status = %result.status,
                    attempts = result.attempts,
                    error = %result.error.trim(),
                    "execution failed"
                );
            }
        }
    }
}

/// Totals over a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub scripts: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub excluded: usize,
}

/// JSON report document for a finished batch.
#[derive(Debug, Serialize)]
pub struct BatchReport<'a> {
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub excluded: &'a [ExcludedInstance],
    pub results: &'a BatchResult,
}

impl<'a> BatchReport<'a> {
    /// Build a report stamped with the current time.
    pub fn new(results: &'a BatchResult, excluded: &'a [ExcludedInstance]) -> Self {
        Self {
            generated_at: Utc::now(),
            summary: ReportSummary {
                scripts: results.len(),
                succeeded: results.success_count(),
                failed: results.failure_count(),
                excluded: excluded.len(),
            },
            excluded,
            results,
        }
    }

    /// File name the report is written under, e.g. `fleetrun_20240101_120000.json`.
    pub fn file_name(&self) -> String {
        format!("fleetrun_{}.json", self.generated_at.format("%Y%m%d_%H%M%S"))
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report into `dir`, creating it if needed.
    pub fn write_json(&self, dir: &Path) -> Result<PathBuf, ReportError> {
        std::fs::create_dir_all(dir).map_err(|source| ReportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(self.file_name());
        std::fs::write(&path, self.to_json()?).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "wrote batch report");
        Ok(path)
    }
}

/// Resolve the targets of a batch.
///
/// Fails with [`EXIT_NO_TARGETS`] when no instance is left to run on.
pub async fn require_targets(
    inventory: &dyn Inventory,
    instances: &[InstanceId],
) -> Result<TargetResolution, i32> {
    let targets = resolve_targets(inventory, instances).await;
    if targets.is_empty() {
        error!(
            configured = instances.len(),
            excluded = targets.excluded.len(),
            "no target instances resolved"
        );
        return Err(EXIT_NO_TARGETS);
    }
    Ok(targets)
}

/// Process exit code for a finished batch.
pub fn exit_code(batch: &BatchResult, fail_on_script_failure: bool) -> i32 {
    if fail_on_script_failure && batch.has_failures() {
        EXIT_SCRIPT_FAILURES
    } else {
        0
    }
}
