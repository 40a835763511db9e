//! Execution outcomes.
//!
//! [`ExecutionResult`] is the terminal outcome of one script on one
//! instance; [`BatchResult`] collects them per script, in configured order.

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use super::types::{CommandId, InstanceId};

/// Terminal status of a script on one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Success => write!(f, "Success"),
            ExecutionStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Terminal outcome for one (script, instance) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the script succeeded.
    pub status: ExecutionStatus,
    /// Captured standard output, possibly empty.
    pub output: String,
    /// Captured standard error or a diagnostic message.
    pub error: String,
    /// Submissions actually made (1 = first try, 2+ = retries).
    pub attempts: u32,
}

impl ExecutionResult {
    /// Create a successful result.
    pub fn success(output: impl Into<String>, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output: output.into(),
            error: error.into(),
            attempts,
        }
    }

    /// Create a failed result.
    pub fn failure(output: impl Into<String>, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            output: output.into(),
            error: error.into(),
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// How a single submit-and-poll cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    /// The remote command reported failure.
    Failed,
    /// The attempt stayed pending past its deadline.
    DeadlineExceeded,
}

/// Record of one submit-and-poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionAttempt {
    /// Handle returned by the submission.
    pub handle: CommandId,
    /// 1-based, increments with every resubmission.
    pub sequence: u32,
    /// Set once the attempt is terminal.
    pub outcome: Option<AttemptOutcome>,
}

impl ExecutionAttempt {
    pub fn new(handle: CommandId, sequence: u32) -> Self {
        Self {
            handle,
            sequence,
            outcome: None,
        }
    }

    pub fn finish(&mut self, outcome: AttemptOutcome) {
        self.outcome = Some(outcome);
    }
}

/// Results of one script across its target instances.
pub type InstanceResults = HashMap<InstanceId, ExecutionResult>;

/// Results of every script in a batch.
///
/// Scripts keep the order they were configured in. Instance order within a
/// script carries no meaning; serialization sorts instances by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    scripts: Vec<(String, InstanceResults)>,
}

impl BatchResult {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, script: impl Into<String>, results: InstanceResults) {
        self.scripts.push((script.into(), results));
    }

    /// Results for a script, if it ran.
    pub fn get(&self, script: &str) -> Option<&InstanceResults> {
        self.scripts
            .iter()
            .find(|(name, _)| name == script)
            .map(|(_, results)| results)
    }

    /// Script names in configured order.
    pub fn script_names(&self) -> Vec<&str> {
        self.scripts.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Iterate scripts and their per-instance results in configured order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InstanceResults)> {
        self.scripts
            .iter()
            .map(|(name, results)| (name.as_str(), results))
    }

    /// Number of scripts recorded.
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Number of successful (script, instance) pairs.
    pub fn success_count(&self) -> usize {
        self.scripts
            .iter()
            .flat_map(|(_, results)| results.values())
            .filter(|r| r.is_success())
            .count()
    }

    /// Number of failed (script, instance) pairs.
    pub fn failure_count(&self) -> usize {
        self.scripts
            .iter()
            .flat_map(|(_, results)| results.values())
            .filter(|r| !r.is_success())
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }
}

impl FromIterator<(String, InstanceResults)> for BatchResult {
    fn from_iter<I: IntoIterator<Item = (String, InstanceResults)>>(iter: I) -> Self {
        Self {
            scripts: iter.into_iter().collect(),
        }
    }
}

impl Serialize for BatchResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.scripts.len()))?;
        for (name, results) in &self.scripts {
            let sorted: BTreeMap<&InstanceId, &ExecutionResult> = results.iter().collect();
            map.serialize_entry(name, &sorted)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(entries: &[(&str, ExecutionResult)]) -> InstanceResults {
        entries
            .iter()
            .map(|(id, r)| (InstanceId::new(*id), r.clone()))
            .collect()
    }

    #[test]
    fn test_result_constructors() {
        let ok = ExecutionResult::success("done\n", "", 1);
        let failed = ExecutionResult::failure("", "exit 2", 3);

        assert!(ok.is_success());
        assert_eq!(ok.attempts, 1);
        assert!(!failed.is_success());
        assert_eq!(failed.error, "exit 2");
    }

    #[test]
    fn test_attempt_records_outcome() {
        let mut attempt = ExecutionAttempt::new(CommandId::new(), 1);
        assert!(attempt.outcome.is_none());

        attempt.finish(AttemptOutcome::Failed);
        assert_eq!(attempt.outcome, Some(AttemptOutcome::Failed));
    }

    #[test]
    fn test_batch_result_keeps_script_order() {
        let mut batch = BatchResult::new();
        batch.record("zeta", InstanceResults::new());
        batch.record("alpha", InstanceResults::new());

        assert_eq!(batch.script_names(), vec!["zeta", "alpha"]);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_batch_result_counts() {
        let batch: BatchResult = vec![(
            "patch".to_string(),
            results(&[
                ("i-1", ExecutionResult::success("ok", "", 1)),
                ("i-2", ExecutionResult::failure("", "boom", 2)),
            ]),
        )]
        .into_iter()
        .collect();

        assert_eq!(batch.success_count(), 1);
        assert_eq!(batch.failure_count(), 1);
        assert!(batch.has_failures());
        assert!(batch.get("patch").is_some());
        assert!(batch.get("missing").is_none());
    }

    #[test]
    fn test_batch_result_serializes_in_script_order() {
        let batch: BatchResult = vec![
            (
                "second".to_string(),
                results(&[("i-1", ExecutionResult::success("x", "", 1))]),
            ),
            (
                "first".to_string(),
                results(&[("i-1", ExecutionResult::failure("", "e", 1))]),
            ),
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_string(&batch).unwrap();
        let second = json.find("\"second\"").unwrap();
        let first = json.find("\"first\"").unwrap();
        assert!(second < first);
        assert!(json.contains("\"status\":\"Success\""));
        assert!(json.contains("\"status\":\"Failed\""));
    }
}
