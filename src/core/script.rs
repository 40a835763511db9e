//! Script task definitions.
//!
//! A [`ScriptTask`] names a shell script body together with how it should
//! be dispatched: its timeout, retry policy, and concurrency mode. Values
//! left unset fall back to the batch-wide [`BatchDefaults`].

use std::time::Duration;

use super::retry::RetryPolicy;

/// Batch-wide fallbacks for settings a task leaves unset.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchDefaults {
    /// Remote timeout for tasks without their own.
    pub timeout: Duration,
    /// Worker count for parallel tasks without their own.
    pub max_parallel: usize,
}

impl BatchDefaults {
    /// Create defaults with the given timeout and worker count.
    pub fn new(timeout: Duration, max_parallel: usize) -> Self {
        Self {
            timeout,
            max_parallel: max_parallel.max(1),
        }
    }
}

impl Default for BatchDefaults {
    fn default() -> Self {
        Self::new(Duration::from_secs(600), 10)
    }
}

/// A script to run on every target instance of a batch.
///
/// Immutable once built; the orchestrator shares it across workers.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptTask {
    name: String,
    source: Option<String>,
    body: String,
    timeout: Option<Duration>,
    retry_policy: RetryPolicy,
    parallel: bool,
    max_workers: Option<usize>,
}

impl ScriptTask {
    /// Create a new builder for a script task.
    pub fn builder(name: impl Into<String>, body: impl Into<String>) -> ScriptTaskBuilder {
        ScriptTaskBuilder::new(name, body)
    }

    /// Name of the task, unique within a batch.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Where the body was loaded from, if it came from a file.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// The shell script body sent to each instance.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Task-specific timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Retry and polling policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Whether instances are processed concurrently.
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Task-specific worker count, if any.
    pub fn max_workers(&self) -> Option<usize> {
        self.max_workers
    }

    /// Timeout to submit with, falling back to the batch default.
    pub fn effective_timeout(&self, defaults: &BatchDefaults) -> Duration {
        self.timeout.unwrap_or(defaults.timeout)
    }

    /// Worker-pool size for parallel dispatch, falling back to the batch default.
    ///
    /// Never less than one.
    pub fn effective_workers(&self, defaults: &BatchDefaults) -> usize {
        self.max_workers.unwrap_or(defaults.max_parallel).max(1)
    }
}

/// Builder for creating `ScriptTask` instances.
#[derive(Debug, Clone)]
pub struct ScriptTaskBuilder {
    name: String,
    source: Option<String>,
    body: String,
    timeout: Option<Duration>,
    retry_policy: RetryPolicy,
    parallel: bool,
    max_workers: Option<usize>,
}

impl ScriptTaskBuilder {
    /// Create a new builder with the given name and script body.
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            body: body.into(),
            timeout: None,
            retry_policy: RetryPolicy::default(),
            parallel: false,
            max_workers: None,
        }
    }

    /// Record where the body was loaded from.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set the remote execution timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Set the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Dispatch to instances concurrently.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Cap the worker pool used in parallel mode.
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    /// Build the `ScriptTask`.
    pub fn build(self) -> ScriptTask {
        ScriptTask {
            name: self.name,
            source: self.source,
            body: self.body,
            timeout: self.timeout,
            retry_policy: self.retry_policy,
            parallel: self.parallel,
            max_workers: self.max_workers,
        }
    }
}
