//! Fan-out of one script across its target instances.
//!
//! The `FanOutScheduler` runs the retry-poll engine once per instance,
//! either one instance at a time or through a worker pool bounded by the
//! task's worker count. Every instance ends up with exactly one result,
//! even when its worker crashes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tracing::{Instrument, debug, error, info_span};

use crate::core::result::{ExecutionResult, InstanceResults};
use crate::core::script::{BatchDefaults, ScriptTask};
use crate::core::types::InstanceId;

use super::engine::RetryPollEngine;

/// Runs a script on each target instance.
pub struct FanOutScheduler {
    engine: Arc<RetryPollEngine>,
    defaults: BatchDefaults,
}

impl FanOutScheduler {
    /// Create a scheduler around `engine` with batch-wide fallbacks.
    pub fn new(engine: Arc<RetryPollEngine>, defaults: BatchDefaults) -> Self {
        Self { engine, defaults }
    }

    /// Batch-wide fallbacks in effect.
    pub fn defaults(&self) -> &BatchDefaults {
        &self.defaults
    }

    /// Run `task` on every instance and collect one result per instance.
    ///
    /// Repeated instance ids are dispatched once.
    pub async fn run(&self, task: Arc<ScriptTask>, instances: &[InstanceId]) -> InstanceResults {
        let mut seen = HashSet::new();
        let targets: Vec<InstanceId> = instances
            .iter()
            .filter(|instance| seen.insert(*instance))
            .cloned()
            .collect();

        if task.is_parallel() {
            self.run_concurrent(task, targets).await
        } else {
            self.run_sequential(&task, targets).await
        }
    }

    async fn run_sequential(&self, task: &ScriptTask, targets: Vec<InstanceId>) -> InstanceResults {
        let timeout = task.effective_timeout(&self.defaults);
        debug!(script = %task.name(), instances = targets.len(), "dispatching sequentially");

        let mut results = HashMap::with_capacity(targets.len());
        for instance in targets {
            let result = self.engine.run(task, &instance, timeout).await;
            results.insert(instance, result);
        }
        results
    }

    async fn run_concurrent(&self, task: Arc<ScriptTask>, targets: Vec<InstanceId>) -> InstanceResults {
        let timeout = task.effective_timeout(&self.defaults);
        let workers = task.effective_workers(&self.defaults);
        debug!(
            script = %task.name(),
            instances = targets.len(),
            workers,
            "dispatching to worker pool"
        );

        // Pool lives for this call only; dropped once every worker is joined.
        let semaphore = Arc::new(Semaphore::new(workers));
        let results: Arc<RwLock<InstanceResults>> =
            Arc::new(RwLock::new(HashMap::with_capacity(targets.len())));

        let mut handles = Vec::with_capacity(targets.len());
        for instance in targets {
            let engine = Arc::clone(&self.engine);
            let task = Arc::clone(&task);
            let semaphore = Arc::clone(&semaphore);
            let results_clone = Arc::clone(&results);
            let worker_instance = instance.clone();

            let span = info_span!(
                "instance_dispatch",
                script = %task.name(),
                instance = %instance,
            );

            let handle = tokio::spawn(
                async move {
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => engine.run(&task, &worker_instance, timeout).await,
                        Err(e) => ExecutionResult::failure("", format!("worker pool closed: {}", e), 0),
                    };
                    results_clone.write().await.insert(worker_instance, result);
                }
                .instrument(span),
            );
            handles.push((instance, handle));
        }

        let mut crashed = Vec::new();
        for (instance, handle) in handles {
            if let Err(e) = handle.await {
                error!(script = %task.name(), instance = %instance, error = %e, "worker crashed");
                crashed.push((instance, e.to_string()));
            }
        }

        let mut results = std::mem::take(&mut *results.write().await);
        for (instance, message) in crashed {
            results
                .entry(instance)
                .or_insert_with(|| ExecutionResult::failure("", format!("worker crashed: {}", message), 0));
        }
        results
    }
}
