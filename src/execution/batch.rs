//! Batch orchestration.
//!
//! The `BatchOrchestrator` runs every configured script, in order, against
//! the same set of instances and assembles the [`BatchResult`]. A script
//! failing on some or all instances never stops the scripts after it.

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::client::CommandClient;
use crate::core::result::BatchResult;
use crate::core::script::{BatchDefaults, ScriptTask};
use crate::core::types::InstanceId;
use crate::events::{Event, EventBus};

use super::engine::RetryPollEngine;
use super::fanout::FanOutScheduler;

/// Top-level driver for a batch of scripts.
pub struct BatchOrchestrator {
    client: Arc<dyn CommandClient>,
    scheduler: FanOutScheduler,
    event_bus: Option<Arc<EventBus>>,
}

impl BatchOrchestrator {
    /// Create an orchestrator dispatching through `client`.
    pub fn new(client: Arc<dyn CommandClient>, defaults: BatchDefaults) -> Self {
        let engine = Arc::new(RetryPollEngine::new(Arc::clone(&client)));
        Self {
            client,
            scheduler: FanOutScheduler::new(engine, defaults),
            event_bus: None,
        }
    }

    /// Emit lifecycle events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        let engine = Arc::new(
            RetryPollEngine::new(Arc::clone(&self.client)).with_event_bus(Arc::clone(&bus)),
        );
        self.scheduler = FanOutScheduler::new(engine, self.scheduler.defaults().clone());
        self.event_bus = Some(bus);
        self
    }

    /// Batch-wide fallbacks in effect.
    pub fn defaults(&self) -> &BatchDefaults {
        self.scheduler.defaults()
    }

    /// Run every task on every instance, strictly one task after another.
    pub async fn run(&self, tasks: &[ScriptTask], instances: &[InstanceId]) -> BatchResult {
        let start = Instant::now();
        let mut batch = BatchResult::new();

        info!(
            scripts = tasks.len(),
            instances = instances.len(),
            "starting batch"
        );

        for task in tasks {
            let task_start = Instant::now();
            info!(script = %task.name(), parallel = task.is_parallel(), "executing script");
            self.emit(Event::script_started(
                task.name(),
                instances.len(),
                task.is_parallel(),
            ))
            .await;

            let results = self
                .scheduler
                .run(Arc::new(task.clone()), instances)
                .await;

            let succeeded = results.values().filter(|r| r.is_success()).count();
            let failed = results.len() - succeeded;
            if failed > 0 {
                warn!(script = %task.name(), succeeded, failed, "script failed on some instances");
            } else {
                info!(script = %task.name(), succeeded, "script succeeded on all instances");
            }
            self.emit(Event::script_completed(
                task.name(),
                succeeded,
                failed,
                task_start.elapsed(),
            ))
            .await;

            batch.record(task.name(), results);
        }

        info!(
            scripts = batch.len(),
            succeeded = batch.success_count(),
            failed = batch.failure_count(),
            duration_ms = %start.elapsed().as_millis(),
            "batch completed"
        );
        self.emit(Event::batch_completed(
            batch.len(),
            batch.success_count(),
            batch.failure_count(),
            start.elapsed(),
        ))
        .await;

        batch
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }
}
