//! Lifecycle events and event handling.
//!
//! The engine and orchestrator emit events as scripts move through a batch,
//! giving observers (progress logging, tests) a view of attempts and
//! retries without touching results.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::result::ExecutionStatus;
use crate::core::types::{CommandId, InstanceId};

/// Lifecycle events emitted during a batch.
#[derive(Debug, Clone)]
pub enum Event {
    /// A script is about to be dispatched to its instances.
    ScriptStarted {
        script: String,
        instance_count: usize,
        parallel: bool,
        timestamp: Instant,
    },

    /// A command was accepted by the remote service.
    AttemptSubmitted {
        script: String,
        instance: InstanceId,
        /// 1-indexed submission number.
        attempt: u32,
        handle: CommandId,
        timestamp: Instant,
    },

    /// An attempt failed and the script is being resubmitted.
    ///
    /// `max_attempts` includes the initial attempt (retry budget + 1).
    AttemptRetrying {
        script: String,
        instance: InstanceId,
        /// The attempt that just failed.
        attempt: u32,
        max_attempts: u32,
        reason: String,
        timestamp: Instant,
    },

    /// A script reached a terminal result on one instance.
    InstanceCompleted {
        script: String,
        instance: InstanceId,
        status: ExecutionStatus,
        attempts: u32,
        duration: Duration,
        timestamp: Instant,
    },

    /// A script finished on all of its instances.
    ScriptCompleted {
        script: String,
        succeeded: usize,
        failed: usize,
        duration: Duration,
        timestamp: Instant,
    },

    /// Every script in the batch has been processed.
    BatchCompleted {
        scripts: usize,
        succeeded: usize,
        failed: usize,
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::ScriptStarted { timestamp, .. } => *timestamp,
            Event::AttemptSubmitted { timestamp, .. } => *timestamp,
            Event::AttemptRetrying { timestamp, .. } => *timestamp,
            Event::InstanceCompleted { timestamp, .. } => *timestamp,
            Event::ScriptCompleted { timestamp, .. } => *timestamp,
            Event::BatchCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Script the event belongs to, if any.
    pub fn script(&self) -> Option<&str> {
        match self {
            Event::ScriptStarted { script, .. }
            | Event::AttemptSubmitted { script, .. }
            | Event::AttemptRetrying { script, .. }
            | Event::InstanceCompleted { script, .. }
            | Event::ScriptCompleted { script, .. } => Some(script),
            Event::BatchCompleted { .. } => None,
        }
    }

    pub fn script_started(script: impl Into<String>, instance_count: usize, parallel: bool) -> Self {
        Event::ScriptStarted {
            script: script.into(),
            instance_count,
            parallel,
            timestamp: Instant::now(),
        }
    }

    pub fn attempt_submitted(
        script: impl Into<String>,
        instance: InstanceId,
        attempt: u32,
        handle: CommandId,
    ) -> Self {
        Event::AttemptSubmitted {
            script: script.into(),
            instance,
            attempt,
            handle,
            timestamp: Instant::now(),
        }
    }

    pub fn attempt_retrying(
        script: impl Into<String>,
        instance: InstanceId,
        attempt: u32,
        max_attempts: u32,
        reason: impl Into<String>,
    ) -> Self {
        Event::AttemptRetrying {
            script: script.into(),
            instance,
            attempt,
            max_attempts,
            reason: reason.into(),
            timestamp: Instant::now(),
        }
    }

    pub fn instance_completed(
        script: impl Into<String>,
        instance: InstanceId,
        status: ExecutionStatus,
        attempts: u32,
        duration: Duration,
    ) -> Self {
        Event::InstanceCompleted {
            script: script.into(),
            instance,
            status,
            attempts,
            duration,
            timestamp: Instant::now(),
        }
    }

    pub fn script_completed(
        script: impl Into<String>,
        succeeded: usize,
        failed: usize,
        duration: Duration,
    ) -> Self {
        Event::ScriptCompleted {
            script: script.into(),
            succeeded,
            failed,
            duration,
            timestamp: Instant::now(),
        }
    }

    pub fn batch_completed(scripts: usize, succeeded: usize, failed: usize, duration: Duration) -> Self {
        Event::BatchCompleted {
            scripts,
            succeeded,
            failed,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
