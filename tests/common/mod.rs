//! Common test utilities shared across integration tests.

use async_trait::async_trait;
use fleetrun::{Event, EventHandler, InstanceId, RetryPolicy, ScriptTask};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Poll interval used by tests that drive the engine directly.
pub const FAST_POLL: Duration = Duration::from_millis(5);

/// Build instance ids from string literals.
pub fn ids(raw: &[&str]) -> Vec<InstanceId> {
    raw.iter().map(|s| InstanceId::new(*s)).collect()
}

/// Script task with a fast poll interval.
pub fn script(name: &str, body: &str, retries: u32, parallel: bool) -> ScriptTask {
    ScriptTask::builder(name, body)
        .retry_policy(RetryPolicy::fixed(retries, FAST_POLL))
        .parallel(parallel)
        .build()
}

/// Event handler that records everything it sees.
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Number of recorded events matching `pred`.
    pub async fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().await.iter().filter(|e| pred(e)).count()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
