//! Script execution engine.
//!
//! This module provides the orchestration layers that take a batch of
//! scripts to a [`BatchResult`](crate::core::result::BatchResult):
//! the per-instance retry-poll engine, the per-script fan-out scheduler,
//! and the batch orchestrator that runs scripts in order.

mod batch;
mod engine;
mod fanout;

pub use batch::BatchOrchestrator;
pub use engine::{MAX_RETRIES_EXCEEDED, RetryPollEngine};
pub use fanout::FanOutScheduler;
