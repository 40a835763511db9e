//! fleetrun - run shell scripts across a fleet of instances.
//!
//! A batch is an ordered list of scripts dispatched to a set of target
//! instances. Each script runs on every instance, sequentially or through a
//! bounded worker pool; every (script, instance) pair is driven to a
//! terminal result by polling, with bounded resubmission on failure.
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetrun::{BatchOrchestrator, ProcessClient, load_batch_plan, resolve_targets};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let plan = load_batch_plan("fleetrun.yaml")?;
//! let targets = resolve_targets(&plan.inventory, &plan.instances).await;
//! let client = Arc::new(ProcessClient::new(plan.transport.clone()));
//! let batch = BatchOrchestrator::new(client, plan.defaults.clone())
//!     .run(&plan.tasks, &targets.eligible)
//!     .await;
//! println!("{} failures", batch.failure_count());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod report;
pub mod testing;

pub use client::{
    CommandClient, CommandInvocation, CommandStatus, ExcludedInstance, Inventory, PlatformKind,
    PollError, ProcessClient, StaticInventory, SubmissionError, TargetResolution, Transport,
    resolve_targets,
};
pub use config::{BatchConfig, BatchPlan, ConfigError, YamlLoader, load_batch_plan};
pub use core::result::{
    AttemptOutcome, BatchResult, ExecutionAttempt, ExecutionResult, ExecutionStatus,
    InstanceResults,
};
pub use core::retry::RetryPolicy;
pub use core::script::{BatchDefaults, ScriptTask, ScriptTaskBuilder};
pub use core::types::{CommandId, InstanceId};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{BatchOrchestrator, FanOutScheduler, MAX_RETRIES_EXCEEDED, RetryPollEngine};
pub use report::{BatchReport, ReportError, RunLog, log_batch_result, require_targets};
