//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for a batch: execution
//! defaults, transport, target instances and the ordered script list.

mod builder;
mod error;
mod yaml;

pub use builder::{BatchPlan, BatchPlanBuilder, load_batch_plan};
pub use error::ConfigError;
pub use yaml::{BatchConfig, ExecutionConfig, InstancesConfig, ScriptConfig, YamlLoader};
