//! Batch plan builder from YAML configuration.
//!
//! Converts a [`BatchConfig`] into runnable [`ScriptTask`]s, reading each
//! script body from disk relative to the configuration file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{PlatformKind, StaticInventory, Transport};
use crate::core::retry::RetryPolicy;
use crate::core::script::{BatchDefaults, ScriptTask};
use crate::core::types::InstanceId;

use super::error::ConfigError;
use super::yaml::{BatchConfig, ExecutionConfig, ScriptConfig, YamlLoader};

/// Everything needed to run a batch.
#[derive(Debug, Clone)]
pub struct BatchPlan {
    /// Scripts in execution order.
    pub tasks: Vec<ScriptTask>,
    /// Batch-wide fallbacks.
    pub defaults: BatchDefaults,
    /// Configured target instances, before eligibility filtering.
    pub instances: Vec<InstanceId>,
    /// Managed set and platforms from the configuration.
    pub inventory: StaticInventory,
    /// How scripts reach the instances.
    pub transport: Transport,
    /// Where the JSON report goes, if anywhere.
    pub output_dir: Option<PathBuf>,
    /// Exit non-zero when any script fails.
    pub fail_on_script_failure: bool,
}

/// Builder for creating a [`BatchPlan`] from configuration.
pub struct BatchPlanBuilder;

impl BatchPlanBuilder {
    /// Build a plan from `config`. Script sources resolve against `base_dir`.
    pub fn build(config: BatchConfig, base_dir: &Path) -> Result<BatchPlan, ConfigError> {
        let execution = &config.execution;
        let defaults = BatchDefaults::new(
            Duration::from_secs(execution.default_timeout),
            execution.max_parallel,
        );

        let tasks = config
            .scripts
            .iter()
            .map(|script| Self::build_task(script, execution, &defaults, base_dir))
            .collect::<Result<Vec<_>, _>>()?;

        let instances = config.instances.ids.iter().map(InstanceId::new).collect();

        let mut inventory = StaticInventory::new();
        if let Some(managed) = &config.instances.managed {
            inventory = inventory.with_managed(managed.iter().map(InstanceId::new));
        }
        for (instance, platform) in &config.instances.platforms {
            inventory = inventory.with_platform(
                InstanceId::new(instance),
                PlatformKind::from_platform_name(platform),
            );
        }

        Ok(BatchPlan {
            tasks,
            defaults,
            instances,
            inventory,
            transport: config.transport,
            output_dir: config.execution.output_dir.as_ref().map(PathBuf::from),
            fail_on_script_failure: config.execution.fail_on_script_failure,
        })
    }

    fn build_task(
        config: &ScriptConfig,
        execution: &ExecutionConfig,
        defaults: &BatchDefaults,
        base_dir: &Path,
    ) -> Result<ScriptTask, ConfigError> {
        let source = config.source_path();
        let body = match (source, &config.inline) {
            (Some(source), _) => {
                let path = base_dir.join(source);
                std::fs::read_to_string(&path).map_err(|source| ConfigError::ScriptReadError {
                    name: config.name.clone(),
                    path,
                    source,
                })?
            }
            (None, Some(inline)) => inline.clone(),
            (None, None) => return Err(ConfigError::MissingField(format!("{}.source", config.name))),
        };

        let mut builder = ScriptTask::builder(&config.name, body)
            .retry_policy(Self::build_retry_policy(config, execution, defaults))
            .parallel(config.parallel_execution);

        if let Some(source) = source {
            builder = builder.source(source);
        }
        if let Some(secs) = config.timeout {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(workers) = config.max_parallel {
            builder = builder.max_workers(workers);
        }

        Ok(builder.build())
    }

    /// Retry policy for one script.
    ///
    /// Without an explicit `attempt_deadline`, an attempt may stay pending
    /// for the submission timeout plus two poll intervals.
    fn build_retry_policy(
        config: &ScriptConfig,
        execution: &ExecutionConfig,
        defaults: &BatchDefaults,
    ) -> RetryPolicy {
        let poll_interval = Duration::from_secs(execution.poll_interval);
        let deadline = match execution.attempt_deadline {
            Some(secs) => Duration::from_secs(secs),
            None => {
                let timeout = config
                    .timeout
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.timeout);
                timeout + poll_interval * 2
            }
        };
        RetryPolicy::fixed(config.retry_count, poll_interval).with_deadline(deadline)
    }
}

/// Load, validate and build the batch plan at `path`.
pub fn load_batch_plan(path: impl AsRef<Path>) -> Result<BatchPlan, ConfigError> {
    let path = path.as_ref();
    let config = YamlLoader::load_batch_config(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    BatchPlanBuilder::build(config, base_dir)
}
