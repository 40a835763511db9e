//! YAML configuration parsing.
//!
//! Parses a batch definition (execution defaults, transport, target
//! instances and the ordered script list) from YAML.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use super::error::ConfigError;
use crate::client::Transport;

/// Top-level batch configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Batch-wide execution settings.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// How scripts reach the instances.
    #[serde(default)]
    pub transport: Transport,
    /// Target instances.
    #[serde(default)]
    pub instances: InstancesConfig,
    /// Scripts, in execution order.
    pub scripts: Vec<ScriptConfig>,
}

/// Batch-wide execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Default per-submission timeout in seconds.
    pub default_timeout: u64,
    /// Default worker count for parallel scripts.
    pub max_parallel: usize,
    /// Seconds between status polls.
    pub poll_interval: u64,
    /// Seconds one attempt may stay pending before it counts as failed.
    pub attempt_deadline: Option<u64>,
    /// Directory the JSON report is written to.
    pub output_dir: Option<String>,
    /// Exit non-zero when any script fails on any instance.
    pub fail_on_script_failure: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout: 600,
            max_parallel: 10,
            poll_interval: 5,
            attempt_deadline: None,
            output_dir: None,
            fail_on_script_failure: false,
        }
    }
}

/// Target instance configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstancesConfig {
    /// Instance ids to run against.
    pub ids: Vec<String>,
    /// Instances with a confirmed agent. Absent means all of `ids`.
    pub managed: Option<Vec<String>>,
    /// Platform name per instance, e.g. `amazon-linux`.
    pub platforms: HashMap<String, String>,
}

/// One script entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    /// Script name, unique within the batch.
    pub name: String,
    /// Path of the script file, relative to the configuration file.
    /// Defaults to `name`.
    pub source: Option<String>,
    /// Inline script body, used instead of a file.
    pub inline: Option<String>,
    /// Per-submission timeout in seconds.
    pub timeout: Option<u64>,
    /// Resubmissions allowed after the first attempt.
    #[serde(default)]
    pub retry_count: u32,
    /// Run on all instances concurrently.
    #[serde(default)]
    pub parallel_execution: bool,
    /// Worker count when running concurrently.
    pub max_parallel: Option<usize>,
}

impl ScriptConfig {
    /// File path the body is read from, unless the script is inline.
    pub fn source_path(&self) -> Option<&str> {
        if self.inline.is_some() {
            return None;
        }
        Some(self.source.as_deref().unwrap_or(&self.name))
    }
}

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load a batch configuration from a file.
    pub fn load_batch_config(path: impl AsRef<Path>) -> Result<BatchConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: BatchConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_batch_config(&config)?;
        Ok(config)
    }

    /// Parse a batch configuration from a YAML string.
    pub fn parse_batch_config(yaml: &str) -> Result<BatchConfig, ConfigError> {
        let config: BatchConfig = serde_yaml::from_str(yaml)?;
        Self::validate_batch_config(&config)?;
        Ok(config)
    }

    fn validate_batch_config(config: &BatchConfig) -> Result<(), ConfigError> {
        Self::validate_execution(&config.execution)?;

        if config.scripts.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "batch must have at least one script".into(),
            ));
        }

        let mut names = HashSet::new();
        for (index, script) in config.scripts.iter().enumerate() {
            if script.name.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("scripts[{}].name", index)));
            }
            if !names.insert(script.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate script name: {}",
                    script.name
                )));
            }
            Self::validate_script(script)?;
        }

        if config.instances.ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ConfigError::InvalidConfig(
                "instance ids cannot be empty".into(),
            ));
        }

        Ok(())
    }

    fn validate_execution(execution: &ExecutionConfig) -> Result<(), ConfigError> {
        if execution.default_timeout == 0 {
            return Err(ConfigError::InvalidConfig(
                "execution.default_timeout must be greater than zero".into(),
            ));
        }
        if execution.max_parallel == 0 {
            return Err(ConfigError::InvalidConfig(
                "execution.max_parallel cannot be zero".into(),
            ));
        }
        if execution.poll_interval == 0 {
            return Err(ConfigError::InvalidConfig(
                "execution.poll_interval must be greater than zero".into(),
            ));
        }
        if execution.attempt_deadline == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "execution.attempt_deadline must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    fn validate_script(script: &ScriptConfig) -> Result<(), ConfigError> {
        if script.source.is_some() && script.inline.is_some() {
            return Err(ConfigError::InvalidConfig(format!(
                "script '{}' sets both source and inline",
                script.name
            )));
        }
        if script.timeout == Some(0) {
            return Err(ConfigError::InvalidConfig(format!(
                "script '{}': timeout must be greater than zero",
                script.name
            )));
        }
        if script.max_parallel == Some(0) {
            return Err(ConfigError::InvalidConfig(format!(
                "script '{}': max_parallel cannot be zero",
                script.name
            )));
        }
        Ok(())
    }
}
