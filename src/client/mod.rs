//! Remote command execution interface.
//!
//! The orchestrator talks to remote hosts only through [`CommandClient`]:
//! submit a script body to an instance, then poll the returned handle.
//! Retry and backoff live in the engine, never here.
//!
//! [`inventory`] decides which configured instances are eligible, and
//! [`process`] provides a transport that runs scripts through a local
//! launcher such as `ssh`.

pub mod inventory;
pub mod process;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::core::types::{CommandId, InstanceId};

pub use inventory::{
    ExcludedInstance, Inventory, PlatformKind, StaticInventory, TargetResolution, resolve_targets,
};
pub use process::{ProcessClient, Transport};

/// The remote service refused a submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    /// Target instance is unknown or unreachable.
    #[error("unknown instance: {0}")]
    UnknownInstance(InstanceId),

    /// The service rejected the request (bad command, auth failure, ...).
    #[error("submission rejected: {0}")]
    Rejected(String),
}

/// A status check could not be completed.
///
/// Distinct from a command that completed with [`CommandStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// The handle does not refer to a known invocation.
    #[error("unknown command handle: {0}")]
    UnknownHandle(CommandId),

    /// Transient communication fault.
    #[error("communication error: {0}")]
    Communication(String),
}

/// Remote status of a submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Pending,
    Success,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandStatus::Pending)
    }
}

/// Snapshot returned by [`CommandClient::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub status: CommandStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandInvocation {
    pub fn pending() -> Self {
        Self {
            status: CommandStatus::Pending,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn success(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Success,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn failed(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failed,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

/// Capability to run shell commands on remote instances.
///
/// Implementations are shared across concurrent workers, so they must be
/// `Send + Sync` and take `&self`.
#[async_trait]
pub trait CommandClient: Send + Sync {
    /// Submit `body` to run on `instance`, bounded remotely by `timeout`.
    async fn submit(
        &self,
        instance: &InstanceId,
        body: &str,
        timeout: Duration,
    ) -> Result<CommandId, SubmissionError>;

    /// Fetch the current status and output of a submitted command.
    async fn poll(&self, handle: &CommandId) -> Result<CommandInvocation, PollError>;
}
