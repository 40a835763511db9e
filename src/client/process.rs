//! Process-backed command transport.
//!
//! [`ProcessClient`] runs each submitted script by piping its body into a
//! launcher process: `ssh <instance> sh -s` for remote hosts, or a local
//! shell for development and tests. Every submission runs in the
//! background under its own handle; [`CommandClient::poll`] reads the
//! latest state from the handle table and drops the handle once it has
//! reported a terminal result.
//!
//! The submission timeout is enforced here, on the "remote" side: a
//! launcher still running when it expires is killed and reported failed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{CommandClient, CommandInvocation, PollError, SubmissionError};
use crate::core::types::{CommandId, InstanceId};

/// Environment variable carrying the target instance id for local runs.
pub const INSTANCE_ENV_VAR: &str = "FLEETRUN_INSTANCE";

/// How scripts reach an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transport {
    /// Run over ssh, reading the script from stdin on the remote side.
    Ssh {
        /// Remote login user.
        #[serde(default)]
        user: Option<String>,
        /// Extra ssh options, e.g. `["-o", "BatchMode=yes"]`.
        #[serde(default)]
        options: Vec<String>,
        /// ssh executable.
        #[serde(default = "default_ssh_program")]
        program: String,
    },
    /// Run in a local shell; the instance id is exported as `FLEETRUN_INSTANCE`.
    Local {
        #[serde(default = "default_shell")]
        shell: String,
    },
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}

impl Transport {
    /// Local shell transport using `sh`.
    pub fn local() -> Self {
        Transport::Local {
            shell: default_shell(),
        }
    }

    /// ssh transport with default options.
    pub fn ssh() -> Self {
        Transport::Ssh {
            user: None,
            options: Vec::new(),
            program: default_ssh_program(),
        }
    }

    /// Program and arguments that launch a script on `instance`.
    pub fn launcher(&self, instance: &InstanceId) -> (String, Vec<String>) {
        match self {
            Transport::Ssh {
                user,
                options,
                program,
            } => {
                let destination = match user {
                    Some(user) => format!("{}@{}", user, instance),
                    None => instance.to_string(),
                };
                let mut args = options.clone();
                args.push(destination);
                args.push("sh".to_string());
                args.push("-s".to_string());
                (program.clone(), args)
            }
            Transport::Local { shell } => (shell.clone(), vec!["-s".to_string()]),
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::ssh()
    }
}

/// State of one submitted command.
#[derive(Debug, Clone)]
enum Slot {
    Running,
    Done(CommandInvocation),
}

/// [`CommandClient`] that runs scripts through a launcher process.
pub struct ProcessClient {
    transport: Transport,
    invocations: Arc<Mutex<HashMap<CommandId, Slot>>>,
}

impl ProcessClient {
    /// Create a client for the given transport.
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            invocations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The configured transport.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Number of handles still tracked, running or awaiting a final poll.
    pub async fn tracked_count(&self) -> usize {
        self.invocations.lock().await.len()
    }

    /// Number of invocations still running.
    pub async fn running_count(&self) -> usize {
        self.invocations
            .lock()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Running))
            .count()
    }
}

#[async_trait]
impl CommandClient for ProcessClient {
    async fn submit(
        &self,
        instance: &InstanceId,
        body: &str,
        limit: Duration,
    ) -> Result<CommandId, SubmissionError> {
        let (program, args) = self.transport.launcher(instance);

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .env(INSTANCE_ENV_VAR, instance.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            SubmissionError::Rejected(format!("failed to launch '{}': {}", program, e))
        })?;

        let handle = CommandId::new();
        self.invocations.lock().await.insert(handle, Slot::Running);
        debug!(instance = %instance, handle = %handle, program = %program, "command submitted");

        // The body is fed while output is drained, both under the timeout:
        // a shell blocked on a full stdout pipe stops reading stdin.
        let stdin = child.stdin.take();
        let body = body.to_string();
        let invocations = Arc::clone(&self.invocations);
        let instance = instance.clone();
        tokio::spawn(async move {
            let feed = async move {
                if let Some(mut stdin) = stdin
                    && let Err(e) = stdin.write_all(body.as_bytes()).await
                {
                    // The script may exit before reading all of its body.
                    debug!(error = %e, "launcher closed stdin early");
                }
            };
            let run = async move {
                let ((), output) = tokio::join!(feed, child.wait_with_output());
                output
            };

            let invocation = match timeout(limit, run).await {
                Ok(Ok(output)) => {
                    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                    if output.status.success() {
                        CommandInvocation::success(stdout, stderr)
                    } else {
                        let code = output.status.code().unwrap_or(-1);
                        debug!(instance = %instance, handle = %handle, code, "command exited non-zero");
                        CommandInvocation::failed(stdout, stderr)
                    }
                }
                Ok(Err(e)) => CommandInvocation::failed("", format!("failed to collect output: {}", e)),
                Err(_) => {
                    warn!(instance = %instance, handle = %handle, timeout = ?limit, "command timed out");
                    CommandInvocation::failed("", format!("command timed out after {:?}", limit))
                }
            };
            invocations.lock().await.insert(handle, Slot::Done(invocation));
        });

        Ok(handle)
    }

    async fn poll(&self, handle: &CommandId) -> Result<CommandInvocation, PollError> {
        let mut invocations = self.invocations.lock().await;
        if let Some(Slot::Running) = invocations.get(handle) {
            return Ok(CommandInvocation::pending());
        }
        // A terminal result is handed out once; the handle is forgotten.
        match invocations.remove(handle) {
            Some(Slot::Done(invocation)) => Ok(invocation),
            _ => Err(PollError::UnknownHandle(*handle)),
        }
    }
}
