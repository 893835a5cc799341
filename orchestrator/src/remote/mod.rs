//! Remote command execution
//!
//! A [`RemoteExecutor`] runs commands and scripts against a [`Target`], which
//! is either the local machine or a host reached over SSH. Implementations keep
//! no state between calls beyond their connection parameters.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::OrchestratorError;

pub mod shell;

pub use shell::{ExecutorOptions, ShellExecutor};

/// An SSH-reachable host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Private key used for key-based authentication
    pub identity_file: Option<PathBuf>,
}

fn default_ssh_port() -> u16 {
    22
}

impl SshTarget {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: default_ssh_port(),
            identity_file: None,
        }
    }

    pub fn with_identity_file(mut self, identity_file: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(identity_file.into());
        self
    }

    /// `user@host` destination string
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Where a command runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Target {
    Local,
    Ssh(SshTarget),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Local => write!(f, "localhost"),
            Target::Ssh(ssh) => write!(f, "{}:{}", ssh.destination(), ssh.port),
        }
    }
}

/// Captured output of a command that exited successfully
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn from_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }
}

/// Runs commands against a target host
///
/// `execute` returns [`OrchestratorError::Transport`] when the target could
/// not be reached and [`OrchestratorError::CommandFailed`] when the command
/// itself exited non-zero.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command (or multi-line script) on the target
    async fn execute(&self, target: &Target, command: &str)
        -> Result<CommandOutput, OrchestratorError>;

    /// Run a command, retrying only when the executor itself failed to reach the target
    async fn execute_with_retry(
        &self,
        target: &Target,
        command: &str,
        max_attempts: u32,
        delay: Duration,
    ) -> Result<CommandOutput, OrchestratorError> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.execute(target, command).await {
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        "Attempt {}/{} against {} failed: {}; retrying in {:?}",
                        attempt, max_attempts, target, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => {
                    if attempt > 1 {
                        debug!("Command against {} settled after {} attempts", target, attempt);
                    }
                    return result;
                }
            }
        }
    }

    /// Stage content onto the target at `remote_path`, optionally setting its mode
    async fn copy_content(
        &self,
        target: &Target,
        content: &[u8],
        remote_path: &str,
        mode: Option<u32>,
    ) -> Result<(), OrchestratorError>;

    /// Hand the terminal to the user for a direct session on the target.
    /// Returns once the session ends.
    async fn interactive(&self, target: &Target) -> Result<(), OrchestratorError>;
}
