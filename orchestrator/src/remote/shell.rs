//! Subprocess-backed executor using the system `bash`, `ssh` and `scp` binaries

use std::io::Write;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::remote::{CommandOutput, RemoteExecutor, SshTarget, Target};
use crate::utils::shell_quote;

/// SSH reports its own failures (as opposed to the remote command's) with this status
const SSH_FAILURE_EXIT: i32 = 255;

/// Executor options
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Bound on connection establishment
    pub connect_timeout: Duration,

    /// SSH client binary
    pub ssh_program: String,

    /// SCP client binary
    pub scp_program: String,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
        }
    }
}

/// Executor that shells out for every operation
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    options: ExecutorOptions,
}

impl ShellExecutor {
    pub fn new(options: ExecutorOptions) -> Self {
        Self { options }
    }

    fn ssh_options(&self, ssh: &SshTarget) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
        ];
        if let Some(identity) = &ssh.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    /// Arguments for running `command` on an SSH target
    pub fn ssh_args(&self, ssh: &SshTarget, command: &str) -> Vec<String> {
        let mut args = self.ssh_options(ssh);
        args.push("-p".to_string());
        args.push(ssh.port.to_string());
        args.push(ssh.destination());
        args.push("--".to_string());
        args.push(format!("bash -c {}", shell_quote(command)));
        args
    }

    /// Arguments for copying `local_path` to `remote_path` on an SSH target
    pub fn scp_args(&self, ssh: &SshTarget, local_path: &str, remote_path: &str) -> Vec<String> {
        let mut args = self.ssh_options(ssh);
        args.push("-P".to_string());
        args.push(ssh.port.to_string());
        args.push(local_path.to_string());
        args.push(format!("{}:{}", ssh.destination(), remote_path));
        args
    }

    async fn run(&self, program: &str, args: &[String]) -> Result<Output, OrchestratorError> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| OrchestratorError::Transport(format!("failed to spawn {}: {}", program, e)))
    }
}

/// Turn a finished process into captured output or a typed failure
pub fn classify_output(
    via_ssh: bool,
    command: &str,
    output: Output,
) -> Result<CommandOutput, OrchestratorError> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let exit_code = output.status.code().unwrap_or(-1);

    if output.status.success() {
        return Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        });
    }

    // Any other status belongs to the remote command, whatever its stderr says
    if via_ssh && exit_code == SSH_FAILURE_EXIT {
        return Err(OrchestratorError::Transport(stderr.trim().to_string()));
    }

    Err(OrchestratorError::CommandFailed {
        command: summarize_command(command),
        exit_code,
        stderr: stderr.trim().to_string(),
    })
}

/// First line of a command, bounded, for error messages
fn summarize_command(command: &str) -> String {
    let first = command.trim().lines().next().unwrap_or_default();
    if first.len() > 80 {
        let mut end = 80;
        while !first.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &first[..end])
    } else {
        first.to_string()
    }
}

#[async_trait]
impl RemoteExecutor for ShellExecutor {
    async fn execute(
        &self,
        target: &Target,
        command: &str,
    ) -> Result<CommandOutput, OrchestratorError> {
        debug!("Executing on {}: {}", target, summarize_command(command));
        match target {
            Target::Local => {
                let output = self
                    .run("bash", &["-c".to_string(), command.to_string()])
                    .await?;
                classify_output(false, command, output)
            }
            Target::Ssh(ssh) => {
                let args = self.ssh_args(ssh, command);
                let output = self.run(&self.options.ssh_program, &args).await?;
                classify_output(true, command, output)
            }
        }
    }

    async fn copy_content(
        &self,
        target: &Target,
        content: &[u8],
        remote_path: &str,
        mode: Option<u32>,
    ) -> Result<(), OrchestratorError> {
        let mut staged = tempfile::NamedTempFile::new()?;
        staged.write_all(content)?;
        staged.flush()?;
        let local_path = staged.path().display().to_string();

        let parent = std::path::Path::new(remote_path)
            .parent()
            .map(|p| p.display().to_string())
            .filter(|p| !p.is_empty());
        if let Some(parent) = parent {
            self.execute(target, &format!("mkdir -p {}", shell_quote(&parent)))
                .await?;
        }

        match target {
            Target::Local => {
                tokio::fs::copy(staged.path(), remote_path).await?;
            }
            Target::Ssh(ssh) => {
                let args = self.scp_args(ssh, &local_path, remote_path);
                let output = self.run(&self.options.scp_program, &args).await?;
                classify_output(true, &format!("scp {}", remote_path), output)?;
            }
        }

        if let Some(mode) = mode {
            self.execute(
                target,
                &format!("chmod {:o} {}", mode, shell_quote(remote_path)),
            )
            .await?;
        }

        debug!("Copied {} bytes to {}:{}", content.len(), target, remote_path);
        Ok(())
    }

    async fn interactive(&self, target: &Target) -> Result<(), OrchestratorError> {
        let mut command = match target {
            Target::Local => {
                let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
                Command::new(shell)
            }
            Target::Ssh(ssh) => {
                let mut command = Command::new(&self.options.ssh_program);
                let mut args = self.ssh_options(ssh);
                // An interactive session may prompt, so drop BatchMode
                args.drain(0..2);
                command
                    .arg("-t")
                    .args(args)
                    .arg("-p")
                    .arg(ssh.port.to_string())
                    .arg(ssh.destination());
                command
            }
        };

        info!("Opening interactive session on {}", target);
        let status = command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;

        let code = status.code().unwrap_or(-1);
        if matches!(target, Target::Ssh(_)) && code == SSH_FAILURE_EXIT {
            return Err(OrchestratorError::Transport(format!(
                "interactive session to {} could not be established",
                target
            )));
        }
        info!("Interactive session on {} ended (exit {})", target, code);
        Ok(())
    }
}
