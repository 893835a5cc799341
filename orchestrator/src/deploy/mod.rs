//! Deployment pipelines per target environment
//!
//! Every environment is a [`Pipeline`] over a [`DeploySession`]. The steps
//! shared between environments live here.

use std::time::Duration;

use tracing::debug;

use crate::deploy::compose::INSTALL_RUNTIME_SCRIPT;
use crate::errors::OrchestratorError;
use crate::pipeline::{Pipeline, StepDefinition};
use crate::readiness::{wait_until_ready, Probe};
use crate::remote::{RemoteExecutor, Target};
use crate::utils::shell_quote;

pub mod cloud_vm;
pub mod compose;
pub mod local;
pub mod session;
pub mod ssh_host;

pub use session::{DeploySession, ManagedDeployment};

/// Target environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    CloudVm,
    SshHost,
    Local,
}

impl std::str::FromStr for Environment {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cloud" | "cloud-vm" | "vm" => Ok(Environment::CloudVm),
            "ssh" | "host" => Ok(Environment::SshHost),
            "local" => Ok(Environment::Local),
            _ => Err(OrchestratorError::ConfigError(format!(
                "unknown environment '{}'",
                s
            ))),
        }
    }
}

impl Environment {
    pub fn pipeline(&self) -> Pipeline<DeploySession> {
        match self {
            Environment::CloudVm => cloud_vm::steps(),
            Environment::SshHost => ssh_host::steps(),
            Environment::Local => local::steps(),
        }
    }
}

/// Observe once whether the target accepts commands
pub async fn probe_reachable(executor: &dyn RemoteExecutor, target: &Target) -> Probe {
    match executor.execute(target, "true").await {
        Ok(_) => Probe::Ready,
        Err(e) => {
            debug!("{} not reachable yet: {}", target, e);
            Probe::NotReady(e.to_string())
        }
    }
}

pub(crate) fn wait_ssh_step() -> StepDefinition<DeploySession> {
    StepDefinition::new(
        "wait-ssh",
        "Waiting for SSH",
        |s: &mut DeploySession, em| {
            Box::pin(async move {
                let target = s.target()?;
                em.info(format!("Connecting to {}", target)).await;
                let executor = s.executor.as_ref();
                wait_until_ready(&s.readiness.ssh(), || probe_reachable(executor, &target))
                    .await
                    .into_result(&format!("SSH on {}", target))
            })
        },
    )
}

const INSTALL_ATTEMPTS: u32 = 3;
const INSTALL_RETRY_DELAY: Duration = Duration::from_secs(5);

pub(crate) fn install_runtime_step() -> StepDefinition<DeploySession> {
    StepDefinition::new(
        "install-runtime",
        "Installing container runtime",
        |s: &mut DeploySession, _em| {
            Box::pin(async move {
                let target = s.target()?;
                // Package mirrors on a fresh instance drop connections now and then
                s.executor
                    .execute_with_retry(
                        &target,
                        INSTALL_RUNTIME_SCRIPT,
                        INSTALL_ATTEMPTS,
                        INSTALL_RETRY_DELAY,
                    )
                    .await
                    .map(|_| ())
            })
        },
    )
}

pub(crate) fn upload_stack_step() -> StepDefinition<DeploySession> {
    StepDefinition::new(
        "upload-stack",
        "Uploading stack files",
        |s: &mut DeploySession, em| {
            Box::pin(async move {
                let target = s.target()?;
                let dir = s.app.remote_dir.trim_end_matches('/').to_string();
                let compose_name = s
                    .app
                    .compose_file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "compose.yaml".to_string());

                s.executor
                    .copy_content(
                        &target,
                        s.compose_content.as_bytes(),
                        &format!("{}/{}", dir, compose_name),
                        Some(0o600),
                    )
                    .await?;
                let env_path = format!("{}/.env", dir);
                let existing = s
                    .executor
                    .execute(
                        &target,
                        &format!("cat {} 2>/dev/null || true", shell_quote(&env_path)),
                    )
                    .await?;
                let adopted = s.ctx.adopt_env_secrets(&existing.stdout);
                if !adopted.is_empty() {
                    em.info(format!("Keeping {} from {}", adopted.join(", "), env_path))
                        .await;
                }
                s.executor
                    .copy_content(
                        &target,
                        s.ctx.env_file(&[]).as_bytes(),
                        &env_path,
                        Some(0o600),
                    )
                    .await?;
                em.debug(format!("Stack files written to {}", dir)).await;
                Ok(())
            })
        },
    )
}

pub(crate) fn start_stack_step() -> StepDefinition<DeploySession> {
    StepDefinition::new(
        "start-stack",
        "Starting application stack",
        |s: &mut DeploySession, _em| {
            Box::pin(async move {
                let stack = s.stack()?;
                stack.pull().await?;
                stack.up().await
            })
        },
    )
}

pub(crate) fn wait_services_step() -> StepDefinition<DeploySession> {
    StepDefinition::new(
        "wait-services",
        "Waiting for services to run",
        |s: &mut DeploySession, _em| {
            Box::pin(async move { s.stack()?.wait_running(&s.readiness.services()).await })
        },
    )
}
