//! Docker Compose stack on a target host

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::OrchestratorError;
use crate::readiness::{wait_until_ready, Probe, ReadinessOptions};
use crate::remote::{CommandOutput, RemoteExecutor, Target};
use crate::utils::shell_quote;

/// Container health as reported by its healthcheck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Starting,
    Healthy,
    Unhealthy,
}

impl Health {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "starting" => Some(Health::Starting),
            "healthy" => Some(Health::Healthy),
            "unhealthy" => Some(Health::Unhealthy),
            _ => None,
        }
    }
}

/// Point-in-time state of one managed container. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub running: bool,
    pub health: Option<Health>,
    pub started_at: Option<String>,
    pub state: String,
    pub container: String,
    pub image: Option<String>,
}

impl ServiceStatus {
    /// Running, and not flagged by a healthcheck
    pub fn is_ready(&self) -> bool {
        self.running && !matches!(self.health, Some(Health::Starting) | Some(Health::Unhealthy))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    service: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    health: String,
    #[serde(default)]
    image: String,
}

impl From<PsEntry> for ServiceStatus {
    fn from(entry: PsEntry) -> Self {
        let name = if entry.service.is_empty() {
            entry.name.clone()
        } else {
            entry.service
        };
        ServiceStatus {
            name,
            running: entry.state.eq_ignore_ascii_case("running"),
            health: Health::parse(&entry.health),
            started_at: None,
            state: entry.state,
            container: entry.name,
            image: Some(entry.image).filter(|i| !i.is_empty()),
        }
    }
}

/// Parse `docker compose ps --format json`, which is a JSON array on older
/// Compose releases and one JSON object per line on newer ones
pub fn parse_ps_output(stdout: &str) -> Result<Vec<ServiceStatus>, OrchestratorError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<PsEntry> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(serde_json::from_str::<PsEntry>)
            .collect::<Result<_, _>>()?
    };

    Ok(entries.into_iter().map(ServiceStatus::from).collect())
}

/// Parse `name|startedAt` lines from `docker inspect`
fn parse_started_at(stdout: &str) -> HashMap<String, String> {
    stdout
        .lines()
        .filter_map(|line| line.split_once('|'))
        .map(|(name, started)| {
            (
                name.trim().trim_start_matches('/').to_string(),
                started.trim().to_string(),
            )
        })
        .collect()
}

/// Probe outcome for a set of service states
pub fn services_probe(services: &[ServiceStatus]) -> Probe {
    if services.is_empty() {
        return Probe::NotReady("no services reported".to_string());
    }
    let pending: Vec<String> = services
        .iter()
        .filter(|s| !s.is_ready())
        .map(|s| match s.health {
            Some(health) if s.running => {
                format!("{} ({})", s.name, format!("{:?}", health).to_lowercase())
            }
            _ => format!("{} ({})", s.name, s.state),
        })
        .collect();
    if pending.is_empty() {
        Probe::Ready
    } else {
        Probe::NotReady(format!("waiting for {}", pending.join(", ")))
    }
}

/// Script installing Docker Engine and the Compose plugin when missing
pub const INSTALL_RUNTIME_SCRIPT: &str = r#"set -e
if command -v docker >/dev/null 2>&1 && docker compose version >/dev/null 2>&1; then
  echo "docker already installed"
  exit 0
fi
export DEBIAN_FRONTEND=noninteractive
curl -fsSL https://get.docker.com -o /tmp/get-docker.sh
sudo sh /tmp/get-docker.sh
sudo systemctl enable --now docker
sudo usermod -aG docker "$(id -un)" || true
docker compose version || sudo docker compose version
"#;

/// A compose project addressed through a remote executor
#[derive(Clone)]
pub struct ComposeStack {
    executor: Arc<dyn RemoteExecutor>,
    target: Target,
    project_dir: String,
    project_name: String,
}

impl ComposeStack {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        target: Target,
        project_dir: impl Into<String>,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            target,
            project_dir: project_dir.into(),
            project_name: project_name.into(),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn project_dir(&self) -> &str {
        &self.project_dir
    }

    pub fn executor(&self) -> &Arc<dyn RemoteExecutor> {
        &self.executor
    }

    /// Full shell command for a compose subcommand
    pub fn compose_command(&self, args: &str) -> String {
        format!(
            "cd {} && docker compose -p {} {}",
            shell_quote(&self.project_dir),
            shell_quote(&self.project_name),
            args
        )
    }

    async fn compose(&self, args: &str) -> Result<CommandOutput, OrchestratorError> {
        self.executor
            .execute(&self.target, &self.compose_command(args))
            .await
    }

    /// Pull the newest images for every service
    pub async fn pull(&self) -> Result<(), OrchestratorError> {
        info!("Pulling images for {}", self.project_name);
        self.compose("pull --quiet").await.map(|_| ())
    }

    /// Create and start containers
    pub async fn up(&self) -> Result<(), OrchestratorError> {
        info!("Starting stack {}", self.project_name);
        self.compose("up -d --remove-orphans").await.map(|_| ())
    }

    /// Recreate every container from the current images
    pub async fn recreate(&self) -> Result<(), OrchestratorError> {
        info!("Recreating containers for {}", self.project_name);
        self.compose("up -d --force-recreate --remove-orphans")
            .await
            .map(|_| ())
    }

    pub async fn start(&self) -> Result<(), OrchestratorError> {
        self.compose("start").await.map(|_| ())
    }

    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        info!("Stopping stack {}", self.project_name);
        self.compose("stop").await.map(|_| ())
    }

    pub async fn restart(&self) -> Result<(), OrchestratorError> {
        info!("Restarting stack {}", self.project_name);
        self.compose("restart").await.map(|_| ())
    }

    /// Run a shell command inside a service container
    pub async fn exec(&self, service: &str, command: &str) -> Result<CommandOutput, OrchestratorError> {
        debug!("Exec in {}: {}", service, command);
        self.compose(&format!(
            "exec -T {} sh -c {}",
            shell_quote(service),
            shell_quote(command)
        ))
        .await
    }

    /// Recent log lines for one service or the whole stack
    pub async fn logs(&self, service: Option<&str>, tail: u32) -> Result<String, OrchestratorError> {
        let scope = service.map(shell_quote).unwrap_or_default();
        let output = self
            .compose(&format!("logs --no-color --tail {} {}", tail, scope))
            .await?;
        Ok(output.stdout)
    }

    /// Current state of every container in the project
    pub async fn ps(&self) -> Result<Vec<ServiceStatus>, OrchestratorError> {
        let output = self.compose("ps --all --format json").await?;
        let mut services = parse_ps_output(&output.stdout)?;
        if services.is_empty() {
            return Ok(services);
        }

        let inspect = self.compose_command(
            "ps --all -q | xargs -r docker inspect --format '{{.Name}}|{{.State.StartedAt}}'",
        );
        match self.executor.execute(&self.target, &inspect).await {
            Ok(output) => {
                let started = parse_started_at(&output.stdout);
                for service in services.iter_mut() {
                    service.started_at = started.get(&service.container).cloned();
                }
            }
            Err(e) => debug!("Could not read container start times: {}", e),
        }
        Ok(services)
    }

    /// Observe the stack once
    pub async fn probe_services(&self) -> Probe {
        match self.ps().await {
            Ok(services) => services_probe(&services),
            Err(e) if e.is_transient() => Probe::NotReady(format!("target unreachable: {}", e)),
            Err(e) => {
                warn!("Listing services failed: {}", e);
                Probe::NotReady(e.to_string())
            }
        }
    }

    /// Wait until every service reports running
    pub async fn wait_running(&self, options: &ReadinessOptions) -> Result<(), OrchestratorError> {
        wait_until_ready(options, || self.probe_services())
            .await
            .into_result("services")
    }

    /// Image reference of the given service's container, if it exists
    pub async fn image_of(&self, service: &str) -> Result<Option<String>, OrchestratorError> {
        let services = self.ps().await?;
        Ok(services
            .into_iter()
            .find(|s| s.name == service)
            .and_then(|s| s.image))
    }
}
