//! Point-in-time status of the application stack

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::deploy::compose::{ComposeStack, ServiceStatus};
use crate::errors::OrchestratorError;

/// Services as observed right now
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub target: String,
    pub observed_at: DateTime<Utc>,
    pub services: Vec<ServiceStatus>,
    /// Every service running and none flagged by its healthcheck
    pub all_running: bool,
}

impl StatusReport {
    pub fn from_services(target: String, services: Vec<ServiceStatus>) -> Self {
        let all_running = !services.is_empty() && services.iter().all(ServiceStatus::is_ready);
        Self {
            target,
            observed_at: Utc::now(),
            services,
            all_running,
        }
    }

    pub fn running_count(&self) -> usize {
        self.services.iter().filter(|s| s.running).count()
    }
}

/// Query the stack; nothing is cached between calls
pub async fn collect(stack: &ComposeStack) -> Result<StatusReport, OrchestratorError> {
    let services = stack.ps().await?;
    Ok(StatusReport::from_services(stack.target().to_string(), services))
}
