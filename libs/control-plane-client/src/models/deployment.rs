//! Managed-application deployment models

use serde::{Deserialize, Serialize};

/// Status of a deployment run by the managed-application control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl DeploymentStatus {
    /// Whether the deployment has stopped changing
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Done | DeploymentStatus::Error | DeploymentStatus::Cancelled
        )
    }
}

/// Deployment summary as listed for an application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationDeployment {
    pub id: String,
    pub application_id: String,
    pub status: DeploymentStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// List of deployments response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentListResponse {
    pub deployments: Vec<ApplicationDeployment>,
}

/// A single line of deployment output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentLogLine {
    pub output: String,
    #[serde(default)]
    pub stderr: bool,
}

/// Deployment detail including logs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentDetail {
    pub id: String,
    pub application_id: String,
    pub status: DeploymentStatus,
    #[serde(default)]
    pub logs: Vec<DeploymentLogLine>,
}
