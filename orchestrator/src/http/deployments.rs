//! Managed-application deployment API client

use control_plane_client::{
    ApplicationDeployment, DeploymentDetail, DeploymentListResponse, DeploymentStatus,
};

use crate::errors::OrchestratorError;
use crate::http::client::HttpClient;
use crate::readiness::Probe;

impl HttpClient {
    /// List deployments of an application, newest first
    pub async fn list_deployments(
        &self,
        application_id: &str,
    ) -> Result<Vec<ApplicationDeployment>, OrchestratorError> {
        let path = format!("/applications/{}/deployments", application_id);
        let response: DeploymentListResponse = self.get(&path).await?;
        let mut deployments = response.deployments;
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deployments)
    }

    /// Get a deployment with its status and logs
    pub async fn get_deployment(
        &self,
        deployment_id: &str,
    ) -> Result<DeploymentDetail, OrchestratorError> {
        let path = format!("/deployments/{}", deployment_id);
        self.get(&path).await
    }
}

/// Readiness of a managed deployment
pub fn deployment_probe(detail: &DeploymentDetail) -> Probe {
    match detail.status {
        DeploymentStatus::Done => Probe::Ready,
        DeploymentStatus::Error => {
            let last = detail
                .logs
                .iter()
                .rev()
                .find(|l| l.stderr)
                .or_else(|| detail.logs.last())
                .map(|l| l.output.trim().to_string())
                .unwrap_or_default();
            Probe::Failed(format!("deployment {} failed: {}", detail.id, last))
        }
        DeploymentStatus::Cancelled => {
            Probe::Failed(format!("deployment {} was cancelled", detail.id))
        }
        ref status => Probe::NotReady(format!("deployment {} is {:?}", detail.id, status)),
    }
}
