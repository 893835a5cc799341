//! State owned by one deployment run

use std::sync::Arc;

use crate::context::DeploymentContext;
use crate::deploy::compose::ComposeStack;
use crate::errors::OrchestratorError;
use crate::http::client::HttpClient;
use crate::provision::Provisioner;
use crate::remote::{RemoteExecutor, Target};
use crate::storage::settings::{AppSettings, ReadinessSettings};

/// Managed-application deployment to wait for after a local deploy
pub struct ManagedDeployment {
    pub client: HttpClient,
    pub application_id: String,
}

/// Everything the deploy steps read and write.
///
/// A session is owned by exactly one pipeline run.
pub struct DeploySession {
    pub ctx: DeploymentContext,
    pub executor: Arc<dyn RemoteExecutor>,
    pub app: AppSettings,
    pub readiness: ReadinessSettings,
    /// Compose file shipped to the target
    pub compose_content: String,
    /// Fixed target; cloud deployments derive theirs from the context instead
    pub target: Option<Target>,
    pub provisioner: Option<Provisioner>,
    pub managed: Option<ManagedDeployment>,
    /// Subscription or account scope used for globally unique names
    pub scope: String,
}

impl DeploySession {
    pub fn new(
        ctx: DeploymentContext,
        executor: Arc<dyn RemoteExecutor>,
        app: AppSettings,
        readiness: ReadinessSettings,
        compose_content: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            executor,
            app,
            readiness,
            compose_content: compose_content.into(),
            target: None,
            provisioner: None,
            managed: None,
            scope: String::new(),
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_provisioner(mut self, provisioner: Provisioner, scope: impl Into<String>) -> Self {
        self.provisioner = Some(provisioner);
        self.scope = scope.into();
        self
    }

    pub fn with_managed(mut self, managed: ManagedDeployment) -> Self {
        self.managed = Some(managed);
        self
    }

    /// The host to run on: the fixed target, else the provisioned instance
    pub fn target(&self) -> Result<Target, OrchestratorError> {
        match &self.target {
            Some(target) => Ok(target.clone()),
            None => self.ctx.ssh_target(),
        }
    }

    pub fn provisioner(&self) -> Result<&Provisioner, OrchestratorError> {
        self.provisioner
            .as_ref()
            .ok_or_else(|| OrchestratorError::MissingContext("no provisioner configured".into()))
    }

    pub fn stack(&self) -> Result<ComposeStack, OrchestratorError> {
        Ok(ComposeStack::new(
            self.executor.clone(),
            self.target()?,
            self.app.remote_dir.clone(),
            self.app.project_name.clone(),
        ))
    }
}
