//! Control-plane backend over the REST API

use async_trait::async_trait;
use control_plane_client::{
    ComputeInstance, InstanceSpec, InterfaceSpec, NetworkInterface, NetworkSpec, PowerState,
    PublicAddress, PublicAddressSpec, ResourceGroup, ResourceGroupSpec, SecurityGroup,
    SecurityGroupSpec, VirtualNetwork,
};
use secrecy::SecretString;
use serde::Deserialize;

use crate::errors::OrchestratorError;
use crate::http::client::HttpClient;
use crate::provision::ControlPlane;
use crate::storage::settings::CloudSettings;

/// Environment variable holding the API bearer token
pub const TOKEN_ENV_VAR: &str = "STACKPILOT_CLOUD_TOKEN";

#[derive(Debug, Deserialize)]
struct PowerStateResponse {
    state: String,
}

/// Typed REST backend
pub struct ApiBackend {
    client: HttpClient,
    subscription_id: String,
}

impl ApiBackend {
    pub fn new(client: HttpClient, subscription_id: impl Into<String>) -> Self {
        Self {
            client,
            subscription_id: subscription_id.into(),
        }
    }

    /// Build from settings, reading the token from [`TOKEN_ENV_VAR`]
    pub fn from_settings(settings: &CloudSettings) -> Result<Self, OrchestratorError> {
        let token = std::env::var(TOKEN_ENV_VAR)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                OrchestratorError::ConfigError(format!("{} is not set", TOKEN_ENV_VAR))
            })?;
        Self::with_token(settings, SecretString::from(token))
    }

    pub fn with_token(
        settings: &CloudSettings,
        token: SecretString,
    ) -> Result<Self, OrchestratorError> {
        if settings.subscription_id.trim().is_empty() {
            return Err(OrchestratorError::ConfigError(
                "cloud.subscription_id is not set".to_string(),
            ));
        }
        let client = HttpClient::new(&settings.api_base_url, Some(token))?;
        Ok(Self::new(client, settings.subscription_id.clone()))
    }

    fn group_path(&self, group: &str) -> String {
        format!(
            "/subscriptions/{}/resource-groups/{}",
            self.subscription_id, group
        )
    }

    fn resource_path(&self, group: &str, kind: &str, name: &str) -> String {
        format!("{}/{}/{}", self.group_path(group), kind, name)
    }
}

#[async_trait]
impl ControlPlane for ApiBackend {
    fn backend_name(&self) -> &'static str {
        "api"
    }

    async fn get_resource_group(
        &self,
        name: &str,
    ) -> Result<Option<ResourceGroup>, OrchestratorError> {
        self.client.get_optional(&self.group_path(name)).await
    }

    async fn create_resource_group(
        &self,
        spec: &ResourceGroupSpec,
    ) -> Result<ResourceGroup, OrchestratorError> {
        self.client.put(&self.group_path(&spec.name), spec).await
    }

    async fn get_network(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<VirtualNetwork>, OrchestratorError> {
        self.client
            .get_optional(&self.resource_path(resource_group, "networks", name))
            .await
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<VirtualNetwork, OrchestratorError> {
        self.client
            .put(
                &self.resource_path(&spec.resource_group, "networks", &spec.name),
                spec,
            )
            .await
    }

    async fn get_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<SecurityGroup>, OrchestratorError> {
        self.client
            .get_optional(&self.resource_path(resource_group, "security-groups", name))
            .await
    }

    async fn create_security_group(
        &self,
        spec: &SecurityGroupSpec,
    ) -> Result<SecurityGroup, OrchestratorError> {
        self.client
            .put(
                &self.resource_path(&spec.resource_group, "security-groups", &spec.name),
                spec,
            )
            .await
    }

    async fn get_public_address(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<PublicAddress>, OrchestratorError> {
        self.client
            .get_optional(&self.resource_path(resource_group, "public-addresses", name))
            .await
    }

    async fn create_public_address(
        &self,
        spec: &PublicAddressSpec,
    ) -> Result<PublicAddress, OrchestratorError> {
        self.client
            .put(
                &self.resource_path(&spec.resource_group, "public-addresses", &spec.name),
                spec,
            )
            .await
    }

    async fn get_interface(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<NetworkInterface>, OrchestratorError> {
        self.client
            .get_optional(&self.resource_path(resource_group, "interfaces", name))
            .await
    }

    async fn create_interface(
        &self,
        spec: &InterfaceSpec,
    ) -> Result<NetworkInterface, OrchestratorError> {
        self.client
            .put(
                &self.resource_path(&spec.resource_group, "interfaces", &spec.name),
                spec,
            )
            .await
    }

    async fn get_instance(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<ComputeInstance>, OrchestratorError> {
        self.client
            .get_optional(&self.resource_path(resource_group, "instances", name))
            .await
    }

    async fn create_instance(
        &self,
        spec: &InstanceSpec,
    ) -> Result<ComputeInstance, OrchestratorError> {
        self.client
            .put(
                &self.resource_path(&spec.resource_group, "instances", &spec.name),
                spec,
            )
            .await
    }

    async fn get_power_state(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<PowerState, OrchestratorError> {
        let path = format!(
            "{}/power-state",
            self.resource_path(resource_group, "instances", name)
        );
        let response: PowerStateResponse = self.client.get(&path).await?;
        Ok(PowerState::parse(&response.state))
    }

    async fn delete_resource_group(&self, name: &str) -> Result<(), OrchestratorError> {
        self.client.delete(&self.group_path(name)).await
    }
}
