//! Idempotent cloud resource provisioning
//!
//! [`ControlPlane`] is the set of operations a backend must offer. Two
//! backends implement it: [`ApiBackend`] over the REST API and [`CliBackend`]
//! over the cloud CLI. [`Provisioner`] builds the ensure-create behaviour on
//! top and never knows which backend it is talking to.

use async_trait::async_trait;
use control_plane_client::{
    ComputeInstance, InstanceSpec, InterfaceSpec, NetworkInterface, NetworkSpec, PowerState,
    PublicAddress, PublicAddressSpec, ResourceGroup, ResourceGroupSpec, RuleDirection,
    SecurityGroup, SecurityGroupSpec, SecurityRule, VirtualNetwork,
};

use crate::errors::OrchestratorError;

pub mod api;
pub mod cli;
pub mod provisioner;
pub mod select;

pub use api::ApiBackend;
pub use cli::CliBackend;
pub use provisioner::Provisioner;
pub use select::{connect, select_backend};

/// Operations a control-plane backend offers.
///
/// `get_*` returns `Ok(None)` when the resource does not exist.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Short name for logs
    fn backend_name(&self) -> &'static str;

    async fn get_resource_group(&self, name: &str)
        -> Result<Option<ResourceGroup>, OrchestratorError>;

    async fn create_resource_group(
        &self,
        spec: &ResourceGroupSpec,
    ) -> Result<ResourceGroup, OrchestratorError>;

    async fn get_network(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<VirtualNetwork>, OrchestratorError>;

    async fn create_network(&self, spec: &NetworkSpec) -> Result<VirtualNetwork, OrchestratorError>;

    async fn get_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<SecurityGroup>, OrchestratorError>;

    async fn create_security_group(
        &self,
        spec: &SecurityGroupSpec,
    ) -> Result<SecurityGroup, OrchestratorError>;

    async fn get_public_address(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<PublicAddress>, OrchestratorError>;

    async fn create_public_address(
        &self,
        spec: &PublicAddressSpec,
    ) -> Result<PublicAddress, OrchestratorError>;

    async fn get_interface(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<NetworkInterface>, OrchestratorError>;

    async fn create_interface(
        &self,
        spec: &InterfaceSpec,
    ) -> Result<NetworkInterface, OrchestratorError>;

    async fn get_instance(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<ComputeInstance>, OrchestratorError>;

    async fn create_instance(&self, spec: &InstanceSpec)
        -> Result<ComputeInstance, OrchestratorError>;

    async fn get_power_state(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<PowerState, OrchestratorError>;

    async fn delete_resource_group(&self, name: &str) -> Result<(), OrchestratorError>;
}

/// Inbound rules every application host needs: SSH, HTTP and HTTPS
pub fn default_security_rules() -> Vec<SecurityRule> {
    [("allow-ssh", 1000, 22), ("allow-http", 1010, 80), ("allow-https", 1020, 443)]
        .into_iter()
        .map(|(name, priority, port)| SecurityRule {
            name: name.to_string(),
            priority,
            direction: RuleDirection::Inbound,
            protocol: "Tcp".to_string(),
            destination_port: port,
        })
        .collect()
}
