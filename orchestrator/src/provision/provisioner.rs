//! Ensure-create operations over a [`ControlPlane`]

use std::sync::Arc;

use control_plane_client::{
    ComputeInstance, InstanceSpec, InterfaceSpec, NetworkInterface, NetworkSpec, PowerState,
    PublicAddress, PublicAddressSpec, ResourceGroup, ResourceGroupSpec, SecurityGroup,
    SecurityGroupSpec, VirtualNetwork,
};
use tracing::{info, warn};

use crate::context::DeploymentContext;
use crate::errors::OrchestratorError;
use crate::provision::{default_security_rules, ControlPlane};
use crate::readiness::{wait_until_ready, Probe, ReadinessOptions};

/// Idempotent provisioning of every resource a deployment target needs.
///
/// Each `ensure_*` looks the resource up first and adopts it when present;
/// only a missing resource is created. Discovered identifiers are written
/// back into the [`DeploymentContext`] for the steps that follow.
#[derive(Clone)]
pub struct Provisioner {
    backend: Arc<dyn ControlPlane>,
}

impl Provisioner {
    pub fn new(backend: Arc<dyn ControlPlane>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Ensure the resource group exists. An existing group's location wins
    /// over the requested one.
    pub async fn ensure_resource_group(
        &self,
        ctx: &mut DeploymentContext,
    ) -> Result<ResourceGroup, OrchestratorError> {
        let group = match self.backend.get_resource_group(&ctx.resource_group).await? {
            Some(existing) => {
                if existing.location != ctx.location {
                    warn!(
                        "Resource group {} already exists in {}, using it instead of {}",
                        existing.name, existing.location, ctx.location
                    );
                }
                info!("Adopting resource group {}", existing.name);
                existing
            }
            None => {
                info!("Creating resource group {} in {}", ctx.resource_group, ctx.location);
                self.backend
                    .create_resource_group(&ResourceGroupSpec {
                        name: ctx.resource_group.clone(),
                        location: ctx.location.clone(),
                    })
                    .await?
            }
        };
        ctx.location = group.location.clone();
        Ok(group)
    }

    /// Ensure the virtual network and its subnet exist
    pub async fn ensure_network(
        &self,
        ctx: &mut DeploymentContext,
    ) -> Result<VirtualNetwork, OrchestratorError> {
        let network = match self
            .backend
            .get_network(&ctx.resource_group, &ctx.network_name)
            .await?
        {
            Some(existing) => {
                info!("Adopting network {} ({})", existing.name, existing.address_space);
                existing
            }
            None => {
                info!("Creating network {} ({})", ctx.network_name, ctx.address_space);
                self.backend
                    .create_network(&NetworkSpec {
                        resource_group: ctx.resource_group.clone(),
                        name: ctx.network_name.clone(),
                        location: ctx.location.clone(),
                        address_space: ctx.address_space.to_string(),
                        subnet_name: ctx.subnet_name.clone(),
                        subnet_prefix: ctx.subnet_prefix.to_string(),
                    })
                    .await?
            }
        };
        if network.subnet_id.is_empty() {
            return Err(OrchestratorError::Provision(format!(
                "network {} has no subnet",
                network.name
            )));
        }
        ctx.subnet_id = Some(network.subnet_id.clone());
        Ok(network)
    }

    /// Ensure the security group exists with the inbound rules the stack needs
    pub async fn ensure_security_group(
        &self,
        ctx: &mut DeploymentContext,
    ) -> Result<SecurityGroup, OrchestratorError> {
        let group = match self
            .backend
            .get_security_group(&ctx.resource_group, &ctx.security_group_name)
            .await?
        {
            Some(existing) => {
                info!(
                    "Adopting security group {} ({} rules)",
                    existing.name,
                    existing.rules.len()
                );
                existing
            }
            None => {
                info!("Creating security group {}", ctx.security_group_name);
                self.backend
                    .create_security_group(&SecurityGroupSpec {
                        resource_group: ctx.resource_group.clone(),
                        name: ctx.security_group_name.clone(),
                        location: ctx.location.clone(),
                        rules: default_security_rules(),
                    })
                    .await?
            }
        };
        ctx.security_group_id = Some(group.id.clone());
        Ok(group)
    }

    /// Ensure the public address exists; records the address when already assigned
    pub async fn ensure_public_address(
        &self,
        ctx: &mut DeploymentContext,
        scope: &str,
    ) -> Result<PublicAddress, OrchestratorError> {
        let address = match self
            .backend
            .get_public_address(&ctx.resource_group, &ctx.public_address_name)
            .await?
        {
            Some(existing) => {
                info!("Adopting public address {}", existing.name);
                existing
            }
            None => {
                info!("Creating public address {}", ctx.public_address_name);
                self.backend
                    .create_public_address(&PublicAddressSpec {
                        resource_group: ctx.resource_group.clone(),
                        name: ctx.public_address_name.clone(),
                        location: ctx.location.clone(),
                        dns_label: Some(ctx.dns_label(scope)),
                    })
                    .await?
            }
        };
        ctx.public_address_id = Some(address.id.clone());
        if let Some(ip) = address.ip_address.as_deref().filter(|ip| !ip.is_empty()) {
            ctx.set_public_address(ip)?;
        }
        Ok(address)
    }

    /// Ensure the network interface exists. Needs the subnet, security group
    /// and public address to be known.
    pub async fn ensure_interface(
        &self,
        ctx: &mut DeploymentContext,
    ) -> Result<NetworkInterface, OrchestratorError> {
        if let Some(existing) = self
            .backend
            .get_interface(&ctx.resource_group, &ctx.interface_name)
            .await?
        {
            info!("Adopting network interface {}", existing.name);
            ctx.interface_id = Some(existing.id.clone());
            return Ok(existing);
        }

        let spec = InterfaceSpec {
            resource_group: ctx.resource_group.clone(),
            name: ctx.interface_name.clone(),
            location: ctx.location.clone(),
            subnet_id: required(&ctx.subnet_id, "subnet id")?,
            security_group_id: required(&ctx.security_group_id, "security group id")?,
            public_address_id: required(&ctx.public_address_id, "public address id")?,
        };
        info!("Creating network interface {}", spec.name);
        let interface = self.backend.create_interface(&spec).await?;
        ctx.interface_id = Some(interface.id.clone());
        Ok(interface)
    }

    /// Ensure the compute instance exists
    pub async fn ensure_instance(
        &self,
        ctx: &mut DeploymentContext,
    ) -> Result<ComputeInstance, OrchestratorError> {
        if let Some(existing) = self
            .backend
            .get_instance(&ctx.resource_group, &ctx.instance_name)
            .await?
        {
            info!(
                "Adopting instance {} ({})",
                existing.name,
                existing.provisioning_state.as_deref().unwrap_or("unknown")
            );
            ctx.instance_id = Some(existing.id.clone());
            return Ok(existing);
        }

        let ssh_public_key = ctx.ssh_public_key.clone().ok_or_else(|| {
            OrchestratorError::MissingContext("SSH public key for the admin user".to_string())
        })?;
        let spec = InstanceSpec {
            resource_group: ctx.resource_group.clone(),
            name: ctx.instance_name.clone(),
            location: ctx.location.clone(),
            size: ctx.instance_size.clone(),
            image: ctx.image.clone(),
            admin_username: ctx.admin_username.clone(),
            ssh_public_key,
            interface_id: required(&ctx.interface_id, "network interface id")?,
            os_disk_gb: 64,
        };
        info!("Creating instance {} ({})", spec.name, spec.size);
        let instance = self.backend.create_instance(&spec).await?;
        ctx.instance_id = Some(instance.id.clone());
        Ok(instance)
    }

    /// Observe the instance power state once
    pub async fn probe_power_state(&self, resource_group: &str, name: &str) -> Probe {
        match self.backend.get_power_state(resource_group, name).await {
            Ok(PowerState::Running) => Probe::Ready,
            Ok(PowerState::Deallocated) => {
                Probe::Failed(format!("instance {} is deallocated", name))
            }
            Ok(state) => Probe::NotReady(format!("instance {} is {}", name, state)),
            Err(e) if e.is_transient() => Probe::NotReady(e.to_string()),
            Err(e) => Probe::Failed(e.to_string()),
        }
    }

    /// Wait for the instance to reach the running power state
    pub async fn wait_until_running(
        &self,
        ctx: &DeploymentContext,
        options: &ReadinessOptions,
    ) -> Result<(), OrchestratorError> {
        let (group, name) = (ctx.resource_group.as_str(), ctx.instance_name.as_str());
        wait_until_ready(options, || self.probe_power_state(group, name))
            .await
            .into_result(&format!("instance {}", name))
    }

    /// Re-read the public address, which some platforms assign only once the
    /// attached instance is running
    pub async fn refresh_public_address(
        &self,
        ctx: &mut DeploymentContext,
    ) -> Result<(), OrchestratorError> {
        if ctx.has_public_address() {
            return Ok(());
        }
        let address = self
            .backend
            .get_public_address(&ctx.resource_group, &ctx.public_address_name)
            .await?
            .and_then(|a| a.ip_address)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| {
                OrchestratorError::MissingContext(format!(
                    "no address assigned to {} yet",
                    ctx.public_address_name
                ))
            })?;
        ctx.set_public_address(&address)?;
        info!("Public address of {} is {}", ctx.instance_name, address);
        Ok(())
    }

    /// Delete the resource group and everything in it
    pub async fn destroy(&self, ctx: &DeploymentContext) -> Result<(), OrchestratorError> {
        warn!("Deleting resource group {}", ctx.resource_group);
        self.backend.delete_resource_group(&ctx.resource_group).await
    }
}

fn required(value: &Option<String>, what: &str) -> Result<String, OrchestratorError> {
    value
        .clone()
        .ok_or_else(|| OrchestratorError::MissingContext(format!("{} is not known yet", what)))
}
