//! Control-plane backend over the cloud command-line tool
//!
//! Every call runs the CLI locally through a [`RemoteExecutor`] with
//! `--output json` and maps its JSON into the shared models.

use std::sync::Arc;

use async_trait::async_trait;
use control_plane_client::{
    ComputeInstance, InstanceSpec, InterfaceSpec, NetworkInterface, NetworkSpec, PowerState,
    PublicAddress, PublicAddressSpec, ResourceGroup, ResourceGroupSpec, RuleDirection,
    SecurityGroup, SecurityGroupSpec, SecurityRule, VirtualNetwork,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::OrchestratorError;
use crate::provision::ControlPlane;
use crate::remote::{RemoteExecutor, Target};
use crate::storage::settings::CloudSettings;
use crate::utils::shell_quote;

/// CLI invocation backend
pub struct CliBackend {
    executor: Arc<dyn RemoteExecutor>,
    program: String,
    subscription_id: Option<String>,
}

impl CliBackend {
    pub fn new(executor: Arc<dyn RemoteExecutor>, settings: &CloudSettings) -> Self {
        Self {
            executor,
            program: settings.cli_program.clone(),
            subscription_id: Some(settings.subscription_id.clone())
                .filter(|s| !s.trim().is_empty()),
        }
    }

    /// Check the CLI is installed and logged in
    pub async fn verify(&self) -> Result<(), OrchestratorError> {
        self.run_raw(&["account", "show"]).await.map(|_| ())
    }

    fn command_line(&self, args: &[&str]) -> String {
        let mut parts = vec![shell_quote(&self.program)];
        parts.extend(args.iter().map(|a| shell_quote(a)));
        if let Some(subscription) = &self.subscription_id {
            parts.push("--subscription".to_string());
            parts.push(shell_quote(subscription));
        }
        parts.push("--output".to_string());
        parts.push("json".to_string());
        parts.join(" ")
    }

    async fn run_raw(&self, args: &[&str]) -> Result<String, OrchestratorError> {
        let command = self.command_line(args);
        debug!("CLI: {}", command);
        let output = self.executor.execute(&Target::Local, &command).await?;
        Ok(output.stdout)
    }

    async fn run<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, OrchestratorError> {
        let stdout = self.run_raw(args).await?;
        parse_json(&stdout)
    }

    /// Run a `show`-style command; a not-found failure becomes `None`
    async fn show(&self, args: &[&str]) -> Result<Option<Value>, OrchestratorError> {
        match self.run_raw(args).await {
            Ok(stdout) => parse_json(&stdout).map(Some),
            Err(OrchestratorError::CommandFailed { stderr, .. }) if is_not_found(&stderr) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn parse_json<T: DeserializeOwned>(stdout: &str) -> Result<T, OrchestratorError> {
    serde_json::from_str(stdout.trim()).map_err(|e| {
        OrchestratorError::Provision(format!("unexpected CLI output ({}): {}", e, stdout.trim()))
    })
}

/// Whether CLI stderr reports a missing resource
pub fn is_not_found(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    stderr.contains("NotFound")
        || lowered.contains("could not be found")
        || lowered.contains("was not found")
}

/// Unwrap create responses nested under a wrapper key (`newVNet`, `NewNSG`, ...)
fn unwrap_created(value: Value, key: &str) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key(key) => map.remove(key).unwrap_or(Value::Null),
        other => other,
    }
}

fn str_field(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn missing(kind: &str, value: &Value) -> OrchestratorError {
    OrchestratorError::Provision(format!("{} response missing fields: {}", kind, value))
}

#[derive(Debug, Deserialize)]
struct CliGroup {
    id: String,
    name: String,
    location: String,
    #[serde(default)]
    tags: Option<serde_json::Map<String, Value>>,
}

pub fn parse_resource_group(value: Value) -> Result<ResourceGroup, OrchestratorError> {
    let group: CliGroup = serde_json::from_value(value)?;
    Ok(ResourceGroup {
        id: group.id,
        name: group.name,
        location: group.location,
        tags: group.tags.unwrap_or_default(),
    })
}

pub fn parse_network(value: Value) -> Result<VirtualNetwork, OrchestratorError> {
    let value = unwrap_created(value, "newVNet");
    let field = |p: &str| str_field(&value, p).ok_or_else(|| missing("network", &value));
    Ok(VirtualNetwork {
        id: field("/id")?,
        name: field("/name")?,
        location: field("/location")?,
        address_space: field("/addressSpace/addressPrefixes/0")?,
        subnet_id: field("/subnets/0/id")?,
        subnet_name: field("/subnets/0/name")?,
        subnet_prefix: str_field(&value, "/subnets/0/addressPrefix")
            .or_else(|| str_field(&value, "/subnets/0/addressPrefixes/0"))
            .unwrap_or_default(),
    })
}

pub fn parse_security_group(value: Value) -> Result<SecurityGroup, OrchestratorError> {
    let value = unwrap_created(value, "NewNSG");
    let field = |p: &str| str_field(&value, p).ok_or_else(|| missing("security group", &value));
    let rules = value
        .get("securityRules")
        .and_then(Value::as_array)
        .map(|rules| rules.iter().filter_map(parse_rule).collect())
        .unwrap_or_default();
    Ok(SecurityGroup {
        id: field("/id")?,
        name: field("/name")?,
        location: field("/location")?,
        rules,
    })
}

fn parse_rule(value: &Value) -> Option<SecurityRule> {
    let direction = match value.get("direction")?.as_str()? {
        "Outbound" => RuleDirection::Outbound,
        _ => RuleDirection::Inbound,
    };
    Some(SecurityRule {
        name: value.get("name")?.as_str()?.to_string(),
        priority: u16::try_from(value.get("priority")?.as_u64()?).ok()?,
        direction,
        protocol: value.get("protocol")?.as_str()?.to_string(),
        destination_port: value.get("destinationPortRange")?.as_str()?.parse().ok()?,
    })
}

pub fn parse_public_address(value: Value) -> Result<PublicAddress, OrchestratorError> {
    let value = unwrap_created(value, "publicIp");
    let field = |p: &str| str_field(&value, p).ok_or_else(|| missing("public address", &value));
    Ok(PublicAddress {
        id: field("/id")?,
        name: field("/name")?,
        location: field("/location")?,
        ip_address: str_field(&value, "/ipAddress"),
        dns_label: str_field(&value, "/dnsSettings/domainNameLabel"),
    })
}

pub fn parse_interface(value: Value) -> Result<NetworkInterface, OrchestratorError> {
    let value = unwrap_created(value, "NewNIC");
    let field = |p: &str| str_field(&value, p).ok_or_else(|| missing("network interface", &value));
    Ok(NetworkInterface {
        id: field("/id")?,
        name: field("/name")?,
        location: field("/location")?,
        private_ip: str_field(&value, "/ipConfigurations/0/privateIPAddress")
            .or_else(|| str_field(&value, "/ipConfigurations/0/privateIpAddress")),
    })
}

pub fn parse_instance(value: Value) -> Result<ComputeInstance, OrchestratorError> {
    let field = |p: &str| str_field(&value, p).ok_or_else(|| missing("instance", &value));
    Ok(ComputeInstance {
        id: field("/id")?,
        name: field("/name")?,
        location: field("/location")?,
        size: field("/hardwareProfile/vmSize")?,
        provisioning_state: str_field(&value, "/provisioningState"),
    })
}

/// Power state from a `get-instance-view` document
pub fn parse_power_state(value: &Value) -> PowerState {
    value
        .pointer("/instanceView/statuses")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|status| status.get("code").and_then(Value::as_str))
        .find(|code| code.starts_with("PowerState/"))
        .map(PowerState::parse)
        .unwrap_or(PowerState::Unknown)
}

#[async_trait]
impl ControlPlane for CliBackend {
    fn backend_name(&self) -> &'static str {
        "cli"
    }

    async fn get_resource_group(
        &self,
        name: &str,
    ) -> Result<Option<ResourceGroup>, OrchestratorError> {
        self.show(&["group", "show", "--name", name])
            .await?
            .map(parse_resource_group)
            .transpose()
    }

    async fn create_resource_group(
        &self,
        spec: &ResourceGroupSpec,
    ) -> Result<ResourceGroup, OrchestratorError> {
        let value: Value = self
            .run(&[
                "group",
                "create",
                "--name",
                &spec.name,
                "--location",
                &spec.location,
            ])
            .await?;
        parse_resource_group(value)
    }

    async fn get_network(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<VirtualNetwork>, OrchestratorError> {
        self.show(&["network", "vnet", "show", "-g", resource_group, "-n", name])
            .await?
            .map(parse_network)
            .transpose()
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<VirtualNetwork, OrchestratorError> {
        let value: Value = self
            .run(&[
                "network",
                "vnet",
                "create",
                "-g",
                &spec.resource_group,
                "-n",
                &spec.name,
                "-l",
                &spec.location,
                "--address-prefixes",
                &spec.address_space,
                "--subnet-name",
                &spec.subnet_name,
                "--subnet-prefixes",
                &spec.subnet_prefix,
            ])
            .await?;
        parse_network(value)
    }

    async fn get_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<SecurityGroup>, OrchestratorError> {
        self.show(&["network", "nsg", "show", "-g", resource_group, "-n", name])
            .await?
            .map(parse_security_group)
            .transpose()
    }

    async fn create_security_group(
        &self,
        spec: &SecurityGroupSpec,
    ) -> Result<SecurityGroup, OrchestratorError> {
        let value: Value = self
            .run(&[
                "network",
                "nsg",
                "create",
                "-g",
                &spec.resource_group,
                "-n",
                &spec.name,
                "-l",
                &spec.location,
            ])
            .await?;
        let mut group = parse_security_group(value)?;

        for rule in &spec.rules {
            let priority = rule.priority.to_string();
            let port = rule.destination_port.to_string();
            let direction = match rule.direction {
                RuleDirection::Inbound => "Inbound",
                RuleDirection::Outbound => "Outbound",
            };
            let _: Value = self
                .run(&[
                    "network",
                    "nsg",
                    "rule",
                    "create",
                    "-g",
                    &spec.resource_group,
                    "--nsg-name",
                    &spec.name,
                    "-n",
                    &rule.name,
                    "--priority",
                    &priority,
                    "--direction",
                    direction,
                    "--protocol",
                    &rule.protocol,
                    "--destination-port-ranges",
                    &port,
                    "--access",
                    "Allow",
                ])
                .await?;
            group.rules.push(rule.clone());
        }
        Ok(group)
    }

    async fn get_public_address(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<PublicAddress>, OrchestratorError> {
        self.show(&["network", "public-ip", "show", "-g", resource_group, "-n", name])
            .await?
            .map(parse_public_address)
            .transpose()
    }

    async fn create_public_address(
        &self,
        spec: &PublicAddressSpec,
    ) -> Result<PublicAddress, OrchestratorError> {
        let mut args: Vec<&str> = vec![
            "network",
            "public-ip",
            "create",
            "-g",
            &spec.resource_group,
            "-n",
            &spec.name,
            "-l",
            &spec.location,
            "--sku",
            "Standard",
            "--allocation-method",
            "Static",
        ];
        if let Some(label) = &spec.dns_label {
            args.push("--dns-name");
            args.push(label.as_str());
        }
        let value: Value = self.run(&args).await?;
        parse_public_address(value)
    }

    async fn get_interface(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<NetworkInterface>, OrchestratorError> {
        self.show(&["network", "nic", "show", "-g", resource_group, "-n", name])
            .await?
            .map(parse_interface)
            .transpose()
    }

    async fn create_interface(
        &self,
        spec: &InterfaceSpec,
    ) -> Result<NetworkInterface, OrchestratorError> {
        let value: Value = self
            .run(&[
                "network",
                "nic",
                "create",
                "-g",
                &spec.resource_group,
                "-n",
                &spec.name,
                "-l",
                &spec.location,
                "--subnet",
                &spec.subnet_id,
                "--network-security-group",
                &spec.security_group_id,
                "--public-ip-address",
                &spec.public_address_id,
            ])
            .await?;
        parse_interface(value)
    }

    async fn get_instance(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<ComputeInstance>, OrchestratorError> {
        self.show(&["vm", "show", "-g", resource_group, "-n", name])
            .await?
            .map(parse_instance)
            .transpose()
    }

    async fn create_instance(
        &self,
        spec: &InstanceSpec,
    ) -> Result<ComputeInstance, OrchestratorError> {
        let disk = spec.os_disk_gb.to_string();
        let _: Value = self
            .run(&[
                "vm",
                "create",
                "-g",
                &spec.resource_group,
                "-n",
                &spec.name,
                "-l",
                &spec.location,
                "--size",
                &spec.size,
                "--image",
                &spec.image,
                "--admin-username",
                &spec.admin_username,
                "--ssh-key-values",
                &spec.ssh_public_key,
                "--nics",
                &spec.interface_id,
                "--os-disk-size-gb",
                &disk,
            ])
            .await?;
        // `vm create` prints a summary, not the resource
        self.get_instance(&spec.resource_group, &spec.name)
            .await?
            .ok_or_else(|| {
                OrchestratorError::Provision(format!(
                    "instance {} not visible after creation",
                    spec.name
                ))
            })
    }

    async fn get_power_state(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<PowerState, OrchestratorError> {
        let value: Value = self
            .run(&["vm", "get-instance-view", "-g", resource_group, "-n", name])
            .await?;
        Ok(parse_power_state(&value))
    }

    async fn delete_resource_group(&self, name: &str) -> Result<(), OrchestratorError> {
        match self
            .run_raw(&["group", "delete", "--name", name, "--yes"])
            .await
        {
            Ok(_) => Ok(()),
            Err(OrchestratorError::CommandFailed { stderr, .. }) if is_not_found(&stderr) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
