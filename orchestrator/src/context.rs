//! Deployment context
//!
//! Everything needed to address one remote target: resource names, network
//! ranges, generated secrets, and facts discovered while provisioning. One
//! pipeline run owns its context exclusively and steps mutate it in place.

use std::net::IpAddr;
use std::path::PathBuf;

use ipnet::IpNet;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::remote::{SshTarget, Target};
use crate::utils::{generate_secret, sha256_hash};

/// Identifiers and secrets for a single deployment target
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    pub base_name: String,
    pub location: String,
    pub resource_group: String,
    pub network_name: String,
    pub subnet_name: String,
    pub security_group_name: String,
    pub public_address_name: String,
    pub interface_name: String,
    pub instance_name: String,
    pub instance_size: String,
    pub image: String,
    pub address_space: IpNet,
    pub subnet_prefix: IpNet,
    pub admin_username: String,
    pub ssh_public_key: Option<String>,
    pub ssh_identity_file: Option<PathBuf>,
    pub ssh_port: u16,
    pub admin_password: SecretString,
    pub database_password: SecretString,
    pub app_secret_key: SecretString,

    /// Populated by the provisioning steps as resources come into existence
    pub subnet_id: Option<String>,
    pub security_group_id: Option<String>,
    pub public_address_id: Option<String>,
    pub interface_id: Option<String>,
    pub instance_id: Option<String>,

    public_address: Option<IpAddr>,
}

impl DeploymentContext {
    /// Create a context deriving every resource name from `base_name`
    pub fn new(base_name: impl Into<String>, location: impl Into<String>) -> Self {
        let base_name = base_name.into();
        Self {
            location: location.into(),
            resource_group: format!("{}-rg", base_name),
            network_name: format!("{}-vnet", base_name),
            subnet_name: format!("{}-subnet", base_name),
            security_group_name: format!("{}-nsg", base_name),
            public_address_name: format!("{}-ip", base_name),
            interface_name: format!("{}-nic", base_name),
            instance_name: format!("{}-vm", base_name),
            instance_size: "Standard_B2s".to_string(),
            image: "Ubuntu2204".to_string(),
            address_space: default_address_space(),
            subnet_prefix: default_subnet_prefix(),
            admin_username: "stackpilot".to_string(),
            ssh_public_key: None,
            ssh_identity_file: None,
            ssh_port: 22,
            admin_password: SecretString::from(generate_secret()),
            database_password: SecretString::from(generate_secret()),
            app_secret_key: SecretString::from(generate_secret()),
            subnet_id: None,
            security_group_id: None,
            public_address_id: None,
            interface_id: None,
            instance_id: None,
            public_address: None,
            base_name,
        }
    }

    /// Set the network ranges, checking the subnet lies inside the address space
    pub fn with_network(
        mut self,
        address_space: IpNet,
        subnet_prefix: IpNet,
    ) -> Result<Self, OrchestratorError> {
        if !address_space.contains(&subnet_prefix) {
            return Err(OrchestratorError::InvalidAddress(format!(
                "subnet {} is outside address space {}",
                subnet_prefix, address_space
            )));
        }
        self.address_space = address_space;
        self.subnet_prefix = subnet_prefix;
        Ok(self)
    }

    /// Record the public address once the platform has assigned one
    pub fn set_public_address(&mut self, address: &str) -> Result<IpAddr, OrchestratorError> {
        let parsed: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| OrchestratorError::InvalidAddress(address.to_string()))?;
        if parsed.is_unspecified() {
            return Err(OrchestratorError::InvalidAddress(address.to_string()));
        }
        self.public_address = Some(parsed);
        Ok(parsed)
    }

    /// The public address, if already known
    pub fn public_address(&self) -> Result<IpAddr, OrchestratorError> {
        self.public_address.ok_or_else(|| {
            OrchestratorError::MissingContext(format!(
                "public address of {} is not known yet",
                self.instance_name
            ))
        })
    }

    pub fn has_public_address(&self) -> bool {
        self.public_address.is_some()
    }

    /// SSH target for the provisioned instance
    pub fn ssh_target(&self) -> Result<Target, OrchestratorError> {
        let address = self.public_address()?;
        let mut ssh = SshTarget::new(address.to_string(), self.admin_username.clone());
        ssh.port = self.ssh_port;
        ssh.identity_file = self.ssh_identity_file.clone();
        Ok(Target::Ssh(ssh))
    }

    /// Deterministic DNS-safe suffix for globally unique names
    pub fn unique_suffix(&self, scope: &str) -> String {
        let digest = sha256_hash(format!("{}/{}", scope, self.base_name).as_bytes());
        digest[..8].to_string()
    }

    /// DNS label for the public address
    pub fn dns_label(&self, scope: &str) -> String {
        let cleaned: String = self
            .base_name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("{}-{}", cleaned.trim_matches('-'), self.unique_suffix(scope))
    }

    /// Contents of the `.env` file shipped next to the compose file
    pub fn env_file(&self, extra: &[(String, String)]) -> String {
        let mut lines = vec![
            format!("POSTGRES_PASSWORD={}", self.database_password.expose_secret()),
            format!("SECRET_KEY={}", self.app_secret_key.expose_secret()),
        ];
        if let Ok(address) = self.public_address() {
            lines.push(format!("PUBLIC_ADDRESS={}", address));
        }
        for (key, value) in extra {
            lines.push(format!("{}={}", key, value));
        }
        lines.push(String::new());
        lines.join("\n")
    }

    /// Take over the database password and application secret from the
    /// `.env` of an earlier deployment. Returns the keys taken over.
    pub fn adopt_env_secrets(&mut self, existing: &str) -> Vec<&'static str> {
        let mut adopted = Vec::new();
        for line in existing.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                "POSTGRES_PASSWORD" => {
                    self.database_password = SecretString::from(value.to_string());
                    adopted.push("POSTGRES_PASSWORD");
                }
                "SECRET_KEY" => {
                    self.app_secret_key = SecretString::from(value.to_string());
                    adopted.push("SECRET_KEY");
                }
                _ => {}
            }
        }
        adopted
    }

    /// Non-secret facts worth keeping between invocations
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            base_name: self.base_name.clone(),
            location: self.location.clone(),
            resource_group: self.resource_group.clone(),
            instance_name: self.instance_name.clone(),
            admin_username: self.admin_username.clone(),
            ssh_port: self.ssh_port,
            public_address: self.public_address.map(|a| a.to_string()),
        }
    }

    /// Rebuild a context from a stored snapshot. Secrets are regenerated.
    pub fn restore(snapshot: &ContextSnapshot) -> Result<Self, OrchestratorError> {
        let mut ctx = Self::new(snapshot.base_name.clone(), snapshot.location.clone());
        ctx.resource_group = snapshot.resource_group.clone();
        ctx.instance_name = snapshot.instance_name.clone();
        ctx.admin_username = snapshot.admin_username.clone();
        ctx.ssh_port = snapshot.ssh_port;
        if let Some(address) = &snapshot.public_address {
            ctx.set_public_address(address)?;
        }
        Ok(ctx)
    }
}

fn default_address_space() -> IpNet {
    IpNet::V4(ipnet::Ipv4Net::new(std::net::Ipv4Addr::new(10, 0, 0, 0), 16).unwrap_or_default())
}

fn default_subnet_prefix() -> IpNet {
    IpNet::V4(ipnet::Ipv4Net::new(std::net::Ipv4Addr::new(10, 0, 1, 0), 24).unwrap_or_default())
}

/// Persisted form of a [`DeploymentContext`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub base_name: String,
    pub location: String,
    pub resource_group: String,
    pub instance_name: String,
    pub admin_username: String,
    pub ssh_port: u16,
    pub public_address: Option<String>,
}

impl ContextSnapshot {
    pub async fn load(file: &File) -> Result<Self, OrchestratorError> {
        file.read_json().await
    }

    pub async fn save(&self, file: &File) -> Result<(), OrchestratorError> {
        file.write_json(self).await?;
        file.set_permissions_600().await
    }
}
