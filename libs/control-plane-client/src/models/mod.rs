//! API models

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod deployment;

pub use deployment::{
    ApplicationDeployment, DeploymentDetail, DeploymentListResponse, DeploymentLogLine,
    DeploymentStatus,
};

/// Resource group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub tags: serde_json::Map<String, serde_json::Value>,
}

/// Resource group creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroupSpec {
    pub name: String,
    pub location: String,
}

/// Virtual network with its single application subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualNetwork {
    pub id: String,
    pub name: String,
    pub location: String,
    pub address_space: String,
    pub subnet_id: String,
    pub subnet_name: String,
    pub subnet_prefix: String,
}

/// Virtual network creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub resource_group: String,
    pub name: String,
    pub location: String,
    pub address_space: String,
    pub subnet_name: String,
    pub subnet_prefix: String,
}

/// Direction of a security rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDirection {
    Inbound,
    Outbound,
}

/// A single allow rule in a security group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub name: String,
    pub priority: u16,
    pub direction: RuleDirection,
    pub protocol: String,
    pub destination_port: u16,
}

/// Network security group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub rules: Vec<SecurityRule>,
}

/// Network security group creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    pub resource_group: String,
    pub name: String,
    pub location: String,
    pub rules: Vec<SecurityRule>,
}

/// Public IP address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAddress {
    pub id: String,
    pub name: String,
    pub location: String,
    /// Allocated address; absent until the platform assigns one
    pub ip_address: Option<String>,
    pub dns_label: Option<String>,
}

/// Public IP address creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAddressSpec {
    pub resource_group: String,
    pub name: String,
    pub location: String,
    pub dns_label: Option<String>,
}

/// Network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub id: String,
    pub name: String,
    pub location: String,
    pub private_ip: Option<String>,
}

/// Network interface creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSpec {
    pub resource_group: String,
    pub name: String,
    pub location: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub public_address_id: String,
}

/// Compute instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeInstance {
    pub id: String,
    pub name: String,
    pub location: String,
    pub size: String,
    #[serde(default)]
    pub provisioning_state: Option<String>,
}

/// Compute instance creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceSpec {
    pub resource_group: String,
    pub name: String,
    pub location: String,
    pub size: String,
    pub image: String,
    pub admin_username: String,
    pub ssh_public_key: String,
    pub interface_id: String,
    pub os_disk_gb: u32,
}

/// Power state of a compute instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Deallocated,
    #[serde(other)]
    Unknown,
}

impl PowerState {
    /// Parse a power state as reported by the platform, e.g. `PowerState/running`
    /// or `VM running`.
    pub fn parse(raw: &str) -> Self {
        let lowered = raw.to_lowercase();
        let code = lowered
            .rsplit(|c| c == '/' || c == ' ')
            .next()
            .unwrap_or_default();
        match code {
            "starting" => PowerState::Starting,
            "running" => PowerState::Running,
            "stopping" => PowerState::Stopping,
            "stopped" => PowerState::Stopped,
            "deallocated" | "deallocating" => PowerState::Deallocated,
            _ => PowerState::Unknown,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerState::Starting => "starting",
            PowerState::Running => "running",
            PowerState::Stopping => "stopping",
            PowerState::Stopped => "stopped",
            PowerState::Deallocated => "deallocated",
            PowerState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}
