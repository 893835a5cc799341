//! Scripted fakes shared by the tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use control_plane_client::{
    ComputeInstance, InstanceSpec, InterfaceSpec, NetworkInterface, NetworkSpec, PowerState,
    PublicAddress, PublicAddressSpec, ResourceGroup, ResourceGroupSpec, SecurityGroup,
    SecurityGroupSpec, VirtualNetwork,
};

use stackpilot::deploy::compose::ComposeStack;
use stackpilot::errors::OrchestratorError;
use stackpilot::provision::ControlPlane;
use stackpilot::readiness::ReadinessOptions;
use stackpilot::remote::{CommandOutput, RemoteExecutor, Target};
use stackpilot::storage::settings::AppSettings;

type Responder = Box<dyn Fn(&str) -> Result<CommandOutput, OrchestratorError> + Send + Sync>;

/// Executor answering commands from substring rules.
///
/// The most recently added matching rule wins; unmatched commands succeed
/// with empty output. Every command is recorded.
#[derive(Default)]
pub struct FakeExecutor {
    rules: Mutex<Vec<(String, Responder)>>,
    calls: Mutex<Vec<String>>,
    copies: Mutex<Vec<(String, Vec<u8>, Option<u32>)>>,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on<F>(&self, pattern: &str, responder: F)
    where
        F: Fn(&str) -> Result<CommandOutput, OrchestratorError> + Send + Sync + 'static,
    {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), Box::new(responder)));
    }

    pub fn on_stdout(&self, pattern: &str, stdout: &str) {
        let stdout = stdout.to_string();
        self.on(pattern, move |_| Ok(CommandOutput::from_stdout(stdout.clone())));
    }

    pub fn on_fail(&self, pattern: &str, stderr: &str) {
        let stderr = stderr.to_string();
        self.on(pattern, move |command| Err(command_failed(command, &stderr)));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands containing `pattern`
    pub fn calls_matching(&self, pattern: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }

    /// Index of the first call containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.contains(pattern))
    }

    pub fn copies(&self) -> Vec<(String, Vec<u8>, Option<u32>)> {
        self.copies.lock().unwrap().clone()
    }
}

pub fn command_failed(command: &str, stderr: &str) -> OrchestratorError {
    OrchestratorError::CommandFailed {
        command: command.lines().next().unwrap_or_default().to_string(),
        exit_code: 1,
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn execute(
        &self,
        _target: &Target,
        command: &str,
    ) -> Result<CommandOutput, OrchestratorError> {
        self.calls.lock().unwrap().push(command.to_string());
        let rules = self.rules.lock().unwrap();
        match rules.iter().rev().find(|(pattern, _)| command.contains(pattern)) {
            Some((_, responder)) => responder(command),
            None => Ok(CommandOutput::default()),
        }
    }

    async fn copy_content(
        &self,
        _target: &Target,
        content: &[u8],
        remote_path: &str,
        mode: Option<u32>,
    ) -> Result<(), OrchestratorError> {
        self.copies
            .lock()
            .unwrap()
            .push((remote_path.to_string(), content.to_vec(), mode));
        Ok(())
    }

    async fn interactive(&self, _target: &Target) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

/// `docker compose ps` output with every service of the default settings running
pub const ALL_RUNNING: &str = concat!(
    r#"{"Name":"shop-app-1","Service":"app","State":"running","Health":"healthy","Image":"shop:1.4.2"}"#,
    "\n",
    r#"{"Name":"shop-db-1","Service":"db","State":"running","Health":"healthy","Image":"postgres:16"}"#,
    "\n",
    r#"{"Name":"shop-redis-1","Service":"redis","State":"running","Health":"","Image":"redis:7"}"#,
    "\n"
);

/// `docker compose ps` output with the app container exited
pub const APP_EXITED: &str = concat!(
    r#"{"Name":"shop-app-1","Service":"app","State":"exited","Health":"","Image":"shop:1.5.0"}"#,
    "\n",
    r#"{"Name":"shop-db-1","Service":"db","State":"running","Health":"healthy","Image":"postgres:16"}"#,
    "\n"
);

pub const PS_COMMAND: &str = "ps --all --format json";

pub fn fast_readiness() -> ReadinessOptions {
    ReadinessOptions::new(Duration::from_millis(10), Duration::from_millis(100))
}

pub fn stack(executor: Arc<FakeExecutor>) -> ComposeStack {
    let app = AppSettings::default();
    ComposeStack::new(executor, Target::Local, app.remote_dir, app.project_name)
}

/// In-memory control plane counting create calls
#[derive(Default)]
pub struct FakeControlPlane {
    pub groups: Mutex<HashMap<String, ResourceGroup>>,
    pub networks: Mutex<HashMap<String, VirtualNetwork>>,
    pub security_groups: Mutex<HashMap<String, SecurityGroup>>,
    pub addresses: Mutex<HashMap<String, PublicAddress>>,
    pub interfaces: Mutex<HashMap<String, NetworkInterface>>,
    pub instances: Mutex<HashMap<String, ComputeInstance>>,
    pub creates: Mutex<Vec<String>>,
    pub power_states: Mutex<Vec<PowerState>>,
    /// Address assigned to public addresses on creation
    pub assigned_ip: Option<String>,
}

impl FakeControlPlane {
    pub fn create_count(&self, kind: &str) -> usize {
        self.creates
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.as_str() == kind)
            .count()
    }

    fn record(&self, kind: &str) {
        self.creates.lock().unwrap().push(kind.to_string());
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    fn backend_name(&self) -> &'static str {
        "fake"
    }

    async fn get_resource_group(
        &self,
        name: &str,
    ) -> Result<Option<ResourceGroup>, OrchestratorError> {
        Ok(self.groups.lock().unwrap().get(name).cloned())
    }

    async fn create_resource_group(
        &self,
        spec: &ResourceGroupSpec,
    ) -> Result<ResourceGroup, OrchestratorError> {
        self.record("group");
        let group = ResourceGroup {
            id: format!("/groups/{}", spec.name),
            name: spec.name.clone(),
            location: spec.location.clone(),
            tags: Default::default(),
        };
        self.groups
            .lock()
            .unwrap()
            .insert(spec.name.clone(), group.clone());
        Ok(group)
    }

    async fn get_network(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> Result<Option<VirtualNetwork>, OrchestratorError> {
        Ok(self.networks.lock().unwrap().get(name).cloned())
    }

    async fn create_network(&self, spec: &NetworkSpec) -> Result<VirtualNetwork, OrchestratorError> {
        self.record("network");
        let network = VirtualNetwork {
            id: format!("/networks/{}", spec.name),
            name: spec.name.clone(),
            location: spec.location.clone(),
            address_space: spec.address_space.clone(),
            subnet_id: format!("/networks/{}/subnets/{}", spec.name, spec.subnet_name),
            subnet_name: spec.subnet_name.clone(),
            subnet_prefix: spec.subnet_prefix.clone(),
        };
        self.networks
            .lock()
            .unwrap()
            .insert(spec.name.clone(), network.clone());
        Ok(network)
    }

    async fn get_security_group(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> Result<Option<SecurityGroup>, OrchestratorError> {
        Ok(self.security_groups.lock().unwrap().get(name).cloned())
    }

    async fn create_security_group(
        &self,
        spec: &SecurityGroupSpec,
    ) -> Result<SecurityGroup, OrchestratorError> {
        self.record("security-group");
        let group = SecurityGroup {
            id: format!("/security-groups/{}", spec.name),
            name: spec.name.clone(),
            location: spec.location.clone(),
            rules: spec.rules.clone(),
        };
        self.security_groups
            .lock()
            .unwrap()
            .insert(spec.name.clone(), group.clone());
        Ok(group)
    }

    async fn get_public_address(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> Result<Option<PublicAddress>, OrchestratorError> {
        Ok(self.addresses.lock().unwrap().get(name).cloned())
    }

    async fn create_public_address(
        &self,
        spec: &PublicAddressSpec,
    ) -> Result<PublicAddress, OrchestratorError> {
        self.record("public-address");
        let address = PublicAddress {
            id: format!("/addresses/{}", spec.name),
            name: spec.name.clone(),
            location: spec.location.clone(),
            ip_address: self.assigned_ip.clone(),
            dns_label: spec.dns_label.clone(),
        };
        self.addresses
            .lock()
            .unwrap()
            .insert(spec.name.clone(), address.clone());
        Ok(address)
    }

    async fn get_interface(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> Result<Option<NetworkInterface>, OrchestratorError> {
        Ok(self.interfaces.lock().unwrap().get(name).cloned())
    }

    async fn create_interface(
        &self,
        spec: &InterfaceSpec,
    ) -> Result<NetworkInterface, OrchestratorError> {
        self.record("interface");
        let interface = NetworkInterface {
            id: format!("/interfaces/{}", spec.name),
            name: spec.name.clone(),
            location: spec.location.clone(),
            private_ip: Some("10.0.1.4".to_string()),
        };
        self.interfaces
            .lock()
            .unwrap()
            .insert(spec.name.clone(), interface.clone());
        Ok(interface)
    }

    async fn get_instance(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> Result<Option<ComputeInstance>, OrchestratorError> {
        Ok(self.instances.lock().unwrap().get(name).cloned())
    }

    async fn create_instance(
        &self,
        spec: &InstanceSpec,
    ) -> Result<ComputeInstance, OrchestratorError> {
        self.record("instance");
        let instance = ComputeInstance {
            id: format!("/instances/{}", spec.name),
            name: spec.name.clone(),
            location: spec.location.clone(),
            size: spec.size.clone(),
            provisioning_state: Some("Succeeded".to_string()),
        };
        self.instances
            .lock()
            .unwrap()
            .insert(spec.name.clone(), instance.clone());
        Ok(instance)
    }

    /// Pops scripted states; `Running` once the script is exhausted
    async fn get_power_state(
        &self,
        _resource_group: &str,
        _name: &str,
    ) -> Result<PowerState, OrchestratorError> {
        let mut states = self.power_states.lock().unwrap();
        if states.is_empty() {
            Ok(PowerState::Running)
        } else {
            Ok(states.remove(0))
        }
    }

    async fn delete_resource_group(&self, name: &str) -> Result<(), OrchestratorError> {
        self.groups.lock().unwrap().remove(name);
        Ok(())
    }
}

/// Backup directories on the simulated host: id to metadata, `None` when missing
pub type BackupDirs = Arc<Mutex<HashMap<String, Option<String>>>>;

pub const BACKUP_ROOT: &str = "/opt/stackpilot/backups";

/// Backup id following `<root>/` in a command
pub fn id_after_root(command: &str) -> Option<String> {
    let prefix = format!("{}/", BACKUP_ROOT);
    let start = command.find(&prefix)? + prefix.len();
    let id: String = command[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    Some(id).filter(|id| !id.is_empty())
}

fn metadata_block(metadata: &str) -> String {
    format!(
        "{}\n{}\n{}\n",
        stackpilot::backup::META_BEGIN,
        metadata,
        stackpilot::backup::META_END
    )
}

/// Answer the backup manager's scripts from an in-memory directory listing
pub fn script_backup_host(executor: &FakeExecutor) -> BackupDirs {
    let dirs: BackupDirs = Arc::new(Mutex::new(HashMap::new()));

    let listing = dirs.clone();
    executor.on("for d in", move |_| {
        let dirs = listing.lock().unwrap();
        let mut ids: Vec<&String> = dirs.keys().collect();
        ids.sort();
        let stdout: String = ids
            .into_iter()
            .map(|id| metadata_block(dirs[id].as_deref().unwrap_or_default()))
            .collect();
        Ok(CommandOutput::from_stdout(stdout))
    });

    // The create script also loops over data directories, so it is registered after the listing
    let created = dirs.clone();
    executor.on("pg_dump", move |command| {
        let id = id_after_root(command).unwrap_or_default();
        let template = command
            .split("printf '")
            .nth(1)
            .and_then(|rest| rest.split("\\n'").next())
            .unwrap_or_default();
        let metadata = template.replace("%s", "4096");
        let mut dirs = created.lock().unwrap();
        if dirs.contains_key(&id) {
            return Err(command_failed(command, "backup directory already exists"));
        }
        dirs.insert(id, Some(metadata.clone()));
        Ok(CommandOutput::from_stdout(format!(
            "dumping...\n{}",
            metadata_block(&metadata)
        )))
    });

    let lookup = dirs.clone();
    executor.on("test -d", move |command| {
        let id = id_after_root(command).unwrap_or_default();
        match lookup.lock().unwrap().get(&id) {
            Some(Some(metadata)) => Ok(CommandOutput::from_stdout(metadata_block(metadata))),
            _ => Err(command_failed(command, "")),
        }
    });

    let removal = dirs.clone();
    executor.on(&format!("rm -rf {}/", BACKUP_ROOT), move |command| {
        if let Some(id) = id_after_root(command) {
            removal.lock().unwrap().remove(&id);
        }
        Ok(CommandOutput::default())
    });

    dirs
}
