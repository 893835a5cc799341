//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::logs::LogLevel;
use crate::readiness::ReadinessOptions;
use crate::remote::{SshTarget, Target};

/// stackpilot settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Host the application stack runs on
    #[serde(default)]
    pub target: TargetSettings,

    /// Application stack layout on the target
    #[serde(default)]
    pub app: AppSettings,

    /// Cloud provisioning
    #[serde(default)]
    pub cloud: CloudSettings,

    /// Managed-application control plane, used by local deployments
    #[serde(default)]
    pub managed: Option<ManagedSettings>,

    /// Readiness polling bounds
    #[serde(default)]
    pub readiness: ReadinessSettings,

    /// Update behaviour
    #[serde(default)]
    pub update: UpdateSettings,
}

impl Settings {
    /// SSH target from the configured host, if any
    pub fn ssh_target(&self) -> Result<Target, OrchestratorError> {
        let host = self
            .target
            .host
            .clone()
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| OrchestratorError::ConfigError("target.host is not set".to_string()))?;
        let mut ssh = SshTarget::new(host, self.target.user.clone());
        ssh.port = self.target.port;
        ssh.identity_file = self.target.identity_file.clone();
        Ok(Target::Ssh(ssh))
    }
}

fn default_true() -> bool {
    true
}

/// SSH target settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSettings {
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Bound on SSH connection establishment
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            host: None,
            user: default_user(),
            port: default_port(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Database service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_service")]
    pub service: String,

    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default = "default_db_name")]
    pub name: String,
}

fn default_db_service() -> String {
    "db".to_string()
}

fn default_db_user() -> String {
    "postgres".to_string()
}

fn default_db_name() -> String {
    "app".to_string()
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            service: default_db_service(),
            user: default_db_user(),
            name: default_db_name(),
        }
    }
}

/// Application stack settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Directory on the target holding the compose project
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,

    /// Compose project name
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// Local compose file shipped to the target
    #[serde(default = "default_compose_file")]
    pub compose_file: PathBuf,

    /// Directory on the target holding backups
    #[serde(default = "default_backup_root")]
    pub backup_root: String,

    /// Service whose image tag is the application version
    #[serde(default = "default_app_service")]
    pub app_service: String,

    #[serde(default)]
    pub database: DatabaseSettings,

    /// In-memory store service
    #[serde(default = "default_cache_service")]
    pub cache_service: String,

    /// Data directories, relative to `remote_dir`
    #[serde(default = "default_data_dirs")]
    pub data_dirs: Vec<String>,

    /// Configuration files, relative to `remote_dir`
    #[serde(default = "default_config_files")]
    pub config_files: Vec<String>,

    /// Command run on the target that exits zero when the application is healthy
    #[serde(default = "default_health_command")]
    pub health_command: String,

    /// Commands run inside the app service after containers are up (migrations, cache priming)
    #[serde(default)]
    pub post_update_commands: Vec<String>,
}

fn default_remote_dir() -> String {
    "/opt/stackpilot/app".to_string()
}

fn default_project_name() -> String {
    "stackpilot".to_string()
}

fn default_compose_file() -> PathBuf {
    PathBuf::from("compose.yaml")
}

fn default_backup_root() -> String {
    "/opt/stackpilot/backups".to_string()
}

fn default_app_service() -> String {
    "app".to_string()
}

fn default_cache_service() -> String {
    "redis".to_string()
}

fn default_data_dirs() -> Vec<String> {
    vec!["data".to_string()]
}

fn default_config_files() -> Vec<String> {
    vec!["compose.yaml".to_string(), ".env".to_string()]
}

fn default_health_command() -> String {
    "curl -fsS --max-time 5 http://localhost/health".to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            remote_dir: default_remote_dir(),
            project_name: default_project_name(),
            compose_file: default_compose_file(),
            backup_root: default_backup_root(),
            app_service: default_app_service(),
            database: DatabaseSettings::default(),
            cache_service: default_cache_service(),
            data_dirs: default_data_dirs(),
            config_files: default_config_files(),
            health_command: default_health_command(),
            post_update_commands: Vec::new(),
        }
    }
}

/// Cloud provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    #[serde(default)]
    pub subscription_id: String,

    #[serde(default = "default_location")]
    pub location: String,

    /// Prefix for every resource name
    #[serde(default = "default_base_name")]
    pub base_name: String,

    #[serde(default = "default_instance_size")]
    pub instance_size: String,

    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_admin_username")]
    pub admin_username: String,

    #[serde(default)]
    pub ssh_public_key_path: Option<PathBuf>,

    #[serde(default)]
    pub ssh_private_key_path: Option<PathBuf>,

    /// Base URL of the control-plane REST API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Command-line tool used when the API backend is unavailable
    #[serde(default = "default_cli_program")]
    pub cli_program: String,
}

fn default_location() -> String {
    "eastus".to_string()
}

fn default_base_name() -> String {
    "stackpilot".to_string()
}

fn default_instance_size() -> String {
    "Standard_B2s".to_string()
}

fn default_image() -> String {
    "Ubuntu2204".to_string()
}

fn default_admin_username() -> String {
    "stackpilot".to_string()
}

fn default_api_base_url() -> String {
    "https://management.azure.com".to_string()
}

fn default_cli_program() -> String {
    "az".to_string()
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            location: default_location(),
            base_name: default_base_name(),
            instance_size: default_instance_size(),
            image: default_image(),
            admin_username: default_admin_username(),
            ssh_public_key_path: None,
            ssh_private_key_path: None,
            api_base_url: default_api_base_url(),
            cli_program: default_cli_program(),
        }
    }
}

/// Managed-application control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedSettings {
    pub base_url: String,
    pub application_id: String,
}

/// Readiness polling settings, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessSettings {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_instance_deadline")]
    pub instance_deadline_secs: u64,

    #[serde(default = "default_ssh_deadline")]
    pub ssh_deadline_secs: u64,

    #[serde(default = "default_services_deadline")]
    pub services_deadline_secs: u64,

    #[serde(default = "default_deployment_deadline")]
    pub deployment_deadline_secs: u64,
}

fn default_interval() -> u64 {
    5
}

fn default_instance_deadline() -> u64 {
    600
}

fn default_ssh_deadline() -> u64 {
    300
}

fn default_services_deadline() -> u64 {
    300
}

fn default_deployment_deadline() -> u64 {
    900
}

impl ReadinessSettings {
    fn options(&self, deadline_secs: u64) -> ReadinessOptions {
        ReadinessOptions::new(
            Duration::from_secs(self.interval_secs.max(1)),
            Duration::from_secs(deadline_secs),
        )
    }

    pub fn instance(&self) -> ReadinessOptions {
        self.options(self.instance_deadline_secs)
    }

    pub fn ssh(&self) -> ReadinessOptions {
        self.options(self.ssh_deadline_secs)
    }

    pub fn services(&self) -> ReadinessOptions {
        self.options(self.services_deadline_secs)
    }

    pub fn deployment(&self) -> ReadinessOptions {
        self.options(self.deployment_deadline_secs)
    }
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            instance_deadline_secs: default_instance_deadline(),
            ssh_deadline_secs: default_ssh_deadline(),
            services_deadline_secs: default_services_deadline(),
            deployment_deadline_secs: default_deployment_deadline(),
        }
    }
}

/// Update settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// Restore the pre-update backup when the update or its verification fails
    #[serde(default = "default_true")]
    pub auto_rollback: bool,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            auto_rollback: true,
        }
    }
}
