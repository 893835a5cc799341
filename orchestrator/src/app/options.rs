//! Command-line options

use std::collections::HashMap;
use std::path::PathBuf;

use crate::deploy::Environment;
use crate::errors::OrchestratorError;

/// What to do with a backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupAction {
    Create,
    List,
    Restore(String),
    Delete(String),
}

/// Top-level command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Deploy(Environment),
    Update { auto_rollback: Option<bool> },
    Backup(BackupAction),
    Status,
    Destroy,
    Shell,
}

/// Parsed invocation
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub command: Command,

    /// Settings file overriding the default location
    pub settings_file: Option<PathBuf>,

    /// Show debug events on the console
    pub verbose: bool,
}

/// Split arguments into positionals and `--key=value` / `--flag` pairs
pub fn split_args(args: &[String]) -> (Vec<String>, HashMap<String, String>) {
    let mut positional = Vec::new();
    let mut flags = HashMap::new();
    for arg in args {
        if let Some(stripped) = arg.strip_prefix("--") {
            match stripped.split_once('=') {
                Some((key, value)) => flags.insert(key.to_string(), value.to_string()),
                None => flags.insert(stripped.to_string(), "true".to_string()),
            };
        } else {
            positional.push(arg.clone());
        }
    }
    (positional, flags)
}

fn required_id(flags: &HashMap<String, String>) -> Result<String, OrchestratorError> {
    flags
        .get("id")
        .filter(|id| !id.is_empty())
        .cloned()
        .ok_or_else(|| OrchestratorError::ConfigError("--id=<backup id> is required".to_string()))
}

impl AppOptions {
    pub fn parse(args: &[String]) -> Result<Self, OrchestratorError> {
        let (positional, flags) = split_args(args);
        let name = positional
            .first()
            .map(String::as_str)
            .ok_or_else(|| OrchestratorError::ConfigError("no command given".to_string()))?;

        let command = match name {
            "deploy" => Command::Deploy(
                flags
                    .get("env")
                    .map(String::as_str)
                    .unwrap_or("ssh")
                    .parse()?,
            ),
            "update" => Command::Update {
                auto_rollback: flags.contains_key("no-rollback").then_some(false),
            },
            "backup" => Command::Backup(match positional.get(1).map(String::as_str) {
                Some("create") | None => BackupAction::Create,
                Some("list") => BackupAction::List,
                Some("restore") => BackupAction::Restore(required_id(&flags)?),
                Some("delete") => BackupAction::Delete(required_id(&flags)?),
                Some(other) => {
                    return Err(OrchestratorError::ConfigError(format!(
                        "unknown backup action '{}'",
                        other
                    )))
                }
            }),
            "status" => Command::Status,
            "destroy" => Command::Destroy,
            "shell" => Command::Shell,
            other => {
                return Err(OrchestratorError::ConfigError(format!(
                    "unknown command '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            command,
            settings_file: flags.get("config").map(PathBuf::from),
            verbose: flags.contains_key("verbose"),
        })
    }
}
