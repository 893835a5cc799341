//! Error types for stackpilot

use thiserror::Error;

/// Main error type for stackpilot
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// The executor could not reach the target at all
    #[error("Transport error: {0}")]
    Transport(String),

    /// The command ran on the target but exited non-zero
    #[error("Command `{command}` failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("Step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<OrchestratorError>,
    },

    /// The change was applied but the post-change checks did not pass
    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Backup metadata error: {0}")]
    Metadata(String),

    #[error("Provisioning error: {0}")]
    Provision(String),

    #[error("No control-plane backend available: {0}")]
    BackendUnavailable(String),

    #[error("Invalid network address: {0}")]
    InvalidAddress(String),

    #[error("Missing deployment context: {0}")]
    MissingContext(String),

    /// Update failure, optionally paired with the failure of the rollback that followed
    #[error("{}", format_update_failure(.phase, .cause, .rollback.as_deref()))]
    Update {
        phase: String,
        cause: Box<OrchestratorError>,
        rollback: Option<Box<OrchestratorError>>,
    },

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Wrap an error with the name of the step that produced it
    pub fn in_step(step: impl Into<String>, source: OrchestratorError) -> Self {
        OrchestratorError::Step {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Whether a retry of the same operation could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            OrchestratorError::Transport(_) => true,
            OrchestratorError::HttpError(e) => e.is_connect() || e.is_timeout(),
            OrchestratorError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

fn format_update_failure(
    phase: &str,
    cause: &OrchestratorError,
    rollback: Option<&OrchestratorError>,
) -> String {
    match rollback {
        Some(rollback) => format!(
            "Update failed during {phase}: {cause}; rollback also failed: {rollback}"
        ),
        None => format!("Update failed during {phase}: {cause}"),
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(format!("{:#}", err))
    }
}
