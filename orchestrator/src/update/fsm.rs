//! Finite state machine for one update run

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// Update state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateState {
    /// Nothing done yet
    Idle,

    /// Taking the pre-update backup
    BackingUp,

    /// Pulling images, recreating containers, running migrations
    Updating,

    /// Checking the updated stack
    Verifying,

    /// Updated and verified
    Completed,

    /// Restoring the pre-update backup
    RollingBack,

    /// Restored to the pre-update backup
    RolledBack,

    /// The restore failed too
    RollbackFailed,

    /// Failed and left as is
    Failed,
}

impl UpdateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpdateState::Completed
                | UpdateState::RolledBack
                | UpdateState::RollbackFailed
                | UpdateState::Failed
        )
    }
}

/// Update event
#[derive(Debug, Clone)]
pub enum UpdateEvent {
    /// Begin the update
    Start,

    BackupCreated(String),

    BackupFailed(String),

    /// Images pulled, containers recreated, post-update commands run
    Applied,

    ApplyFailed(String),

    Verified,

    VerificationFailed(String),

    /// Restore the pre-update backup after a failure
    Rollback,

    RollbackSucceeded,

    RollbackFailed(String),
}

/// Update FSM
#[derive(Debug, Clone)]
pub struct UpdateFsm {
    state: UpdateState,
    backup_id: Option<String>,
    error: Option<String>,
    rollback_error: Option<String>,
}

impl UpdateFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self {
            state: UpdateState::Idle,
            backup_id: None,
            error: None,
            rollback_error: None,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Id of the pre-update backup, once taken
    pub fn backup_id(&self) -> Option<&str> {
        self.backup_id.as_deref()
    }

    /// Why the update failed, if it did
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn rollback_error(&self) -> Option<&str> {
        self.rollback_error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: UpdateEvent) -> Result<UpdateState, OrchestratorError> {
        let new_state = match (&self.state, &event) {
            (UpdateState::Idle, UpdateEvent::Start) => UpdateState::BackingUp,

            (UpdateState::BackingUp, UpdateEvent::BackupCreated(id)) => {
                self.backup_id = Some(id.clone());
                UpdateState::Updating
            }
            (UpdateState::BackingUp, UpdateEvent::BackupFailed(err)) => {
                self.error = Some(err.clone());
                UpdateState::Failed
            }

            (UpdateState::Updating, UpdateEvent::Applied) => UpdateState::Verifying,
            (UpdateState::Updating, UpdateEvent::ApplyFailed(err))
            | (UpdateState::Verifying, UpdateEvent::VerificationFailed(err)) => {
                self.error = Some(err.clone());
                UpdateState::Failed
            }

            (UpdateState::Verifying, UpdateEvent::Verified) => UpdateState::Completed,

            // Only a failure after the backup was taken can be rolled back
            (UpdateState::Failed, UpdateEvent::Rollback) if self.backup_id.is_some() => {
                UpdateState::RollingBack
            }

            (UpdateState::RollingBack, UpdateEvent::RollbackSucceeded) => UpdateState::RolledBack,
            (UpdateState::RollingBack, UpdateEvent::RollbackFailed(err)) => {
                self.rollback_error = Some(err.clone());
                UpdateState::RollbackFailed
            }

            (state, event) => {
                return Err(OrchestratorError::InvalidTransition(format!(
                    "{:?} -> {:?}",
                    state, event
                )));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for UpdateFsm {
    fn default() -> Self {
        Self::new()
    }
}
