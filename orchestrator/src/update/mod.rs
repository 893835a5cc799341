//! Snapshot, mutate, verify, and undo on failure
//!
//! [`UpdateController::run`] takes a pre-update backup, applies the update
//! through a [`Pipeline`], verifies the result and, when enabled, restores
//! the backup if either the update or its verification failed.

use tracing::{error, info, warn};

use crate::backup::{BackupKind, BackupManager};
use crate::deploy::compose::{services_probe, ComposeStack};
use crate::errors::OrchestratorError;
use crate::events::Emitter;
use crate::pipeline::{Pipeline, PipelineRun, StepDefinition, StepResult};
use crate::readiness::{Probe, ReadinessOptions};
use crate::storage::settings::AppSettings;

pub mod fsm;

pub use fsm::{UpdateEvent, UpdateFsm, UpdateState};

/// Update options
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Restore the pre-update backup on failure
    pub auto_rollback: bool,

    /// Bound on waiting for services after recreation
    pub readiness: ReadinessOptions,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            auto_rollback: true,
            readiness: ReadinessOptions::default(),
        }
    }
}

/// State shared by the update steps
pub struct UpdateSession {
    pub stack: ComposeStack,
    pub app_service: String,
    pub post_update_commands: Vec<String>,
    pub readiness: ReadinessOptions,
}

/// Steps applying an update to a running stack
pub fn update_pipeline() -> Pipeline<UpdateSession> {
    Pipeline::new("update")
        .step(StepDefinition::new(
            "pull-images",
            "Pulling newest images",
            |s: &mut UpdateSession, _em| Box::pin(async move { s.stack.pull().await }),
        ))
        .step(StepDefinition::new(
            "recreate-containers",
            "Recreating containers",
            |s: &mut UpdateSession, _em| Box::pin(async move { s.stack.recreate().await }),
        ))
        .step(StepDefinition::new(
            "wait-services",
            "Waiting for services to run",
            |s: &mut UpdateSession, _em| {
                Box::pin(async move { s.stack.wait_running(&s.readiness).await })
            },
        ))
        .step(StepDefinition::new(
            "post-update-commands",
            "Running migrations and post-update commands",
            |s: &mut UpdateSession, em| {
                Box::pin(async move {
                    for command in &s.post_update_commands {
                        em.info(format!("Running `{}`", command)).await;
                        s.stack.exec(&s.app_service, command).await?;
                    }
                    Ok(())
                })
            },
        ))
}

/// Outcome of a successful update
#[derive(Debug)]
pub struct UpdateReport {
    /// Pre-update backup, kept for a manual rollback later
    pub backup_id: String,
    pub final_state: UpdateState,
    pub steps: Vec<StepResult>,
}

/// Drives one update with optional automatic rollback
pub struct UpdateController {
    stack: ComposeStack,
    backups: BackupManager,
    app: AppSettings,
    options: UpdateOptions,
}

impl UpdateController {
    pub fn new(
        stack: ComposeStack,
        backups: BackupManager,
        app: AppSettings,
        options: UpdateOptions,
    ) -> Self {
        Self {
            stack,
            backups,
            app,
            options,
        }
    }

    /// Check the updated stack: every container running and the health command passing
    pub async fn verify(&self) -> Result<(), OrchestratorError> {
        let services = self.stack.ps().await?;
        if let Probe::NotReady(reason) | Probe::Failed(reason) = services_probe(&services) {
            return Err(OrchestratorError::Verification(reason));
        }

        self.stack
            .executor()
            .execute(self.stack.target(), &self.app.health_command)
            .await
            .map_err(|e| OrchestratorError::Verification(format!("health check failed: {}", e)))?;
        Ok(())
    }

    /// Run the update protocol
    pub async fn run(&self, emitter: &Emitter) -> Result<UpdateReport, OrchestratorError> {
        let mut fsm = UpdateFsm::new();
        fsm.process(UpdateEvent::Start)?;

        emitter.info("Creating pre-update backup").await;
        let backup = match self.backups.create(BackupKind::PreUpdate).await {
            Ok(backup) => backup,
            Err(e) => {
                fsm.process(UpdateEvent::BackupFailed(e.to_string()))?;
                emitter
                    .error(format!("Pre-update backup failed, nothing was changed: {}", e))
                    .await;
                return Err(OrchestratorError::Update {
                    phase: "backup".to_string(),
                    cause: Box::new(e),
                    rollback: None,
                });
            }
        };
        fsm.process(UpdateEvent::BackupCreated(backup.id.clone()))?;
        emitter
            .success(format!("Backup {} created", backup.id))
            .await;

        let mut session = UpdateSession {
            stack: self.stack.clone(),
            app_service: self.app.app_service.clone(),
            post_update_commands: self.app.post_update_commands.clone(),
            readiness: self.options.readiness,
        };
        let PipelineRun { results, error, .. } =
            update_pipeline().run(&mut session, emitter).await;

        let (phase, cause) = match error {
            Some(e) => {
                fsm.process(UpdateEvent::ApplyFailed(e.to_string()))?;
                ("update", e)
            }
            None => {
                fsm.process(UpdateEvent::Applied)?;
                emitter.info("Verifying updated stack").await;
                match self.verify().await {
                    Ok(()) => {
                        let final_state = fsm.process(UpdateEvent::Verified)?;
                        emitter
                            .success(format!(
                                "Update verified; backup {} kept for manual rollback",
                                backup.id
                            ))
                            .await;
                        info!("Update completed");
                        return Ok(UpdateReport {
                            backup_id: backup.id,
                            final_state,
                            steps: results,
                        });
                    }
                    Err(e) => {
                        fsm.process(UpdateEvent::VerificationFailed(e.to_string()))?;
                        emitter
                            .error(format!("Update applied but verification failed: {}", e))
                            .await;
                        ("verification", e)
                    }
                }
            }
        };

        let rollback = if self.options.auto_rollback {
            fsm.process(UpdateEvent::Rollback)?;
            emitter
                .warning(format!("Rolling back to backup {}", backup.id))
                .await;
            match self.backups.restore(&backup.id).await {
                Ok(_) => {
                    fsm.process(UpdateEvent::RollbackSucceeded)?;
                    emitter
                        .success(format!("Rolled back to backup {}", backup.id))
                        .await;
                    None
                }
                Err(e) => {
                    fsm.process(UpdateEvent::RollbackFailed(e.to_string()))?;
                    emitter.error(format!("Rollback failed: {}", e)).await;
                    Some(Box::new(e))
                }
            }
        } else {
            warn!("Automatic rollback disabled, stack left as is");
            emitter
                .warning(format!(
                    "Automatic rollback disabled; restore backup {} manually",
                    backup.id
                ))
                .await;
            None
        };

        error!("Update ended in state {:?}", fsm.state());
        Err(OrchestratorError::Update {
            phase: phase.to_string(),
            cause: Box::new(cause),
            rollback,
        })
    }
}
