//! Command dispatch

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::{info, warn};

use crate::app::options::{AppOptions, BackupAction, Command};
use crate::backup::{BackupKind, BackupManager};
use crate::console;
use crate::context::{ContextSnapshot, DeploymentContext};
use crate::deploy::compose::ComposeStack;
use crate::deploy::{DeploySession, Environment, ManagedDeployment};
use crate::errors::OrchestratorError;
use crate::events::Emitter;
use crate::http::client::HttpClient;
use crate::provision::{self, Provisioner};
use crate::remote::{ExecutorOptions, RemoteExecutor, ShellExecutor, Target};
use crate::status;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::update::{UpdateController, UpdateOptions};

/// Environment variable holding the managed-application API token
pub const MANAGED_TOKEN_ENV_VAR: &str = "STACKPILOT_MANAGED_TOKEN";

/// Run one command to completion
pub async fn run(
    options: AppOptions,
    settings: Settings,
    layout: StorageLayout,
    emitter: Emitter,
) -> Result<(), OrchestratorError> {
    let executor: Arc<dyn RemoteExecutor> = Arc::new(ShellExecutor::new(ExecutorOptions {
        connect_timeout: Duration::from_secs(settings.target.connect_timeout_secs),
        ..Default::default()
    }));

    match options.command {
        Command::Deploy(environment) => {
            deploy(environment, &settings, &layout, executor, &emitter).await
        }
        Command::Update { auto_rollback } => {
            let stack = stack_for(&settings, &layout, executor).await?;
            let backups = backup_manager(&settings, stack.clone());
            let controller = UpdateController::new(
                stack,
                backups,
                settings.app.clone(),
                UpdateOptions {
                    auto_rollback: auto_rollback.unwrap_or(settings.update.auto_rollback),
                    readiness: settings.readiness.services(),
                },
            );
            let report = controller.run(&emitter).await?;
            info!("Update finished in state {:?}", report.final_state);
            Ok(())
        }
        Command::Backup(action) => {
            let stack = stack_for(&settings, &layout, executor).await?;
            let backups = backup_manager(&settings, stack);
            match action {
                BackupAction::Create => {
                    let record = backups.create(BackupKind::Manual).await?;
                    emitter
                        .success(format!("Backup {} created at {}", record.id, record.storage_path))
                        .await;
                }
                BackupAction::List => console::print_backups(&backups.list().await?),
                BackupAction::Restore(id) => {
                    let record = backups.restore(&id).await?;
                    emitter
                        .success(format!("Restored backup {}", record.id))
                        .await;
                }
                BackupAction::Delete(id) => {
                    backups.delete(&id).await?;
                    emitter.success(format!("Deleted backup {}", id)).await;
                }
            }
            Ok(())
        }
        Command::Status => {
            let stack = stack_for(&settings, &layout, executor).await?;
            console::print_status(&status::collect(&stack).await?);
            Ok(())
        }
        Command::Destroy => {
            let ctx = match stored_context(&layout).await {
                Some(ctx) => ctx,
                None => base_context(&settings).await?,
            };
            let backend = provision::connect(&settings.cloud, executor).await?;
            Provisioner::new(backend).destroy(&ctx).await?;
            layout.context_file().delete().await?;
            emitter
                .success(format!("Deleted resource group {}", ctx.resource_group))
                .await;
            Ok(())
        }
        Command::Shell => {
            let target = resolve_target(&settings, &layout).await?;
            executor.interactive(&target).await
        }
    }
}

async fn deploy(
    environment: Environment,
    settings: &Settings,
    layout: &StorageLayout,
    executor: Arc<dyn RemoteExecutor>,
    emitter: &Emitter,
) -> Result<(), OrchestratorError> {
    let compose_content = tokio::fs::read_to_string(&settings.app.compose_file)
        .await
        .map_err(|e| {
            OrchestratorError::ConfigError(format!(
                "cannot read {}: {}",
                settings.app.compose_file.display(),
                e
            ))
        })?;
    let ctx = base_context(settings).await?;
    let session = DeploySession::new(
        ctx,
        executor.clone(),
        settings.app.clone(),
        settings.readiness.clone(),
        compose_content,
    );

    let mut session = match environment {
        Environment::CloudVm => {
            let backend = provision::connect(&settings.cloud, executor).await?;
            session.with_provisioner(Provisioner::new(backend), settings.cloud.subscription_id.clone())
        }
        Environment::SshHost => session.with_target(settings.ssh_target()?),
        Environment::Local => {
            let session = session.with_target(Target::Local);
            match &settings.managed {
                Some(managed) => {
                    let token = std::env::var(MANAGED_TOKEN_ENV_VAR).ok().map(SecretString::from);
                    session.with_managed(ManagedDeployment {
                        client: HttpClient::new(&managed.base_url, token)?,
                        application_id: managed.application_id.clone(),
                    })
                }
                None => session,
            }
        }
    };

    let run = environment.pipeline().run(&mut session, emitter).await;

    if environment == Environment::CloudVm {
        // Kept even on failure so `destroy` and later commands find the resources
        if let Err(e) = session.ctx.snapshot().save(&layout.context_file()).await {
            warn!("Could not save deployment context: {}", e);
        }
    }

    run.into_result()?;
    emitter.success("Deployment complete").await;
    Ok(())
}

/// Context named after the cloud settings, with the SSH key material loaded
async fn base_context(settings: &Settings) -> Result<DeploymentContext, OrchestratorError> {
    let cloud = &settings.cloud;
    let mut ctx = DeploymentContext::new(cloud.base_name.clone(), cloud.location.clone());
    ctx.instance_size = cloud.instance_size.clone();
    ctx.image = cloud.image.clone();
    ctx.admin_username = cloud.admin_username.clone();
    ctx.ssh_identity_file = cloud.ssh_private_key_path.clone();
    if let Some(path) = &cloud.ssh_public_key_path {
        let key = tokio::fs::read_to_string(path).await.map_err(|e| {
            OrchestratorError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        ctx.ssh_public_key = Some(key.trim().to_string());
    }
    Ok(ctx)
}

async fn stored_context(layout: &StorageLayout) -> Option<DeploymentContext> {
    let file = layout.context_file();
    if !file.exists().await {
        return None;
    }
    match ContextSnapshot::load(&file).await {
        Ok(snapshot) => DeploymentContext::restore(&snapshot)
            .map_err(|e| warn!("Ignoring stored context: {}", e))
            .ok(),
        Err(e) => {
            warn!("Ignoring unreadable context file: {}", e);
            None
        }
    }
}

/// Configured host, else the host recorded by the last cloud deployment
async fn resolve_target(
    settings: &Settings,
    layout: &StorageLayout,
) -> Result<Target, OrchestratorError> {
    if settings.target.host.is_some() {
        return settings.ssh_target();
    }
    match stored_context(layout).await {
        Some(mut ctx) => {
            ctx.ssh_identity_file = settings.cloud.ssh_private_key_path.clone();
            ctx.ssh_target()
        }
        None => Err(OrchestratorError::ConfigError(
            "no target.host configured and no deployment recorded".to_string(),
        )),
    }
}

async fn stack_for(
    settings: &Settings,
    layout: &StorageLayout,
    executor: Arc<dyn RemoteExecutor>,
) -> Result<ComposeStack, OrchestratorError> {
    let target = resolve_target(settings, layout).await?;
    Ok(ComposeStack::new(
        executor,
        target,
        settings.app.remote_dir.clone(),
        settings.app.project_name.clone(),
    ))
}

fn backup_manager(settings: &Settings, stack: ComposeStack) -> BackupManager {
    BackupManager::new(stack, settings.app.clone(), settings.readiness.services())
}
