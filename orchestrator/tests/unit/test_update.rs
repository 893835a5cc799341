//! Update controller tests: backup, apply, verify, roll back

use std::sync::Arc;

use stackpilot::backup::BackupManager;
use stackpilot::errors::OrchestratorError;
use stackpilot::events::{self, Emitter, Event, Severity};
use stackpilot::storage::settings::AppSettings;
use stackpilot::update::{UpdateController, UpdateOptions, UpdateState};

use crate::support::{
    fast_readiness, script_backup_host, stack, BackupDirs, FakeExecutor, ALL_RUNNING, APP_EXITED,
    PS_COMMAND,
};

const HEALTH: &str = "curl -fsS";

fn controller(auto_rollback: bool, app: AppSettings) -> (Arc<FakeExecutor>, BackupDirs, UpdateController) {
    let executor = FakeExecutor::new();
    executor.on_stdout(PS_COMMAND, ALL_RUNNING);
    let dirs = script_backup_host(&executor);
    let stack = stack(executor.clone());
    let backups = BackupManager::new(stack.clone(), app.clone(), fast_readiness());
    let options = UpdateOptions {
        auto_rollback,
        readiness: fast_readiness(),
    };
    (executor, dirs, UpdateController::new(stack, backups, app, options))
}

fn only_backup(dirs: &BackupDirs) -> String {
    let dirs = dirs.lock().unwrap();
    assert_eq!(dirs.len(), 1);
    dirs.keys().next().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_successful_update_keeps_backup() {
    let mut app = AppSettings::default();
    app.post_update_commands = vec!["python manage.py migrate".to_string()];
    let (executor, dirs, controller) = controller(true, app);

    let report = controller.run(&Emitter::noop()).await.unwrap();

    assert_eq!(report.final_state, UpdateState::Completed);
    assert_eq!(report.backup_id, only_backup(&dirs));
    let steps: Vec<&str> = report.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        steps,
        vec!["pull-images", "recreate-containers", "wait-services", "post-update-commands"]
    );

    let backup = executor.position("pg_dump").unwrap();
    let pull = executor.position("pull --quiet").unwrap();
    let recreate = executor.position("--force-recreate").unwrap();
    let migrate = executor
        .position("exec -T app sh -c 'python manage.py migrate'")
        .unwrap();
    let health = executor.position(HEALTH).unwrap();
    assert!(backup < pull && pull < recreate && recreate < migrate && migrate < health);
    assert!(executor.position("test -d").is_none());
}

#[tokio::test]
async fn test_failed_health_check_rolls_back() {
    let (executor, dirs, controller) = controller(true, AppSettings::default());
    executor.on_fail(HEALTH, "curl: (7) Failed to connect");
    let (emitter, mut receiver) = events::channel(events::DEFAULT_CAPACITY);

    let err = controller.run(&emitter).await.unwrap_err();
    drop(emitter);

    match &err {
        OrchestratorError::Update {
            phase,
            cause,
            rollback,
        } => {
            assert_eq!(phase, "verification");
            assert!(matches!(**cause, OrchestratorError::Verification(_)));
            assert!(rollback.is_none());
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // The restore targeted the backup taken by this run
    let id = only_backup(&dirs);
    let lookup = executor.calls_matching("test -d");
    assert_eq!(lookup.len(), 1);
    assert!(lookup[0].contains(&id));
    assert!(executor.position(HEALTH) < executor.position("psql"));

    let mut messages = Vec::new();
    while let Some(event) = receiver.recv().await {
        if let Event::Log(log) = event {
            messages.push((log.level, log.message));
        }
    }
    assert!(messages
        .iter()
        .any(|(level, m)| *level == Severity::Error && m.contains("verification failed")));
    assert!(messages
        .iter()
        .any(|(level, m)| *level == Severity::Success && m.contains("Rolled back")));
}

#[tokio::test]
async fn test_failed_rollback_reports_both_causes() {
    let (executor, _dirs, controller) = controller(true, AppSettings::default());
    executor.on_fail(HEALTH, "connection refused");
    executor.on_fail("psql", "ERROR: database is being accessed");

    let err = controller.run(&Emitter::noop()).await.unwrap_err();

    match &err {
        OrchestratorError::Update { rollback, .. } => {
            assert!(matches!(
                rollback.as_deref(),
                Some(OrchestratorError::CommandFailed { .. })
            ));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let text = err.to_string();
    assert!(text.contains("connection refused"));
    assert!(text.contains("database is being accessed"));
    assert!(text.contains("rollback also failed"));
}

#[tokio::test(start_paused = true)]
async fn test_services_never_running_fails_update_phase() {
    let (executor, _dirs, controller) = controller(true, AppSettings::default());
    executor.on_stdout(PS_COMMAND, APP_EXITED);

    let err = controller.run(&Emitter::noop()).await.unwrap_err();

    match &err {
        OrchestratorError::Update {
            phase,
            cause,
            rollback,
        } => {
            assert_eq!(phase, "update");
            assert!(matches!(
                **cause,
                OrchestratorError::Step { ref step, .. } if step == "wait-services"
            ));
            // The restored stack still has the exited container
            assert!(matches!(
                rollback.as_deref(),
                Some(OrchestratorError::Timeout(_))
            ));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // Post-update commands and verification never ran
    assert!(executor.position(HEALTH).is_none());
}

#[tokio::test]
async fn test_rollback_disabled_leaves_stack() {
    let (executor, dirs, controller) = controller(false, AppSettings::default());
    executor.on_fail(HEALTH, "HTTP 502");

    let err = controller.run(&Emitter::noop()).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Update { ref phase, rollback: None, .. } if phase == "verification"
    ));
    assert!(executor.position("test -d").is_none());
    assert!(executor.position("psql").is_none());
    // The backup is still there for a manual restore
    assert_eq!(dirs.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_backup_failure_changes_nothing() {
    let (executor, dirs, controller) = controller(true, AppSettings::default());
    executor.on_fail("pg_dump", "No space left on device");

    let err = controller.run(&Emitter::noop()).await.unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Update { ref phase, rollback: None, .. } if phase == "backup"
    ));
    assert!(executor.position("pull --quiet").is_none());
    assert!(executor.position("--force-recreate").is_none());
    assert!(dirs.lock().unwrap().is_empty());
}
