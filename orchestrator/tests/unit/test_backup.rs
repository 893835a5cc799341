//! Backup manager tests against a scripted host

use std::sync::Arc;

use chrono::Utc;
use stackpilot::backup::{BackupKind, BackupManager};
use stackpilot::errors::OrchestratorError;
use stackpilot::storage::settings::AppSettings;

use crate::support::{
    fast_readiness, script_backup_host, stack, BackupDirs, FakeExecutor, ALL_RUNNING, PS_COMMAND,
};

fn manager() -> (Arc<FakeExecutor>, BackupDirs, BackupManager) {
    let executor = FakeExecutor::new();
    executor.on_stdout(PS_COMMAND, ALL_RUNNING);
    let dirs = script_backup_host(&executor);
    let manager = BackupManager::new(
        stack(executor.clone()),
        AppSettings::default(),
        fast_readiness(),
    );
    (executor, dirs, manager)
}

fn metadata(id: &str, timestamp: &str) -> String {
    format!(
        r#"{{"id":"{}","timestamp":"{}","type":"manual","application_version":"1.4.2","size_bytes":1024}}"#,
        id, timestamp
    )
}

#[tokio::test]
async fn test_create_records_version_and_size() {
    let (executor, dirs, manager) = manager();

    let record = manager.create(BackupKind::PreUpdate).await.unwrap();

    assert!(record.id.starts_with("backup-"));
    assert_eq!(record.kind, BackupKind::PreUpdate);
    assert_eq!(record.application_version, "1.4.2");
    assert_eq!(record.size_bytes, 4096);
    assert_eq!(record.storage_path, format!("/opt/stackpilot/backups/{}", record.id));
    assert!(dirs.lock().unwrap().contains_key(&record.id));

    let script = &executor.calls_matching("pg_dump")[0];
    assert!(script.starts_with("set -e"));
    assert!(script.contains("redis-cli SAVE"));
    assert!(script.contains("tar -czf"));
}

#[test]
fn test_create_script_refuses_existing_directory() {
    let (_executor, _dirs, manager) = manager();
    let script = manager.create_script(
        "backup-20240501-090307-250",
        Utc::now(),
        BackupKind::Manual,
        "1.4.2",
    );

    let guard = script.find(r#"if [ -e "$BACKUP_DIR" ]"#).unwrap();
    let mkdir = script.find("mkdir -p").unwrap();
    assert!(guard < mkdir);
    assert!(script[guard..mkdir].contains("exit 1"));
}

#[tokio::test]
async fn test_create_falls_back_to_local_record() {
    let (executor, _dirs, manager) = manager();
    executor.on_stdout("pg_dump", "dump written\nno metadata here\n");

    let record = manager.create(BackupKind::Manual).await.unwrap();

    assert_eq!(record.kind, BackupKind::Manual);
    assert_eq!(record.application_version, "1.4.2");
    assert_eq!(record.size_bytes, 0);
}

#[tokio::test]
async fn test_create_failure_propagates() {
    let (executor, _dirs, manager) = manager();
    executor.on_fail("pg_dump", "No space left on device");

    let err = manager.create(BackupKind::Manual).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::CommandFailed { .. }));
}

#[tokio::test]
async fn test_list_skips_unreadable_metadata_newest_first() {
    let (_executor, dirs, manager) = manager();
    {
        let mut dirs = dirs.lock().unwrap();
        dirs.insert(
            "backup-20240501-090307".to_string(),
            Some(metadata("backup-20240501-090307", "2024-05-01T09:03:07Z")),
        );
        dirs.insert(
            "backup-20240602-120000".to_string(),
            Some(metadata("backup-20240602-120000", "2024-06-02T12:00:00Z")),
        );
        dirs.insert("backup-20240515-000000".to_string(), None);
        dirs.insert(
            "backup-20240520-000000".to_string(),
            Some("{\"id\": truncated".to_string()),
        );
    }

    let records = manager.list().await.unwrap();

    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["backup-20240602-120000", "backup-20240501-090307"]);
    assert!(records[0].storage_path.ends_with("/backup-20240602-120000"));
}

#[tokio::test]
async fn test_list_empty_root() {
    let (_executor, _dirs, manager) = manager();
    assert!(manager.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_restore_round_trip_order() {
    let (executor, _dirs, manager) = manager();
    let record = manager.create(BackupKind::Manual).await.unwrap();

    let restored = manager.restore(&record.id).await.unwrap();
    assert_eq!(restored.id, record.id);

    let lookup = executor.position("test -d").unwrap();
    let stop = executor.position("stackpilot stop").unwrap();
    let files = executor.position("tar -xzf").unwrap();
    let up = executor.position("up -d --remove-orphans").unwrap();
    let ready = executor.position("pg_isready").unwrap();
    let database = executor.position("psql").unwrap();
    let cache = executor.position("cache.rdb redis:/data/dump.rdb").unwrap();
    let restart = executor.position("stackpilot restart").unwrap();
    let order = [lookup, stop, files, up, ready, database, cache, restart];
    assert!(order.windows(2).all(|w| w[0] < w[1]), "order: {:?}", order);

    // Services are observed after the restart
    let calls = executor.calls();
    assert!(calls[restart..].iter().any(|c| c.contains(PS_COMMAND)));
    assert!(calls[database].contains(&format!("< {}/database.sql", record.storage_path)));
}

#[tokio::test]
async fn test_restore_unknown_id_touches_nothing() {
    let (executor, _dirs, manager) = manager();

    let err = manager.restore("backup-19700101-000000").await.unwrap_err();

    assert!(matches!(err, OrchestratorError::BackupNotFound(ref id) if id == "backup-19700101-000000"));
    assert!(executor.position("stackpilot stop").is_none());
}

#[tokio::test]
async fn test_restore_rejects_path_like_id() {
    let (executor, _dirs, manager) = manager();

    let err = manager.restore("../../etc").await.unwrap_err();

    assert!(matches!(err, OrchestratorError::BackupNotFound(_)));
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn test_get_corrupt_metadata_is_metadata_error() {
    let (_executor, dirs, manager) = manager();
    dirs.lock().unwrap().insert(
        "backup-20240520-000000".to_string(),
        Some("{\"id\": truncated".to_string()),
    );

    let err = manager.get("backup-20240520-000000").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Metadata(_)));
}

#[tokio::test]
async fn test_restore_stops_at_failed_database_restore() {
    let (executor, _dirs, manager) = manager();
    let record = manager.create(BackupKind::Manual).await.unwrap();
    executor.on_fail("psql", "ERROR: relation already exists");

    let err = manager.restore(&record.id).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::CommandFailed { .. }));
    assert!(executor.position("cache.rdb redis:/data/dump.rdb").is_none());
    assert!(executor.position("stackpilot restart").is_none());
}

#[tokio::test]
async fn test_delete_removes_backup() {
    let (executor, dirs, manager) = manager();
    let record = manager.create(BackupKind::Manual).await.unwrap();

    tokio_test::assert_ok!(manager.delete(&record.id).await);

    assert!(!dirs.lock().unwrap().contains_key(&record.id));
    assert_eq!(executor.calls_matching("rm -rf /opt/stackpilot/backups/").len(), 1);
    assert!(matches!(
        manager.delete(&record.id).await,
        Err(OrchestratorError::BackupNotFound(_))
    ));
}
