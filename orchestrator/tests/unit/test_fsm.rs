//! Update FSM unit tests

use stackpilot::errors::OrchestratorError;
use stackpilot::update::fsm::{UpdateEvent, UpdateFsm, UpdateState};

fn failed_after_backup() -> UpdateFsm {
    let mut fsm = UpdateFsm::new();
    fsm.process(UpdateEvent::Start).unwrap();
    fsm.process(UpdateEvent::BackupCreated("backup-20240501-090307".to_string()))
        .unwrap();
    fsm.process(UpdateEvent::ApplyFailed("pull denied".to_string()))
        .unwrap();
    fsm
}

#[test]
fn test_fsm_initial_state() {
    let fsm = UpdateFsm::new();
    assert_eq!(fsm.state(), UpdateState::Idle);
    assert!(fsm.backup_id().is_none());
    assert!(fsm.error().is_none());
    assert!(!fsm.state().is_terminal());
}

#[test]
fn test_fsm_apply_failure_then_rollback() {
    let mut fsm = failed_after_backup();
    assert_eq!(fsm.state(), UpdateState::Failed);
    assert_eq!(fsm.error(), Some("pull denied"));

    assert_eq!(
        fsm.process(UpdateEvent::Rollback).unwrap(),
        UpdateState::RollingBack
    );
    assert_eq!(
        fsm.process(UpdateEvent::RollbackSucceeded).unwrap(),
        UpdateState::RolledBack
    );
    assert!(fsm.state().is_terminal());
    assert!(fsm.rollback_error().is_none());
}

#[test]
fn test_fsm_verification_failure_keeps_both_errors() {
    let mut fsm = UpdateFsm::new();
    fsm.process(UpdateEvent::Start).unwrap();
    fsm.process(UpdateEvent::BackupCreated("backup-1".to_string()))
        .unwrap();
    fsm.process(UpdateEvent::Applied).unwrap();
    assert_eq!(fsm.state(), UpdateState::Verifying);

    fsm.process(UpdateEvent::VerificationFailed("app exited".to_string()))
        .unwrap();
    fsm.process(UpdateEvent::Rollback).unwrap();
    fsm.process(UpdateEvent::RollbackFailed("psql failed".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), UpdateState::RollbackFailed);
    assert_eq!(fsm.error(), Some("app exited"));
    assert_eq!(fsm.rollback_error(), Some("psql failed"));
}

#[test]
fn test_fsm_terminal_states_reject_events() {
    let mut fsm = failed_after_backup();
    fsm.process(UpdateEvent::Rollback).unwrap();
    fsm.process(UpdateEvent::RollbackSucceeded).unwrap();

    for event in [UpdateEvent::Start, UpdateEvent::Rollback, UpdateEvent::Verified] {
        assert!(matches!(
            fsm.process(event),
            Err(OrchestratorError::InvalidTransition(_))
        ));
    }
    assert_eq!(fsm.state(), UpdateState::RolledBack);
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = UpdateFsm::new();

    // Nothing can be applied before the backup exists
    assert!(fsm.process(UpdateEvent::Applied).is_err());
    fsm.process(UpdateEvent::Start).unwrap();
    assert!(fsm.process(UpdateEvent::Applied).is_err());
    assert_eq!(fsm.state(), UpdateState::BackingUp);
}
