//! Tests for error types

use chatwatch_engine::core::{SchedulerError, TaskStatus};

#[test]
fn test_invalid_transition_error() {
    let err = SchedulerError::InvalidTransition {
        from: TaskStatus::Finished,
        to: TaskStatus::Pending,
    };
    assert_eq!(format!("{}", err), "invalid transition: Finished -> Pending");
}

#[test]
fn test_pool_exhausted_error() {
    let err = SchedulerError::PoolExhausted("mysql".to_string());
    assert_eq!(format!("{}", err), "pool exhausted: mysql");
}

#[test]
fn test_reload_failed_error() {
    let err = SchedulerError::ReloadFailed("api_pool: source returned no entries".to_string());
    assert_eq!(format!("{}", err), "reload failed: api_pool: source returned no entries");
}

#[test]
fn test_timeout_and_cancelled_errors() {
    assert_eq!(format!("{}", SchedulerError::Timeout), "timed out");
    assert_eq!(format!("{}", SchedulerError::Cancelled), "cancelled");
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("connection failed".to_string());
    assert_eq!(format!("{}", err), "backend error: connection failed");
}

#[test]
fn test_error_converts_into_anyhow() {
    let err: anyhow::Error = SchedulerError::Config("slot_count must be greater than 0".into()).into();
    assert!(err.to_string().starts_with("config error:"));
    assert!(matches!(
        err.downcast_ref::<SchedulerError>(),
        Some(SchedulerError::Config(_))
    ));
}
