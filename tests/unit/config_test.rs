//! Tests for configuration validation

use std::collections::HashMap;
use std::time::Duration;

use chatwatch_engine::config::{EngineConfig, PoolConfig, RotationConfig, SchedulerConfig};
use chatwatch_engine::core::SchedulerError;

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn test_defaults_are_valid() {
    let cfg = EngineConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.scheduler.slot_count, 10);
    assert_eq!(cfg.scheduler.tick_interval_ms, 200);
    assert_eq!(cfg.rotation.refresh_interval_secs, 300);
    assert_eq!(cfg.dispatch.max_drain_per_call, None);
}

#[test]
fn test_scheduler_config_invalid_slots() {
    let invalid = SchedulerConfig {
        slot_count: 0,
        ..SchedulerConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_pool_config_invalid_capacity() {
    let invalid = PoolConfig {
        capacity: 0,
        ..PoolConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_rotation_config_invalid_interval() {
    let invalid = RotationConfig {
        refresh_interval_secs: 0,
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_config_conversions() {
    let options = SchedulerConfig::default().options();
    assert_eq!(options.tick_interval, Duration::from_millis(200));
    assert_eq!(options.max_dispatch_per_tick, 20);

    let limits = PoolConfig::default().limits();
    assert_eq!(limits.capacity, 5);
    assert_eq!(limits.freshness, Duration::from_secs(300));
}

#[test]
fn test_engine_config_from_json() {
    let json = r#"
    {
        "scheduler": { "slot_count": 4 },
        "pools": {
            "mysql": { "capacity": 3 },
            "api_pool": { "capacity": 8, "freshness_secs": 120 }
        },
        "dispatch": { "max_drain_per_call": 16 }
    }
    "#;
    let cfg = EngineConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.scheduler.slot_count, 4);
    assert_eq!(cfg.scheduler.tick_interval_ms, 200);
    assert_eq!(cfg.pools["mysql"].capacity, 3);
    assert_eq!(cfg.pools["mysql"].freshness_secs, 300);
    assert_eq!(cfg.pools["api_pool"].freshness_secs, 120);
    assert_eq!(cfg.dispatch.max_drain_per_call, Some(16));
}

#[test]
fn test_engine_config_rejects_invalid_pool() {
    let json = r#"{ "pools": { "mysql": { "capacity": 0 } } }"#;
    let err = EngineConfig::from_json_str(json).unwrap_err();
    assert!(matches!(err, SchedulerError::Config(msg) if msg.contains("mysql")));
}

#[test]
fn test_engine_config_rejects_bad_json() {
    assert!(matches!(
        EngineConfig::from_json_str("{ not json"),
        Err(SchedulerError::Config(_))
    ));
}

#[test]
fn test_env_overrides_apply() {
    let mut cfg = EngineConfig::default();
    cfg.pools.insert("mysql".into(), PoolConfig::default());
    let env = vars(&[
        ("CHATWATCH_SLOT_COUNT", "3"),
        ("CHATWATCH_TICK_INTERVAL_MS", " 50 "),
        ("CHATWATCH_POOL_CAPACITY", "7"),
    ]);
    cfg.apply_overrides(|k| env.get(k).cloned()).unwrap();

    assert_eq!(cfg.scheduler.slot_count, 3);
    assert_eq!(cfg.scheduler.tick_interval_ms, 50);
    assert_eq!(cfg.scheduler.max_dispatch_per_tick, 20);
    assert_eq!(cfg.pools["mysql"].capacity, 7);
    assert_eq!(cfg.pools["mysql"].freshness_secs, 300);
}

#[test]
fn test_env_override_parse_failure() {
    let mut cfg = EngineConfig::default();
    let env = vars(&[("CHATWATCH_SLOT_COUNT", "many")]);
    let err = cfg.apply_overrides(|k| env.get(k).cloned()).unwrap_err();
    assert!(matches!(err, SchedulerError::Config(msg) if msg.contains("CHATWATCH_SLOT_COUNT")));
}

#[test]
fn test_env_override_invalid_value() {
    let mut cfg = EngineConfig::default();
    let env = vars(&[("CHATWATCH_SLOT_COUNT", "0")]);
    assert!(cfg.apply_overrides(|k| env.get(k).cloned()).is_err());
}
