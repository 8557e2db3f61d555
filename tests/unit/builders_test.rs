//! Tests for builder modules

use std::sync::Arc;

use std::time::Duration;

use chatwatch_engine::builders::{build_dispatch_queue, build_pools, build_scheduler, PoolBuilder};
use chatwatch_engine::config::{DispatchConfig, EngineConfig, PoolConfig, SchedulerConfig};
use chatwatch_engine::core::{AppResult, PoolLimits, ResourcePool, SchedulerError};
use chatwatch_engine::runtime::ThreadSpawner;
use chatwatch_engine::util::clock::{Clock, ManualClock};

#[test]
fn test_pool_builder_defaults() {
    let builder = PoolBuilder::new("mysql", PoolConfig::default());
    assert_eq!(builder.name(), "mysql");
    assert_eq!(builder.config().capacity, 5);

    let pool = builder
        .build(|cap: usize| -> AppResult<Vec<u32>> { Ok((0..cap as u32).collect()) }, ManualClock::shared(0))
        .unwrap();
    assert_eq!(pool.len(), 5);
    assert_eq!(pool.name(), "mysql");
}

#[test]
fn test_pool_builder_rejects_invalid_config() {
    let builder = PoolBuilder::new(
        "mysql",
        PoolConfig {
            capacity: 0,
            ..PoolConfig::default()
        },
    );
    let result = builder.build(|_: usize| -> AppResult<Vec<u32>> { Ok(vec![1]) }, ManualClock::shared(0));
    assert!(matches!(result, Err(SchedulerError::Config(_))));
}

#[test]
fn test_build_pools_per_name() {
    let mut cfg = EngineConfig::default();
    cfg.pools.insert("mysql".into(), PoolConfig { capacity: 2, ..PoolConfig::default() });
    cfg.pools.insert("api_pool".into(), PoolConfig { capacity: 4, ..PoolConfig::default() });

    let clock: Arc<dyn Clock> = ManualClock::shared(0);
    let pools = build_pools::<String, _, _>(
        &cfg,
        |name, _pool_cfg| {
            let tag = name.to_string();
            Ok(move |cap: usize| -> AppResult<Vec<String>> {
                Ok((0..cap).map(|i| format!("{tag}-{i}")).collect())
            })
        },
        &clock,
    )
    .unwrap();

    assert_eq!(pools.len(), 2);
    assert_eq!(pools["mysql"].len(), 2);
    assert_eq!(pools["api_pool"].len(), 4);
    assert_eq!(**pools["api_pool"].get().unwrap(), "api_pool-0");
}

#[test]
fn test_build_scheduler_from_config() {
    let cfg = SchedulerConfig {
        slot_count: 3,
        ..SchedulerConfig::default()
    };
    let scheduler = build_scheduler(&cfg, Arc::new(ThreadSpawner::new()), ManualClock::shared(0), None).unwrap();
    assert_eq!(scheduler.options().slot_count, 3);
    assert_eq!(scheduler.stats().slot_count, 3);

    let bad = SchedulerConfig {
        tick_interval_ms: 0,
        ..SchedulerConfig::default()
    };
    assert!(build_scheduler(&bad, Arc::new(ThreadSpawner::new()), ManualClock::shared(0), None).is_err());
}

#[test]
fn test_build_dispatch_queue_applies_drain_cap() {
    let pool = Arc::new(ResourcePool::new(
        "mysql",
        PoolLimits::default(),
        |cap: usize| -> AppResult<Vec<usize>> { Ok((0..cap).collect()) },
        ManualClock::shared(0),
    ));
    let cfg = DispatchConfig {
        max_drain_per_call: Some(4),
    };
    let queue = build_dispatch_queue(
        &cfg,
        Arc::clone(&pool),
        |conn: &usize, cmd: u32| -> AppResult<u32> { Ok(cmd + *conn as u32) },
        Arc::new(ThreadSpawner::new()),
    )
    .unwrap();
    assert_eq!(queue.max_drain_per_call(), Some(4));
    assert_eq!(queue.submit(7).wait(Some(Duration::from_secs(5))).unwrap(), 7);

    let zero = DispatchConfig {
        max_drain_per_call: Some(0),
    };
    let rejected = build_dispatch_queue(
        &zero,
        pool,
        |_conn: &usize, cmd: u32| -> AppResult<u32> { Ok(cmd) },
        Arc::new(ThreadSpawner::new()),
    );
    assert!(matches!(rejected, Err(SchedulerError::Config(_))));
}
