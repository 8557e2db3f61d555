//! Builders to construct schedulers, pools and rotations from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{DispatchConfig, EngineConfig, PoolConfig, RotationConfig, SchedulerConfig};
use crate::core::{
    CommandExecutor, CredentialRotation, DispatchQueue, EventSink, ResourcePool, ResourceSource,
    Scheduler, SchedulerError, Spawn,
};
use crate::util::clock::Clock;

/// Named pool configuration ready to be turned into a [`ResourcePool`].
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    name: String,
    config: PoolConfig,
}

impl PoolBuilder {
    /// Builder for the pool called `name`.
    pub fn new(name: impl Into<String>, config: PoolConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pool configuration.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Validate and build the pool, loading its entries from `source`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Config` if the configuration is invalid.
    pub fn build<H: Send + Sync + 'static>(
        self,
        source: impl ResourceSource<H> + 'static,
        clock: Arc<dyn Clock>,
    ) -> Result<ResourcePool<H>, SchedulerError> {
        self.config
            .validate()
            .map_err(|e| SchedulerError::Config(format!("pool `{}` invalid: {e}", self.name)))?;
        Ok(ResourcePool::new(self.name, self.config.limits(), source, clock))
    }
}

/// Build a scheduler from its configuration section.
///
/// # Errors
///
/// `SchedulerError::Config` if the configuration is invalid.
pub fn build_scheduler(
    cfg: &SchedulerConfig,
    spawner: Arc<dyn Spawn>,
    clock: Arc<dyn Clock>,
    events: Option<Arc<dyn EventSink>>,
) -> Result<Scheduler, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::Config(format!("scheduler invalid: {e}")))?;
    Ok(match events {
        Some(sink) => Scheduler::with_event_sink(cfg.options(), spawner, clock, sink),
        None => Scheduler::new(cfg.options(), spawner, clock),
    })
}

/// Build one pool per configured name, asking `source_factory` for each source.
///
/// # Errors
///
/// `SchedulerError::Config` if the configuration is invalid, or whatever the
/// factory returns.
pub fn build_pools<H, S, F>(
    cfg: &EngineConfig,
    mut source_factory: F,
    clock: &Arc<dyn Clock>,
) -> Result<HashMap<String, Arc<ResourcePool<H>>>, SchedulerError>
where
    H: Send + Sync + 'static,
    S: ResourceSource<H> + 'static,
    F: FnMut(&str, &PoolConfig) -> Result<S, SchedulerError>,
{
    cfg.validate().map_err(SchedulerError::Config)?;

    let mut pools = HashMap::new();
    for (name, pool_cfg) in &cfg.pools {
        let source = source_factory(name, pool_cfg)?;
        let pool = PoolBuilder::new(name.clone(), pool_cfg.clone()).build(source, Arc::clone(clock))?;
        pools.insert(name.clone(), Arc::new(pool));
    }
    Ok(pools)
}

/// Wrap `pool` in a rotation refreshing on the configured interval.
///
/// The rotation is returned stopped.
///
/// # Errors
///
/// `SchedulerError::Config` if the configuration is invalid.
pub fn build_rotation<H: Send + Sync + 'static>(
    cfg: &RotationConfig,
    pool: Arc<ResourcePool<H>>,
) -> Result<CredentialRotation<H>, SchedulerError> {
    cfg.validate()
        .map_err(|e| SchedulerError::Config(format!("rotation invalid: {e}")))?;
    Ok(CredentialRotation::new(pool, cfg.interval()))
}

/// Build a dispatch queue over `pool` with the configured drain cap.
///
/// # Errors
///
/// `SchedulerError::Config` if the configuration is invalid.
pub fn build_dispatch_queue<H, C, R>(
    cfg: &DispatchConfig,
    pool: Arc<ResourcePool<H>>,
    executor: impl CommandExecutor<H, C, R>,
    spawner: Arc<dyn Spawn>,
) -> Result<DispatchQueue<H, C, R>, SchedulerError>
where
    H: Send + Sync + 'static,
    C: Send + 'static,
    R: Send + 'static,
{
    cfg.validate()
        .map_err(|e| SchedulerError::Config(format!("dispatch invalid: {e}")))?;
    Ok(DispatchQueue::new(pool, executor, spawner).with_max_drain_per_call(cfg.max_drain_per_call))
}
