//! Engine configuration structures.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{PoolLimits, SchedulerError, SchedulerOptions};

/// Scheduler loop and slot configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of concurrent execution slots.
    pub slot_count: usize,
    /// Milliseconds between loop ticks.
    pub tick_interval_ms: u64,
    /// Dispatches per tick; `0` is unbounded.
    pub max_dispatch_per_tick: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slot_count: 10,
            tick_interval_ms: 200,
            max_dispatch_per_tick: 20,
        }
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.slot_count == 0 {
            return Err("slot_count must be greater than 0".into());
        }
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Convert into scheduler options.
    #[must_use]
    pub const fn options(&self) -> SchedulerOptions {
        SchedulerOptions {
            slot_count: self.slot_count,
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            max_dispatch_per_tick: self.max_dispatch_per_tick,
        }
    }
}

/// Pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of entries.
    pub capacity: usize,
    /// Seconds before round-robin access reloads the set.
    pub freshness_secs: u64,
    /// Milliseconds between tries when polling for a free entry.
    pub acquire_poll_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            freshness_secs: 300,
            acquire_poll_ms: 50,
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than 0".into());
        }
        if self.freshness_secs == 0 {
            return Err("freshness_secs must be greater than 0".into());
        }
        Ok(())
    }

    /// Convert into pool limits.
    #[must_use]
    pub const fn limits(&self) -> PoolLimits {
        PoolLimits {
            capacity: self.capacity,
            freshness: Duration::from_secs(self.freshness_secs),
            acquire_poll: Duration::from_millis(self.acquire_poll_ms),
        }
    }
}

/// Dispatch queue tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Commands dispatched per drain pass; `None` drains until the pool is busy.
    pub max_drain_per_call: Option<usize>,
}

impl DispatchConfig {
    /// Validate dispatch configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_drain_per_call == Some(0) {
            return Err("max_drain_per_call must be greater than 0 when set".into());
        }
        Ok(())
    }
}

/// Credential rotation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Seconds between timed reloads.
    pub refresh_interval_secs: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 300,
        }
    }
}

impl RotationConfig {
    /// Validate rotation configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.refresh_interval_secs == 0 {
            return Err("refresh_interval_secs must be greater than 0".into());
        }
        Ok(())
    }

    /// Interval between timed reloads.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Map of pool name to configuration.
    pub pools: HashMap<String, PoolConfig>,
    /// Dispatch queue settings.
    pub dispatch: DispatchConfig,
    /// Credential rotation settings.
    pub rotation: RotationConfig,
}

impl EngineConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// A description naming the first invalid section.
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        self.dispatch
            .validate()
            .map_err(|e| format!("dispatch invalid: {e}"))?;
        self.rotation
            .validate()
            .map_err(|e| format!("rotation invalid: {e}"))?;
        Ok(())
    }

    /// Parse engine configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Config` on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, SchedulerError> {
        let cfg: Self = serde_json::from_str(input)
            .map_err(|e| SchedulerError::Config(format!("parse error: {e}")))?;
        cfg.validate().map_err(SchedulerError::Config)?;
        Ok(cfg)
    }

    /// Defaults overridden by `CHATWATCH_*` environment variables, after
    /// loading a `.env` file if one is present.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Config` when a variable does not parse or the result is invalid.
    pub fn from_env() -> Result<Self, SchedulerError> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Apply `CHATWATCH_*` overrides read through `lookup`.
    ///
    /// Pool overrides apply to every configured pool.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Config` when a value does not parse or the result is invalid.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), SchedulerError> {
        if let Some(v) = parse_var(&lookup, "CHATWATCH_SLOT_COUNT")? {
            self.scheduler.slot_count = v;
        }
        if let Some(v) = parse_var(&lookup, "CHATWATCH_TICK_INTERVAL_MS")? {
            self.scheduler.tick_interval_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "CHATWATCH_MAX_DISPATCH_PER_TICK")? {
            self.scheduler.max_dispatch_per_tick = v;
        }
        let capacity: Option<usize> = parse_var(&lookup, "CHATWATCH_POOL_CAPACITY")?;
        let freshness: Option<u64> = parse_var(&lookup, "CHATWATCH_FRESHNESS_SECS")?;
        for pool in self.pools.values_mut() {
            if let Some(v) = capacity {
                pool.capacity = v;
            }
            if let Some(v) = freshness {
                pool.freshness_secs = v;
            }
        }
        self.validate().map_err(SchedulerError::Config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, SchedulerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| SchedulerError::Config(format!("{key}={raw}: {e}")))
        })
        .transpose()
}
