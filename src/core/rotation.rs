//! Periodically refreshed round-robin pools.
//!
//! [`CredentialRotation`] pairs a [`ResourcePool`] with a [`RefreshTimer`]
//! that reloads the pool on a fixed interval, on top of the staleness and
//! validation checks `ResourcePool::get` already applies per call.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::core::resource_pool::{PoolEntry, ResourcePool};
use crate::core::SchedulerError;

type TimerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

struct TimerShared {
    stop: Mutex<bool>,
    wake: Condvar,
    ticks: AtomicU64,
}

impl TimerShared {
    /// Sleep for `dur` unless stopped first. Returns true when stopped.
    fn sleep(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        let mut stop = self.stop.lock();
        while !*stop {
            if self.wake.wait_until(&mut stop, deadline).timed_out() {
                break;
            }
        }
        *stop
    }
}

/// Background timer that calls a callback every `period` after an initial `delay`.
///
/// A panicking callback is logged and the timer keeps running.
pub struct RefreshTimer {
    name: String,
    delay: Duration,
    period: Duration,
    callback: TimerCallback,
    shared: Arc<TimerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshTimer {
    /// Create a stopped timer.
    pub fn new(
        name: impl Into<String>,
        delay: Duration,
        period: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            delay,
            period: period.max(Duration::from_millis(1)),
            callback: Arc::new(callback),
            shared: Arc::new(TimerShared {
                stop: Mutex::new(false),
                wake: Condvar::new(),
                ticks: AtomicU64::new(0),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Start ticking. Starting a running timer does nothing.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Spawn` if the timer thread could not be created.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        *self.shared.stop.lock() = false;

        let shared = Arc::clone(&self.shared);
        let callback = Arc::clone(&self.callback);
        let (name, delay, period) = (self.name.clone(), self.delay, self.period);
        let thread = thread::Builder::new()
            .name(format!("cw-timer-{name}"))
            .spawn(move || {
                if shared.sleep(delay) {
                    return;
                }
                loop {
                    if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                        error!(timer = %name, "timer callback panicked");
                    }
                    shared.ticks.fetch_add(1, Ordering::AcqRel);
                    if shared.sleep(period) {
                        break;
                    }
                }
                debug!(timer = %name, "timer stopped");
            })
            .map_err(|e| SchedulerError::Spawn(e.to_string()))?;
        *handle = Some(thread);
        Ok(())
    }

    /// Stop ticking and wait for the timer thread to exit.
    pub fn stop(&self) {
        *self.shared.stop.lock() = true;
        self.shared.wake.notify_all();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!(timer = %self.name, "timer thread panicked");
            }
        }
    }

    /// Whether the timer thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Callback invocations so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RefreshTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTimer")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .field("period", &self.period)
            .field("ticks", &self.ticks())
            .finish_non_exhaustive()
    }
}

/// Round-robin pool that also reloads itself on a timer.
pub struct CredentialRotation<H> {
    pool: Arc<ResourcePool<H>>,
    timer: RefreshTimer,
}

impl<H: Send + Sync + 'static> CredentialRotation<H> {
    /// Wrap `pool`; the first timed reload happens one `interval` after `start`.
    #[must_use]
    pub fn new(pool: Arc<ResourcePool<H>>, interval: Duration) -> Self {
        let target = Arc::clone(&pool);
        let timer = RefreshTimer::new(
            format!("{}-refresh", pool.name()),
            interval,
            interval,
            move || match target.reload() {
                Ok(size) => debug!(pool = target.name(), size, "scheduled refresh"),
                Err(err) => error!(pool = target.name(), error = %err, "scheduled refresh failed"),
            },
        );
        Self { pool, timer }
    }

    /// Start the refresh timer.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Spawn` if the timer thread could not be created.
    pub fn start(&self) -> Result<(), SchedulerError> {
        self.timer.start()?;
        info!(pool = self.pool.name(), "credential rotation started");
        Ok(())
    }

    /// Stop the refresh timer.
    pub fn stop(&self) {
        self.timer.stop();
    }

    /// Next entry in rotation, reloading first if the set is stale or invalid.
    #[must_use]
    pub fn get(&self) -> Option<Arc<PoolEntry<H>>> {
        self.pool.get()
    }

    /// Reload right away.
    ///
    /// # Errors
    ///
    /// `SchedulerError::ReloadFailed` when the source failed or returned nothing.
    pub fn refresh_now(&self) -> Result<usize, SchedulerError> {
        self.pool.reload()
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<ResourcePool<H>> {
        &self.pool
    }

    /// The refresh timer.
    #[must_use]
    pub const fn timer(&self) -> &RefreshTimer {
        &self.timer
    }
}

impl<H> std::fmt::Debug for CredentialRotation<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRotation")
            .field("pool", &self.pool)
            .field("timer", &self.timer)
            .finish()
    }
}
