//! Fixed-capacity pool of reusable handles with busy/free tracking.
//!
//! One pool type serves both database connections (exclusive `acquire` /
//! `release`) and externally issued credentials (shared round-robin `get`).
//!
//! The live entry set sits behind an `RwLock<Arc<[..]>>` so a reload swaps the
//! whole set in one write; readers clone the `Arc` and scan a consistent
//! snapshot. Reload and the round-robin cursor share a single coarse `Mutex`.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::core::{AppResult, SchedulerError};
use crate::util::clock::Clock;

/// Authoritative source a pool is (re)built from.
pub trait ResourceSource<H>: Send + Sync {
    /// Build a fresh set of at most `capacity` handles.
    ///
    /// # Errors
    ///
    /// Any failure reaching the source. The pool keeps its previous set.
    fn load(&self, capacity: usize) -> AppResult<Vec<H>>;

    /// Whether a cached handle is still fit to hand out.
    fn validate(&self, _handle: &H) -> bool {
        true
    }
}

impl<H, F> ResourceSource<H> for F
where
    F: Fn(usize) -> AppResult<Vec<H>> + Send + Sync,
{
    fn load(&self, capacity: usize) -> AppResult<Vec<H>> {
        self(capacity)
    }
}

/// Configuration values for a pool.
#[derive(Debug, Clone)]
pub struct PoolLimits {
    /// Maximum number of entries held at once.
    pub capacity: usize,
    /// Age after which round-robin `get` reloads first.
    pub freshness: Duration,
    /// Sleep between tries in `acquire_with_retry`.
    pub acquire_poll: Duration,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            capacity: 5,
            freshness: Duration::from_secs(300),
            acquire_poll: Duration::from_millis(50),
        }
    }
}

/// One reusable handle plus its busy flag.
pub struct PoolEntry<H> {
    index: usize,
    generation: u64,
    busy: AtomicBool,
    handle: H,
}

impl<H> PoolEntry<H> {
    /// Position in the entry set it was loaded into.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Reload generation this entry belongs to.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a lease currently holds this entry.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// The wrapped handle.
    #[must_use]
    pub const fn handle(&self) -> &H {
        &self.handle
    }
}

impl<H> Deref for PoolEntry<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handle
    }
}

impl<H> fmt::Debug for PoolEntry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

/// Exclusive hold on a pool entry. Dropping it releases the entry.
pub struct Lease<H> {
    entry: Arc<PoolEntry<H>>,
}

impl<H> Lease<H> {
    /// The leased entry.
    #[must_use]
    pub fn entry(&self) -> &Arc<PoolEntry<H>> {
        &self.entry
    }

    /// Release explicitly; same as dropping.
    pub fn release(self) {
        drop(self);
    }
}

impl<H> Deref for Lease<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.entry.handle
    }
}

impl<H> Drop for Lease<H> {
    fn drop(&mut self) {
        self.entry.busy.store(false, Ordering::Release);
    }
}

impl<H> fmt::Debug for Lease<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("entry", &self.entry).finish()
    }
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured capacity.
    pub capacity: usize,
    /// Entries in the live set.
    pub size: usize,
    /// Entries currently leased.
    pub busy: usize,
    /// Leases still held on entries a reload has already replaced.
    pub retired_busy: usize,
    /// Number of successful reloads, including the initial load.
    pub generation: u64,
}

struct RefreshState {
    cursor: usize,
    generation: u64,
    last_refresh_ms: Option<u128>,
    last_revalidation_ms: Option<u128>,
}

/// Fixed-capacity pool with atomic wholesale reload.
pub struct ResourcePool<H> {
    name: String,
    limits: PoolLimits,
    source: Box<dyn ResourceSource<H>>,
    clock: Arc<dyn Clock>,
    entries: RwLock<Arc<[Arc<PoolEntry<H>>]>>,
    retired: Mutex<Vec<Weak<PoolEntry<H>>>>,
    refresh: Mutex<RefreshState>,
}

impl<H: Send + Sync + 'static> ResourcePool<H> {
    /// Create a pool and load its entries eagerly.
    ///
    /// A failed initial load is logged and leaves the pool empty; round-robin
    /// `get` retries it, and `reload` can be called explicitly.
    pub fn new(
        name: impl Into<String>,
        limits: PoolLimits,
        source: impl ResourceSource<H> + 'static,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pool = Self {
            name: name.into(),
            limits,
            source: Box::new(source),
            clock,
            entries: RwLock::new(Arc::from(Vec::new())),
            retired: Mutex::new(Vec::new()),
            refresh: Mutex::new(RefreshState {
                cursor: 0,
                generation: 0,
                last_refresh_ms: None,
                last_revalidation_ms: None,
            }),
        };
        if let Err(err) = pool.reload() {
            error!(pool = %pool.name, error = %err, "initial pool load failed");
        }
        pool
    }

    /// Take the first free entry, or `None` if every entry is busy.
    ///
    /// Never blocks.
    #[must_use]
    pub fn acquire(&self) -> Option<Lease<H>> {
        let snapshot = self.snapshot();
        snapshot
            .iter()
            .find(|entry| {
                entry
                    .busy
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            })
            .map(|entry| Lease {
                entry: Arc::clone(entry),
            })
    }

    /// Poll `acquire` up to `attempts` times, sleeping `acquire_poll` in between.
    ///
    /// # Errors
    ///
    /// `SchedulerError::PoolExhausted` if no entry freed up in time.
    pub fn acquire_with_retry(&self, attempts: u32) -> Result<Lease<H>, SchedulerError> {
        for attempt in 0..attempts.max(1) {
            if let Some(lease) = self.acquire() {
                return Ok(lease);
            }
            if attempt + 1 < attempts {
                thread::sleep(self.limits.acquire_poll);
            }
        }
        Err(SchedulerError::PoolExhausted(self.name.clone()))
    }

    /// Hand a lease back. Equivalent to dropping it.
    pub fn release(&self, lease: Lease<H>) {
        lease.release();
    }

    /// Rebuild the entry set from the source and swap it in.
    ///
    /// An empty or failed rebuild leaves the previous set in place. Returns
    /// the size of the new set and restarts round-robin order at its first
    /// entry. Leases on the replaced set stay valid until dropped and are
    /// reported as `retired_busy` meanwhile.
    ///
    /// # Errors
    ///
    /// `SchedulerError::ReloadFailed` when the source errored or produced nothing.
    pub fn reload(&self) -> Result<usize, SchedulerError> {
        let mut state = self.refresh.lock();
        let size = self.reload_locked(&mut state)?;
        state.cursor = 0;
        Ok(size)
    }

    fn reload_locked(&self, state: &mut RefreshState) -> Result<usize, SchedulerError> {
        state.last_refresh_ms = Some(self.clock.now_ms());

        let mut handles = match self.source.load(self.limits.capacity) {
            Ok(handles) => handles,
            Err(err) => {
                error!(pool = %self.name, error = %err, "pool reload failed; keeping previous entries");
                return Err(SchedulerError::ReloadFailed(err.to_string()));
            }
        };
        if handles.is_empty() {
            warn!(pool = %self.name, "pool reload returned no entries; keeping previous entries");
            return Err(SchedulerError::ReloadFailed(format!(
                "{}: source returned no entries",
                self.name
            )));
        }
        if handles.len() > self.limits.capacity {
            warn!(
                pool = %self.name,
                loaded = handles.len(),
                capacity = self.limits.capacity,
                "pool source exceeded capacity; truncating"
            );
            handles.truncate(self.limits.capacity);
        }

        let generation = state.generation + 1;
        let entries: Vec<Arc<PoolEntry<H>>> = handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| {
                Arc::new(PoolEntry {
                    index,
                    generation,
                    busy: AtomicBool::new(false),
                    handle,
                })
            })
            .collect();
        let size = entries.len();

        let previous = std::mem::replace(&mut *self.entries.write(), Arc::from(entries));
        let mut retired = self.retired.lock();
        retired.retain(|entry| entry.upgrade().is_some_and(|e| e.is_busy()));
        retired.extend(previous.iter().filter(|e| e.is_busy()).map(Arc::downgrade));
        drop(retired);
        state.generation = generation;
        info!(pool = %self.name, size, generation, "pool reloaded");
        Ok(size)
    }

    fn window_elapsed(&self, since: Option<u128>) -> bool {
        since.map_or(true, |last| {
            self.clock.now_ms().saturating_sub(last) >= self.limits.freshness.as_millis()
        })
    }

    /// Next entry in round-robin order, shared rather than leased.
    ///
    /// Reloads first when the set is empty or the last reload is older than
    /// the freshness window. If the entry under the cursor fails validation
    /// the set is reloaded once, at most once per freshness window, and the
    /// first valid entry from the cursor onward is served. Returns `None`
    /// when the set is empty or no entry validates.
    #[must_use]
    pub fn get(&self) -> Option<Arc<PoolEntry<H>>> {
        let mut state = self.refresh.lock();

        let mut reloaded = false;
        if self.is_empty() || self.window_elapsed(state.last_refresh_ms) {
            debug!(pool = %self.name, "round-robin refresh before get");
            reloaded = true;
            if self.reload_locked(&mut state).is_ok() {
                state.cursor = 0;
            }
        }

        let mut snapshot = self.snapshot();
        if snapshot.is_empty() {
            return None;
        }

        let cursor = state.cursor % snapshot.len();
        if !reloaded
            && !self.source.validate(&snapshot[cursor].handle)
            && self.window_elapsed(state.last_revalidation_ms)
        {
            warn!(pool = %self.name, index = cursor, "cached entry failed validation; reloading");
            state.last_revalidation_ms = Some(self.clock.now_ms());
            if self.reload_locked(&mut state).is_ok() {
                snapshot = self.snapshot();
            }
        }

        let len = snapshot.len();
        let Some(index) = (0..len)
            .map(|offset| (cursor + offset) % len)
            .find(|&i| self.source.validate(&snapshot[i].handle))
        else {
            warn!(pool = %self.name, size = len, "no valid entry to serve");
            return None;
        };

        state.cursor = (index + 1) % len;
        Some(Arc::clone(&snapshot[index]))
    }
}

impl<H> ResourcePool<H> {
    /// Pool name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured limits.
    #[must_use]
    pub const fn limits(&self) -> &PoolLimits {
        &self.limits
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.limits.capacity
    }

    /// Entries in the live set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when the live set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Entries currently leased.
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.snapshot().iter().filter(|e| e.is_busy()).count()
    }

    /// The live entry set.
    #[must_use]
    pub fn snapshot(&self) -> Arc<[Arc<PoolEntry<H>>]> {
        Arc::clone(&self.entries.read())
    }

    /// Time of the last reload attempt, successful or not.
    #[must_use]
    pub fn last_refresh_ms(&self) -> Option<u128> {
        self.refresh.lock().last_refresh_ms
    }

    /// Leases still held on entries from replaced sets.
    ///
    /// These handles stay usable until released but no longer count against
    /// `capacity`, so right after a reload up to twice as many handles can
    /// be open.
    #[must_use]
    pub fn retired_busy_count(&self) -> usize {
        let mut retired = self.retired.lock();
        retired.retain(|entry| entry.upgrade().is_some_and(|e| e.is_busy()));
        retired.len()
    }

    /// Current stats.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let snapshot = self.snapshot();
        PoolStats {
            capacity: self.limits.capacity,
            size: snapshot.len(),
            busy: snapshot.iter().filter(|e| e.is_busy()).count(),
            retired_busy: self.retired_busy_count(),
            generation: self.refresh.lock().generation,
        }
    }
}

impl<H> fmt::Debug for ResourcePool<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("name", &self.name)
            .field("limits", &self.limits)
            .field("size", &self.entries.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::clock::ManualClock;
    use std::sync::atomic::AtomicUsize;

    fn numbered(count: usize) -> impl Fn(usize) -> AppResult<Vec<usize>> + Send + Sync {
        move |capacity| Ok((0..count.min(capacity)).collect())
    }

    fn pool(count: usize, capacity: usize) -> ResourcePool<usize> {
        ResourcePool::new(
            "test",
            PoolLimits {
                capacity,
                ..PoolLimits::default()
            },
            numbered(count),
            ManualClock::shared(0),
        )
    }

    #[test]
    fn acquire_marks_busy_until_dropped() {
        let pool = pool(2, 2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_ne!(*a, *b);
        assert!(pool.acquire().is_none());
        assert_eq!(pool.busy_count(), 2);
        pool.release(a);
        let c = pool.acquire().unwrap();
        assert_eq!(*c, 0);
        drop(b);
        drop(c);
        assert_eq!(pool.busy_count(), 0);
    }

    #[test]
    fn acquire_with_retry_gives_up() {
        let pool = pool(1, 1);
        let _held = pool.acquire().unwrap();
        assert!(matches!(
            pool.acquire_with_retry(2),
            Err(SchedulerError::PoolExhausted(_))
        ));
    }

    #[test]
    fn capacity_truncates_oversized_loads() {
        let pool = pool(10, 3);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.stats().capacity, 3);
    }

    #[test]
    fn empty_reload_keeps_previous_set() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let pool = ResourcePool::new(
            "flaky",
            PoolLimits::default(),
            move |_cap: usize| -> AppResult<Vec<&'static str>> {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(vec!["a", "b"])
                } else {
                    Ok(Vec::new())
                }
            },
            ManualClock::shared(0),
        );
        assert!(pool.reload().is_err());
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.stats().generation, 1);
        assert_eq!(*pool.acquire().unwrap(), "a");
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let pool = pool(3, 3);
        let seen: Vec<usize> = (0..6).map(|_| **pool.get().unwrap()).collect();
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn stale_set_reloads_before_get() {
        let clock = ManualClock::shared(0);
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let pool = ResourcePool::new(
            "stale",
            PoolLimits {
                capacity: 2,
                freshness: Duration::from_secs(300),
                ..PoolLimits::default()
            },
            move |_cap: usize| -> AppResult<Vec<usize>> {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(vec![n * 10, n * 10 + 1])
            },
            clock.clone(),
        );
        assert_eq!(**pool.get().unwrap(), 0);
        clock.advance(Duration::from_secs(301));
        assert_eq!(**pool.get().unwrap(), 10);
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    struct Expiring;

    impl ResourceSource<String> for Expiring {
        fn load(&self, _capacity: usize) -> AppResult<Vec<String>> {
            Ok(vec!["expired".into(), "fresh".into()])
        }

        fn validate(&self, handle: &String) -> bool {
            handle != "expired"
        }
    }

    #[test]
    fn invalid_entry_triggers_reload() {
        let pool = ResourcePool::new("creds", PoolLimits::default(), Expiring, ManualClock::shared(0));
        let first = pool.get().unwrap();
        assert_eq!(first.handle(), "fresh");
        assert_eq!(first.generation(), 2);
        assert_eq!(pool.stats().generation, 2);
    }

    /// Source whose entries never validate, counting loads.
    struct Revoked {
        loads: Arc<AtomicUsize>,
    }

    impl ResourceSource<usize> for Revoked {
        fn load(&self, capacity: usize) -> AppResult<Vec<usize>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok((0..capacity).collect())
        }

        fn validate(&self, _handle: &usize) -> bool {
            false
        }
    }

    #[test]
    fn all_invalid_entries_serve_nothing_and_reload_once_per_window() {
        let clock = ManualClock::shared(0);
        let loads = Arc::new(AtomicUsize::new(0));
        let pool = ResourcePool::new(
            "revoked",
            PoolLimits {
                capacity: 2,
                freshness: Duration::from_secs(300),
                ..PoolLimits::default()
            },
            Revoked {
                loads: Arc::clone(&loads),
            },
            clock.clone(),
        );

        let served: Vec<_> = (0..5).map(|_| pool.get()).collect();
        assert!(served.iter().all(Option::is_none));
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        clock.advance(Duration::from_secs(100));
        assert!(pool.get().is_none());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    /// Source where only even handles validate.
    struct EvenOnly;

    impl ResourceSource<usize> for EvenOnly {
        fn load(&self, capacity: usize) -> AppResult<Vec<usize>> {
            Ok((0..capacity).collect())
        }

        fn validate(&self, handle: &usize) -> bool {
            handle % 2 == 0
        }
    }

    #[test]
    fn rotation_advances_past_invalid_entries() {
        let pool = ResourcePool::new(
            "mixed",
            PoolLimits {
                capacity: 4,
                ..PoolLimits::default()
            },
            EvenOnly,
            ManualClock::shared(0),
        );
        let seen: Vec<usize> = (0..4).map(|_| **pool.get().unwrap()).collect();
        assert_eq!(seen, vec![0, 2, 0, 2]);
        assert_eq!(pool.stats().generation, 2);
    }

    #[test]
    fn retired_leases_are_reported_until_dropped() {
        let pool = pool(2, 2);
        let old = pool.acquire().unwrap();
        pool.reload().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.busy, 0);
        assert_eq!(stats.retired_busy, 1);
        let fresh: Vec<_> = std::iter::from_fn(|| pool.acquire()).collect();
        assert_eq!(fresh.len(), 2);

        drop(old);
        assert_eq!(pool.retired_busy_count(), 0);
        assert_eq!(pool.stats().busy, 2);
    }
}
