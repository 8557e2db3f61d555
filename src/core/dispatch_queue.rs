//! FIFO of pending commands bound to a resource pool.
//!
//! Producers enqueue a command plus an optional completion callback; a drain
//! pass pairs queued commands with free pool entries and runs each pair on the
//! spawner. Draining is idempotent and may be called from any thread: it runs
//! right after every enqueue and again whenever a command finishes and hands
//! its entry back.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::core::resource_pool::{Lease, ResourcePool};
use crate::core::{CommandExecutor, SchedulerError, Spawn};

/// Callback fired with the outcome of one command.
pub type Completion<R> = Box<dyn FnOnce(Result<R, SchedulerError>) + Send + 'static>;

const QUEUED: u8 = 0;
const STARTED: u8 = 1;
const WITHDRAWN: u8 = 2;

/// Shared between a queued item and its ticket. A command runs only if it
/// moves `QUEUED -> STARTED` before the ticket moves it to `WITHDRAWN`.
#[derive(Default)]
struct ItemState(AtomicU8);

impl ItemState {
    fn start(&self) -> bool {
        self.0
            .compare_exchange(QUEUED, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn withdraw(&self) -> bool {
        self.0
            .compare_exchange(QUEUED, WITHDRAWN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_withdrawn(&self) -> bool {
        self.0.load(Ordering::Acquire) == WITHDRAWN
    }
}

/// A queued command. If it is dropped before completing (spawn failure,
/// executor panic, withdrawn by its ticket), its callback still fires once
/// with `Cancelled`.
struct DispatchItem<C, R> {
    command: Option<C>,
    completion: Option<Completion<R>>,
    state: Arc<ItemState>,
}

impl<C, R> DispatchItem<C, R> {
    fn new(command: C, completion: Option<Completion<R>>) -> Self {
        Self {
            command: Some(command),
            completion,
            state: Arc::default(),
        }
    }

    fn complete(&mut self, result: Result<R, SchedulerError>) {
        if let Some(callback) = self.completion.take() {
            callback(result);
        }
    }
}

impl<C, R> Drop for DispatchItem<C, R> {
    fn drop(&mut self) {
        self.complete(Err(SchedulerError::Cancelled));
    }
}

/// Receiving side of a command submitted with [`DispatchQueue::submit`].
///
/// Dropping the ticket, or a `wait` that times out, withdraws a command that
/// has not started yet; the queue then discards it without running it. A
/// command already running on an entry runs to completion.
pub struct Ticket<R> {
    rx: Receiver<Result<R, SchedulerError>>,
    state: Arc<ItemState>,
}

impl<R> Ticket<R> {
    /// Block until the command completes or `timeout` elapses.
    ///
    /// `None` or a zero timeout waits indefinitely.
    ///
    /// # Errors
    ///
    /// The command's own error, `SchedulerError::Timeout` if it did not
    /// complete in time, or `SchedulerError::Cancelled` if it was dropped.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<R, SchedulerError> {
        match timeout.filter(|t| !t.is_zero()) {
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => {
                    if self.state.withdraw() {
                        debug!("command withdrawn after timeout");
                    }
                    Err(SchedulerError::Timeout)
                }
                Err(RecvTimeoutError::Disconnected) => Err(SchedulerError::Cancelled),
            },
            None => self.rx.recv().unwrap_or(Err(SchedulerError::Cancelled)),
        }
    }

    /// Withdraw the command if it has not started. Returns false once it has
    /// started or finished.
    pub fn cancel(&self) -> bool {
        self.state.withdraw()
    }

    /// Non-blocking check; `None` while the command is still queued or running.
    pub fn try_take(&self) -> Option<Result<R, SchedulerError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(SchedulerError::Cancelled)),
        }
    }
}

impl<R> Drop for Ticket<R> {
    fn drop(&mut self) {
        self.state.withdraw();
    }
}

impl<R> fmt::Debug for Ticket<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticket").finish_non_exhaustive()
    }
}

struct DispatchInner<H, C, R> {
    name: String,
    pool: Arc<ResourcePool<H>>,
    executor: Arc<dyn CommandExecutor<H, C, R>>,
    spawner: Arc<dyn Spawn>,
    items: Mutex<VecDeque<DispatchItem<C, R>>>,
    /// `0` is unbounded.
    max_drain_per_call: AtomicUsize,
    in_flight: AtomicUsize,
    completed: AtomicU64,
}

/// Cheap, clonable handle to a dispatch queue.
pub struct DispatchQueue<H, C, R> {
    inner: Arc<DispatchInner<H, C, R>>,
}

impl<H, C, R> Clone for DispatchQueue<H, C, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H, C, R> DispatchQueue<H, C, R>
where
    H: Send + Sync + 'static,
    C: Send + 'static,
    R: Send + 'static,
{
    /// Create a queue draining into `pool`.
    pub fn new(
        pool: Arc<ResourcePool<H>>,
        executor: impl CommandExecutor<H, C, R>,
        spawner: Arc<dyn Spawn>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatchInner {
                name: format!("{}-dispatch", pool.name()),
                pool,
                executor: Arc::new(executor),
                spawner,
                items: Mutex::new(VecDeque::new()),
                max_drain_per_call: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Cap how many commands a single drain pass dispatches. `None` is unbounded.
    #[must_use]
    pub fn with_max_drain_per_call(self, max: Option<usize>) -> Self {
        self.set_max_drain_per_call(max);
        self
    }

    /// Change the per-pass cap. Applies to every clone of this queue.
    pub fn set_max_drain_per_call(&self, max: Option<usize>) {
        self.inner
            .max_drain_per_call
            .store(max.unwrap_or(0), Ordering::Release);
    }

    /// Current per-pass cap; `None` is unbounded.
    #[must_use]
    pub fn max_drain_per_call(&self) -> Option<usize> {
        Some(self.inner.max_drain_per_call.load(Ordering::Acquire)).filter(|m| *m > 0)
    }

    /// Pool this queue draining into.
    #[must_use]
    pub fn pool(&self) -> &Arc<ResourcePool<H>> {
        &self.inner.pool
    }

    /// Commands waiting for an entry, not counting withdrawn ones.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner
            .items
            .lock()
            .iter()
            .filter(|item| !item.state.is_withdrawn())
            .count()
    }

    /// Commands currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Commands completed, successfully or not.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Queue `command` and drain immediately. Returns how many commands the
    /// drain dispatched.
    pub fn enqueue(&self, command: C, completion: Option<Completion<R>>) -> usize {
        self.push(DispatchItem::new(command, completion))
    }

    /// Queue `command` and get a ticket to wait on its result.
    pub fn submit(&self, command: C) -> Ticket<R> {
        let (tx, rx) = bounded(1);
        let item = DispatchItem::new(
            command,
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        );
        let state = Arc::clone(&item.state);
        self.push(item);
        Ticket { rx, state }
    }

    fn push(&self, item: DispatchItem<C, R>) -> usize {
        self.inner.items.lock().push_back(item);
        self.drain()
    }

    /// Pop the first live item. Withdrawn items ahead of it are returned
    /// separately so their callbacks fire after the queue lock is released.
    fn pop_live(&self) -> (Option<DispatchItem<C, R>>, Vec<DispatchItem<C, R>>) {
        let mut items = self.inner.items.lock();
        let mut withdrawn = Vec::new();
        while let Some(item) = items.pop_front() {
            if item.state.is_withdrawn() {
                withdrawn.push(item);
            } else {
                return (Some(item), withdrawn);
            }
        }
        (None, withdrawn)
    }

    /// Pair queued commands with free entries until one side runs out.
    ///
    /// Stops early when no entry is free; the next enqueue or completion
    /// picks up where this pass left off.
    pub fn drain(&self) -> usize {
        let mut dispatched = 0;
        loop {
            if self
                .max_drain_per_call()
                .is_some_and(|max| dispatched >= max)
            {
                break;
            }
            if self.inner.items.lock().is_empty() {
                break;
            }
            let Some(lease) = self.inner.pool.acquire() else {
                debug!(queue = %self.inner.name, pending = self.pending(), "no free entry; drain paused");
                break;
            };
            let (item, withdrawn) = self.pop_live();
            if !withdrawn.is_empty() {
                debug!(queue = %self.inner.name, count = withdrawn.len(), "discarding withdrawn commands");
            }
            drop(withdrawn);
            let Some(item) = item else {
                break;
            };

            dispatched += 1;
            self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
            let queue = self.clone();
            let job = Box::new(move || queue.run_item(lease, item));
            if let Err(err) = self.inner.spawner.spawn(&self.inner.name, job) {
                self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
                error!(queue = %self.inner.name, error = %err, "failed to dispatch command");
                break;
            }
        }
        dispatched
    }

    fn run_item(&self, lease: Lease<H>, mut item: DispatchItem<C, R>) {
        if !item.state.start() {
            debug!(queue = %self.inner.name, "command withdrawn before it started");
            item.command = None;
        }
        if let Some(command) = item.command.take() {
            let executor = Arc::clone(&self.inner.executor);
            let result = match catch_unwind(AssertUnwindSafe(|| executor.execute(&lease, command))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => {
                    error!(queue = %self.inner.name, entry = lease.entry().index(), error = %err, "command failed");
                    Err(SchedulerError::Backend(err.to_string()))
                }
                Err(_) => {
                    error!(queue = %self.inner.name, entry = lease.entry().index(), "command panicked");
                    Err(SchedulerError::Backend("command panicked".into()))
                }
            };
            item.complete(result);
        }
        drop(lease);
        self.inner.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.inner.completed.fetch_add(1, Ordering::AcqRel);
        self.drain();
    }
}

impl<H, C, R> fmt::Debug for DispatchQueue<H, C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("name", &self.inner.name)
            .field("pending", &self.inner.items.lock().len())
            .finish_non_exhaustive()
    }
}
