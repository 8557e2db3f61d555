//! Fixed-slot task scheduler.
//!
//! Tasks are grouped by category and kept in submission order. Each tick scans
//! the table once: due `Pending` tasks are handed to free slots, `Retrying`
//! tasks go back to `Pending` for a later tick, and terminal tasks are logged
//! and dropped from the table. A slot stays occupied until the body it runs
//! has returned, so at most `slot_count` bodies ever run at once.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::core::events::{EventSink, LifecycleAction, LifecycleEvent};
use crate::core::task::{Schedulable, Task, TaskCategory, TaskStatus};
use crate::core::{Job, SchedulerError, Spawn};
use crate::util::clock::Clock;

/// Tunables for a [`Scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Number of execution slots.
    pub slot_count: usize,
    /// Pause between loop ticks.
    pub tick_interval: Duration,
    /// Dispatches allowed per loop tick; `0` is unbounded.
    pub max_dispatch_per_tick: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            slot_count: 10,
            tick_interval: Duration::from_millis(200),
            max_dispatch_per_tick: 20,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Tasks handed to a slot.
    pub dispatched: usize,
    /// Tasks moved from `Retrying` back to `Pending`.
    pub retried: usize,
    /// Terminal tasks dropped from the table.
    pub removed: usize,
    /// Claimed tasks whose slot could not be started.
    pub spawn_failures: usize,
}

impl TickReport {
    /// Whether the tick changed anything.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.dispatched == 0 && self.retried == 0 && self.removed == 0 && self.spawn_failures == 0
    }
}

/// Point-in-time view of a scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Configured slots.
    pub slot_count: usize,
    /// Slots running a body right now.
    pub busy_slots: usize,
    /// Tasks still in the table.
    pub tracked: usize,
    /// Tracked tasks waiting for a slot.
    pub pending: usize,
    /// Tracked tasks claimed into `Executing`.
    pub executing: usize,
    /// Dispatches since creation.
    pub dispatched_total: u64,
    /// Requeues since creation.
    pub retried_total: u64,
    /// Tasks removed as `Finished`.
    pub finished_total: u64,
    /// Tasks removed as `Failed`.
    pub failed_total: u64,
    /// Tasks removed as `Aborted`.
    pub aborted_total: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    retried: AtomicU64,
    finished: AtomicU64,
    failed: AtomicU64,
    aborted: AtomicU64,
}

/// Clears the slot flag once the job holding it is gone.
struct SlotGuard(Arc<AtomicBool>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A claimed attempt travelling to its slot.
///
/// If it is dropped before the attempt ran (the spawner discarded the job,
/// or `run_claimed` unwound), the attempt is settled as failed before the
/// slot is freed, so the task never stays in `Executing`.
struct ClaimedAttempt {
    task: Arc<dyn Schedulable>,
    attempt: u32,
    slot_index: usize,
    ran: bool,
    _slot: SlotGuard,
}

impl ClaimedAttempt {
    fn run(mut self) {
        if catch_unwind(AssertUnwindSafe(|| self.task.run_claimed())).is_ok() {
            self.ran = true;
        } else {
            error!(task_id = %self.task.id(), slot = self.slot_index, "error executing task from slot");
        }
    }
}

impl Drop for ClaimedAttempt {
    fn drop(&mut self) {
        if !self.ran {
            let status = self.task.fail_claimed(self.attempt, "slot job dropped before completing".into());
            if status != TaskStatus::Executing {
                debug!(task_id = %self.task.id(), slot = self.slot_index, ?status, "settled dropped slot job");
            }
        }
    }
}

#[derive(Default)]
struct LoopState {
    stop_requested: bool,
    handle: Option<JoinHandle<()>>,
}

type CategoryTable = Vec<(TaskCategory, Vec<Arc<dyn Schedulable>>)>;

struct SchedulerInner {
    options: SchedulerOptions,
    spawner: Arc<dyn Spawn>,
    clock: Arc<dyn Clock>,
    events: Option<Arc<dyn EventSink>>,
    tasks: Mutex<CategoryTable>,
    slots: Vec<Arc<AtomicBool>>,
    counters: Counters,
    loop_state: Mutex<LoopState>,
    loop_wake: Condvar,
}

/// Cheap, clonable scheduler handle.
///
/// ```rust,ignore
/// let scheduler = Scheduler::new(SchedulerOptions::default(), Arc::new(ThreadSpawner::new()), system_clock());
/// let task = scheduler.submit(TaskBuilder::new(TaskCategory::Query).try_budget(3).build_fn(|_| Ok(42)))?;
/// scheduler.start()?;
/// task.wait(Some(Duration::from_secs(5)));
/// scheduler.stop();
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler. A `slot_count` of zero is raised to one.
    #[must_use]
    pub fn new(options: SchedulerOptions, spawner: Arc<dyn Spawn>, clock: Arc<dyn Clock>) -> Self {
        Self::build(options, spawner, clock, None)
    }

    /// Create a scheduler that also reports lifecycle events to `sink`.
    #[must_use]
    pub fn with_event_sink(
        options: SchedulerOptions,
        spawner: Arc<dyn Spawn>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self::build(options, spawner, clock, Some(sink))
    }

    fn build(
        options: SchedulerOptions,
        spawner: Arc<dyn Spawn>,
        clock: Arc<dyn Clock>,
        events: Option<Arc<dyn EventSink>>,
    ) -> Self {
        let options = SchedulerOptions {
            slot_count: options.slot_count.max(1),
            ..options
        };
        let slots = (0..options.slot_count)
            .map(|_| Arc::new(AtomicBool::new(false)))
            .collect();
        Self {
            inner: Arc::new(SchedulerInner {
                options,
                spawner,
                clock,
                events,
                tasks: Mutex::new(Vec::new()),
                slots,
                counters: Counters::default(),
                loop_state: Mutex::new(LoopState::default()),
                loop_wake: Condvar::new(),
            }),
        }
    }

    /// Active options.
    #[must_use]
    pub fn options(&self) -> SchedulerOptions {
        self.inner.options
    }

    /// Register `task` for execution once its moment has arrived.
    ///
    /// A `Retrying` task is put back to `Pending`. Submitting a task that is
    /// already tracked is a no-op.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` if the task is executing or terminal.
    pub fn submit<T: Send + 'static>(&self, task: Task<T>) -> Result<Task<T>, SchedulerError> {
        self.inner.register(task.schedulable())?;
        Ok(task)
    }

    /// Set the task's moment to `moment_ms` and submit it.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::submit`].
    pub fn submit_at<T: Send + 'static>(
        &self,
        task: Task<T>,
        moment_ms: u128,
    ) -> Result<Task<T>, SchedulerError> {
        task.schedule_at(moment_ms)?;
        self.submit(task)
    }

    /// Submit `task` to run no earlier than `delay` from now on the scheduler's clock.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::submit`].
    pub fn submit_in<T: Send + 'static>(
        &self,
        task: Task<T>,
        delay: Duration,
    ) -> Result<Task<T>, SchedulerError> {
        task.schedule_in(delay, self.inner.clock.as_ref())?;
        self.submit(task)
    }

    /// Run one scan-and-dispatch pass with the configured dispatch budget.
    pub fn tick(&self) -> TickReport {
        self.inner.tick(self.inner.options.max_dispatch_per_tick)
    }

    /// Run one pass dispatching at most `max_dispatch` tasks; `0` is unbounded.
    pub fn tick_with_budget(&self, max_dispatch: usize) -> TickReport {
        self.inner.tick(max_dispatch)
    }

    /// Start the background loop. Starting a running loop does nothing.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Spawn` if the loop thread could not be created.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self.inner.loop_state.lock();
        if state.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("scheduler loop already running");
            return Ok(());
        }
        state.stop_requested = false;
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("cw-scheduler".into())
            .spawn(move || inner.run_loop())
            .map_err(|e| SchedulerError::Spawn(e.to_string()))?;
        state.handle = Some(handle);
        info!(
            slots = self.inner.options.slot_count,
            interval_ms = self.inner.options.tick_interval.as_millis(),
            "scheduler started"
        );
        Ok(())
    }

    /// Ask the loop to exit after its current tick, without waiting for it.
    pub fn request_stop(&self) {
        self.inner.loop_state.lock().stop_requested = true;
        self.inner.loop_wake.notify_all();
    }

    /// Stop the loop and block until it has exited.
    ///
    /// Tasks already running in slots keep running; tracked tasks stay in
    /// the table and resume on the next `start` or `tick`.
    pub fn stop(&self) {
        self.request_stop();
        let handle = self.inner.loop_state.lock().handle.take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("scheduler loop thread panicked");
            }
        }
    }

    /// Whether the background loop is not running.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner
            .loop_state
            .lock()
            .handle
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Current counters and table summary.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let (tracked, pending, executing) = {
            let tasks = self.inner.tasks.lock();
            let mut tracked = 0;
            let mut pending = 0;
            let mut executing = 0;
            for task in tasks.iter().flat_map(|(_, list)| list.iter()) {
                tracked += 1;
                match task.status() {
                    TaskStatus::Pending => pending += 1,
                    TaskStatus::Executing => executing += 1,
                    _ => {}
                }
            }
            (tracked, pending, executing)
        };
        let counters = &self.inner.counters;
        SchedulerStats {
            slot_count: self.inner.slots.len(),
            busy_slots: self.busy_slots(),
            tracked,
            pending,
            executing,
            dispatched_total: counters.dispatched.load(Ordering::Relaxed),
            retried_total: counters.retried.load(Ordering::Relaxed),
            finished_total: counters.finished.load(Ordering::Relaxed),
            failed_total: counters.failed.load(Ordering::Relaxed),
            aborted_total: counters.aborted.load(Ordering::Relaxed),
        }
    }

    /// Slots running a body right now.
    #[must_use]
    pub fn busy_slots(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|s| s.load(Ordering::Acquire))
            .count()
    }

    /// Tasks still tracked, across all categories.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.inner.tasks.lock().iter().map(|(_, list)| list.len()).sum()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("options", &self.inner.options)
            .field("tracked", &self.tracked())
            .field("busy_slots", &self.busy_slots())
            .finish_non_exhaustive()
    }
}

impl SchedulerInner {
    fn event(&self, task: &dyn Schedulable, action: LifecycleAction) -> Option<LifecycleEvent> {
        self.events.as_ref().map(|_| LifecycleEvent {
            task_id: task.id(),
            category: task.category(),
            action,
            attempts: task.attempts(),
            at_ms: self.clock.now_ms(),
        })
    }

    /// Hand events to the sink. Never called with the task table locked.
    fn publish(&self, events: impl IntoIterator<Item = LifecycleEvent>) {
        if let Some(sink) = &self.events {
            for event in events {
                sink.record(event);
            }
        }
    }

    fn emit(&self, task: &dyn Schedulable, action: LifecycleAction) {
        self.publish(self.event(task, action));
    }

    fn register(&self, task: Arc<dyn Schedulable>) -> Result<(), SchedulerError> {
        task.reset()?;
        let mut tasks = self.tasks.lock();
        let category = task.category();
        let list = if let Some(pos) = tasks.iter().position(|(c, _)| *c == category) {
            &mut tasks[pos].1
        } else {
            tasks.push((category, Vec::new()));
            let last = tasks.len() - 1;
            &mut tasks[last].1
        };
        if list.iter().any(|t| t.id() == task.id()) {
            debug!(task_id = %task.id(), "task already tracked");
            return Ok(());
        }
        list.push(Arc::clone(&task));
        drop(tasks);

        info!(
            task_id = %task.id(),
            category = %category,
            label = task.label(),
            moment_ms = task.moment_ms(),
            "adding task"
        );
        self.emit(task.as_ref(), LifecycleAction::Submitted);
        Ok(())
    }

    fn free_slot(&self) -> Option<(usize, SlotGuard)> {
        self.slots
            .iter()
            .position(|slot| {
                slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            })
            .map(|index| (index, SlotGuard(Arc::clone(&self.slots[index]))))
    }

    fn tick(&self, max_dispatch: usize) -> TickReport {
        let now = self.clock.now_ms();
        let mut report = TickReport::default();
        let mut claimed: Vec<ClaimedAttempt> = Vec::new();
        let mut events: Vec<LifecycleEvent> = Vec::new();

        {
            let mut tasks = self.tasks.lock();
            for task in tasks.iter().flat_map(|(_, list)| list.iter()) {
                match task.status() {
                    TaskStatus::Pending => {
                        if max_dispatch != 0 && claimed.len() >= max_dispatch {
                            continue;
                        }
                        if task.moment_ms() > now {
                            continue;
                        }
                        let Some((slot_index, guard)) = self.free_slot() else {
                            continue;
                        };
                        if task.claim() {
                            claimed.push(ClaimedAttempt {
                                task: Arc::clone(task),
                                attempt: task.attempts(),
                                slot_index,
                                ran: false,
                                _slot: guard,
                            });
                        }
                    }
                    TaskStatus::Retrying => {
                        warn!(
                            task_id = %task.id(),
                            category = %task.category(),
                            attempts = task.attempts(),
                            try_budget = task.try_budget(),
                            "task failed and will be retried"
                        );
                        if task.requeue() {
                            report.retried += 1;
                            self.counters.retried.fetch_add(1, Ordering::Relaxed);
                            events.extend(self.event(task.as_ref(), LifecycleAction::Retrying));
                        }
                    }
                    TaskStatus::Executing
                    | TaskStatus::Finished
                    | TaskStatus::Failed
                    | TaskStatus::Aborted => {}
                }
            }

            for (_, list) in tasks.iter_mut() {
                list.retain(|task| {
                    let status = task.status();
                    if !status.is_terminal() {
                        return true;
                    }
                    events.extend(self.record_outcome(task.as_ref(), status));
                    report.removed += 1;
                    false
                });
            }
            tasks.retain(|(_, list)| !list.is_empty());
        }
        self.publish(events);

        for job in claimed {
            let task = Arc::clone(&job.task);
            let (attempt, slot_index) = (job.attempt, job.slot_index);
            self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            self.emit(task.as_ref(), LifecycleAction::Dispatched);
            debug!(task_id = %task.id(), attempt, slot = slot_index, "dispatching task");

            let run: Job = Box::new(move || job.run());
            match self.spawner.spawn(&format!("slot-{slot_index}"), run) {
                Ok(()) => report.dispatched += 1,
                Err(err) => {
                    error!(task_id = %task.id(), slot = slot_index, error = %err, "failed to start slot");
                    task.fail_claimed(attempt, err.to_string());
                    report.spawn_failures += 1;
                }
            }
        }

        report
    }

    fn record_outcome(&self, task: &dyn Schedulable, status: TaskStatus) -> Option<LifecycleEvent> {
        match status {
            TaskStatus::Finished => {
                info!(task_id = %task.id(), category = %task.category(), attempts = task.attempts(), "task finished");
                self.counters.finished.fetch_add(1, Ordering::Relaxed);
                self.event(task, LifecycleAction::Finished)
            }
            TaskStatus::Failed => {
                error!(
                    task_id = %task.id(),
                    category = %task.category(),
                    attempts = task.attempts(),
                    "task failed; try budget exhausted"
                );
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.event(task, LifecycleAction::Failed)
            }
            TaskStatus::Aborted => {
                info!(task_id = %task.id(), category = %task.category(), "task aborted");
                self.counters.aborted.fetch_add(1, Ordering::Relaxed);
                self.event(task, LifecycleAction::Aborted)
            }
            TaskStatus::Pending | TaskStatus::Executing | TaskStatus::Retrying => None,
        }
    }

    fn run_loop(&self) {
        debug!("scheduler loop entered");
        loop {
            if self.loop_state.lock().stop_requested {
                break;
            }
            match catch_unwind(AssertUnwindSafe(|| self.tick(self.options.max_dispatch_per_tick))) {
                Ok(report) if !report.is_idle() => debug!(?report, "scheduler tick"),
                Ok(_) => {}
                Err(_) => error!("scheduler tick panicked"),
            }

            let mut state = self.loop_state.lock();
            if !state.stop_requested {
                let _ = self.loop_wake.wait_for(&mut state, self.options.tick_interval);
            }
            if state.stop_requested {
                break;
            }
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::InMemoryEventSink;
    use crate::core::task::TaskBuilder;
    use crate::runtime::ThreadSpawner;
    use crate::util::clock::ManualClock;

    fn scheduler(slots: usize, clock: Arc<ManualClock>) -> Scheduler {
        Scheduler::new(
            SchedulerOptions {
                slot_count: slots,
                ..SchedulerOptions::default()
            },
            Arc::new(ThreadSpawner::new()),
            clock,
        )
    }

    struct FailingSpawner;

    impl Spawn for FailingSpawner {
        fn spawn(&self, _name: &str, _job: Job) -> Result<(), SchedulerError> {
            Err(SchedulerError::Spawn("no threads left".into()))
        }
    }

    /// Accepts every job and throws it away.
    struct DiscardingSpawner;

    impl Spawn for DiscardingSpawner {
        fn spawn(&self, _name: &str, job: Job) -> Result<(), SchedulerError> {
            drop(job);
            Ok(())
        }
    }

    /// Runs jobs on threads and remembers the names they were started under.
    #[derive(Default)]
    struct NamingSpawner {
        names: Mutex<Vec<String>>,
    }

    impl Spawn for NamingSpawner {
        fn spawn(&self, name: &str, job: Job) -> Result<(), SchedulerError> {
            self.names.lock().push(name.to_string());
            ThreadSpawner::new().spawn(name, job)
        }
    }

    /// Sink that reads scheduler stats every time it records an event.
    struct StatsReadingSink {
        scheduler: Mutex<Option<Scheduler>>,
        seen: Mutex<Vec<usize>>,
    }

    impl EventSink for StatsReadingSink {
        fn record(&self, _event: LifecycleEvent) {
            let scheduler = self.scheduler.lock().clone();
            if let Some(scheduler) = scheduler {
                self.seen.lock().push(scheduler.stats().tracked);
            }
        }
    }

    #[test]
    fn future_moment_is_not_dispatched() {
        let clock = ManualClock::shared(1_000);
        let scheduler = scheduler(2, Arc::clone(&clock));
        let task = scheduler
            .submit_in(
                TaskBuilder::new(TaskCategory::General).build_fn(|_| Ok(1)),
                Duration::from_millis(500),
            )
            .unwrap();

        assert_eq!(scheduler.tick().dispatched, 0);
        assert_eq!(task.status(), TaskStatus::Pending);

        clock.advance(Duration::from_millis(500));
        assert_eq!(scheduler.tick().dispatched, 1);
        assert_eq!(task.wait(Some(Duration::from_secs(5))), TaskStatus::Finished);
    }

    #[test]
    fn dispatch_budget_limits_one_tick() {
        let clock = ManualClock::shared(0);
        let scheduler = scheduler(8, clock);
        let tasks: Vec<_> = (0..5)
            .map(|i| {
                scheduler
                    .submit(TaskBuilder::new(TaskCategory::Query).build_fn(move |_| Ok(i)))
                    .unwrap()
            })
            .collect();

        assert_eq!(scheduler.tick_with_budget(2).dispatched, 2);
        assert_eq!(scheduler.tick_with_budget(0).dispatched, 3);
        for task in &tasks {
            assert_eq!(task.wait(Some(Duration::from_secs(5))), TaskStatus::Finished);
        }
    }

    #[test]
    fn duplicate_submit_is_tracked_once() {
        let scheduler = scheduler(1, ManualClock::shared(0));
        let task = TaskBuilder::new(TaskCategory::General).build_fn(|_| Ok(()));
        scheduler.submit(task.clone()).unwrap();
        scheduler.submit(task).unwrap();
        assert_eq!(scheduler.tracked(), 1);
    }

    #[test]
    fn terminal_task_cannot_be_submitted() {
        let scheduler = scheduler(1, ManualClock::shared(0));
        let task = TaskBuilder::new(TaskCategory::General).build_fn(|_| Ok(()));
        task.abort();
        assert!(matches!(
            scheduler.submit(task),
            Err(SchedulerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn spawn_failure_counts_as_failed_attempt() {
        let scheduler = Scheduler::new(
            SchedulerOptions::default(),
            Arc::new(FailingSpawner),
            ManualClock::shared(0),
        );
        let task = scheduler
            .submit(
                TaskBuilder::new(TaskCategory::General)
                    .try_budget(2)
                    .build_fn(|_| Ok(())),
            )
            .unwrap();

        let report = scheduler.tick();
        assert_eq!(report.spawn_failures, 1);
        assert_eq!(task.status(), TaskStatus::Retrying);
        assert_eq!(scheduler.busy_slots(), 0);

        assert_eq!(scheduler.tick().retried, 1);
        scheduler.tick();
        assert_eq!(task.status(), TaskStatus::Failed);
        assert_eq!(task.attempts(), 2);
        assert_eq!(scheduler.tick().removed, 1);
        assert_eq!(scheduler.stats().failed_total, 1);
    }

    #[test]
    fn lifecycle_events_follow_task() {
        let sink = Arc::new(InMemoryEventSink::new(64));
        let scheduler = Scheduler::with_event_sink(
            SchedulerOptions::default(),
            Arc::new(ThreadSpawner::new()),
            ManualClock::shared(0),
            Arc::clone(&sink) as Arc<dyn EventSink>,
        );
        let task = scheduler
            .submit(TaskBuilder::new(TaskCategory::Statistics).build_fn(|_| Ok("done")))
            .unwrap();
        scheduler.tick();
        assert_eq!(task.wait(Some(Duration::from_secs(5))), TaskStatus::Finished);
        scheduler.tick();

        assert_eq!(
            sink.actions_for(task.id()),
            vec![
                LifecycleAction::Submitted,
                LifecycleAction::Dispatched,
                LifecycleAction::Finished
            ]
        );
    }

    #[test]
    fn discarded_slot_job_settles_task() {
        let scheduler = Scheduler::new(
            SchedulerOptions::default(),
            Arc::new(DiscardingSpawner),
            ManualClock::shared(0),
        );
        let task = scheduler
            .submit(
                TaskBuilder::new(TaskCategory::General)
                    .try_budget(2)
                    .build_fn(|_| Ok(())),
            )
            .unwrap();

        assert_eq!(scheduler.tick().dispatched, 1);
        assert_eq!(task.wait(Some(Duration::from_secs(1))), TaskStatus::Retrying);
        assert_eq!(scheduler.busy_slots(), 0);
        assert!(task.last_error().unwrap().contains("dropped"));

        assert_eq!(scheduler.tick().retried, 1);
        scheduler.tick();
        assert_eq!(task.wait(Some(Duration::from_secs(1))), TaskStatus::Failed);
        assert_eq!(scheduler.tick().removed, 1);
        assert_eq!(scheduler.tracked(), 0);
    }

    #[test]
    fn slot_names_match_taken_slots() {
        let spawner = Arc::new(NamingSpawner::default());
        let scheduler = Scheduler::new(
            SchedulerOptions {
                slot_count: 3,
                ..SchedulerOptions::default()
            },
            Arc::clone(&spawner) as Arc<dyn Spawn>,
            ManualClock::shared(0),
        );
        let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
        let blocker = scheduler
            .submit(TaskBuilder::new(TaskCategory::General).build_fn(move |_| {
                release_rx.recv().ok();
                Ok(())
            }))
            .unwrap();
        scheduler.tick();

        let quick: Vec<_> = (0..2)
            .map(|_| {
                scheduler
                    .submit(TaskBuilder::new(TaskCategory::General).build_fn(|_| Ok(())))
                    .unwrap()
            })
            .collect();
        assert_eq!(scheduler.tick().dispatched, 2);
        for task in &quick {
            assert_eq!(task.wait(Some(Duration::from_secs(5))), TaskStatus::Finished);
        }
        release_tx.send(()).unwrap();
        assert_eq!(blocker.wait(Some(Duration::from_secs(5))), TaskStatus::Finished);

        assert_eq!(*spawner.names.lock(), vec!["slot-0", "slot-1", "slot-2"]);
    }

    #[test]
    fn event_sink_may_call_back_into_scheduler() {
        let sink = Arc::new(StatsReadingSink {
            scheduler: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        });
        let scheduler = Scheduler::with_event_sink(
            SchedulerOptions::default(),
            Arc::new(ThreadSpawner::new()),
            ManualClock::shared(0),
            Arc::clone(&sink) as Arc<dyn EventSink>,
        );
        *sink.scheduler.lock() = Some(scheduler.clone());

        let task = scheduler
            .submit(
                TaskBuilder::new(TaskCategory::General)
                    .try_budget(2)
                    .build_fn(|ctx| {
                        if ctx.attempt() == 1 {
                            anyhow::bail!("first attempt fails");
                        }
                        Ok(())
                    }),
            )
            .unwrap();
        scheduler.tick();
        assert_eq!(task.wait(Some(Duration::from_secs(5))), TaskStatus::Retrying);
        assert_eq!(scheduler.tick().retried, 1);
        scheduler.tick();
        assert_eq!(task.wait(Some(Duration::from_secs(5))), TaskStatus::Finished);
        assert_eq!(scheduler.tick().removed, 1);

        *sink.scheduler.lock() = None;
        assert_eq!(sink.seen.lock().len(), 5);
    }
}
