//! Unit-of-work abstraction and its status state machine.
//!
//! A [`Task`] is a cheap, clonable handle. The producer keeps one clone to
//! `wait` on and read the result from; the scheduler keeps another to drive
//! execution. Every status change goes through [`TaskStatus::can_transition_to`],
//! so the edges below are the only ones a task can ever take:
//!
//! ```text
//! Pending  -> Executing | Aborted
//! Executing -> Finished | Failed | Aborted
//! Failed   -> Retrying            (only while attempts < try budget)
//! Retrying -> Pending | Aborted
//! ```

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::core::{AppResult, SchedulerError};
use crate::util::clock::Clock;

/// Opaque, globally unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Grouping tag for tasks. Only affects scan order, never priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    /// Uncategorised work.
    General,
    /// Database queries.
    Query,
    /// User-info cache persistence.
    UserCache,
    /// Channel statistics flushes.
    Statistics,
    /// Outbound chat or notification delivery.
    Notification,
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::General => "general",
            Self::Query => "query",
            Self::UserCache => "user_cache",
            Self::Statistics => "statistics",
            Self::Notification => "notification",
        };
        f.write_str(name)
    }
}

/// Status of a task in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its scheduled moment and a free slot.
    Pending,
    /// Claimed by a slot and running.
    Executing,
    /// Completed successfully.
    Finished,
    /// Failed with no attempts left.
    Failed,
    /// Failed with attempts left; goes back to `Pending` on the next scan.
    Retrying,
    /// Cancelled externally.
    Aborted,
}

impl TaskStatus {
    /// Whether `self -> next` is an edge of the state machine.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Executing | Self::Aborted)
                | (Self::Executing, Self::Finished | Self::Failed | Self::Aborted)
                | (Self::Failed, Self::Retrying)
                | (Self::Retrying, Self::Pending | Self::Aborted)
        )
    }

    /// Terminal as observed from outside `execute`.
    ///
    /// `Failed` only ever becomes visible once the try budget is spent.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Aborted)
    }

    /// Terminal or waiting for a retry; the point at which `wait` returns.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        self.is_terminal() || matches!(self, Self::Retrying)
    }
}

/// What a task body decided about its own attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Success with a payload.
    Finished(T),
    /// Failure; eligible for retry while the budget allows.
    Failed(String),
    /// The body gave up for good.
    Aborted,
}

/// Read-only view of the running attempt handed to a task body.
#[derive(Debug)]
pub struct TaskContext {
    id: TaskId,
    category: TaskCategory,
    attempt: u32,
    try_budget: u32,
    aborted: Arc<AtomicBool>,
}

impl TaskContext {
    /// Id of the running task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Category of the running task.
    #[must_use]
    pub const fn category(&self) -> TaskCategory {
        self.category
    }

    /// 1-based attempt number.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Effective try budget.
    #[must_use]
    pub const fn try_budget(&self) -> u32 {
        self.try_budget
    }

    /// Whether the task has been aborted while this attempt runs.
    ///
    /// Long bodies can check this to stop early; nothing preempts them otherwise.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

/// The work a task performs.
///
/// Returning `Err` (or panicking) counts as `Outcome::Failed`.
pub trait TaskBody<T>: Send + Sync + 'static {
    /// Run one attempt.
    fn run(&self, ctx: &TaskContext) -> AppResult<Outcome<T>>;
}

impl<T, F> TaskBody<T> for F
where
    F: Fn(&TaskContext) -> AppResult<Outcome<T>> + Send + Sync + 'static,
{
    fn run(&self, ctx: &TaskContext) -> AppResult<Outcome<T>> {
        self(ctx)
    }
}

/// Adapter for closures that return a plain payload.
struct FnBody<F>(F);

impl<T, F> TaskBody<T> for FnBody<F>
where
    F: Fn(&TaskContext) -> AppResult<T> + Send + Sync + 'static,
{
    fn run(&self, ctx: &TaskContext) -> AppResult<Outcome<T>> {
        (self.0)(ctx).map(Outcome::Finished)
    }
}

struct TaskState<T> {
    status: TaskStatus,
    moment_ms: u128,
    attempts: u32,
    result: Option<T>,
    last_error: Option<String>,
    history: Vec<TaskStatus>,
}

impl<T> TaskState<T> {
    fn transition(&mut self, to: TaskStatus) -> Result<(), SchedulerError> {
        if !self.status.can_transition_to(to) {
            return Err(SchedulerError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.history.push(to);
        Ok(())
    }
}

pub(crate) struct TaskInner<T> {
    id: TaskId,
    category: TaskCategory,
    try_budget: u32,
    label: String,
    body: Box<dyn TaskBody<T>>,
    aborted: Arc<AtomicBool>,
    state: Mutex<TaskState<T>>,
    changed: Condvar,
}

impl<T: Send + 'static> TaskInner<T> {
    fn effective_budget(&self) -> u32 {
        self.try_budget.max(1)
    }

    fn run_attempt(&self, attempt: u32) -> AppResult<Outcome<T>> {
        let ctx = TaskContext {
            id: self.id,
            category: self.category,
            attempt,
            try_budget: self.effective_budget(),
            aborted: Arc::clone(&self.aborted),
        };
        match catch_unwind(AssertUnwindSafe(|| self.body.run(&ctx))) {
            Ok(outcome) => outcome,
            Err(panic) => Err(anyhow::anyhow!("task body panicked: {}", panic_message(&panic))),
        }
    }

    /// Apply the outcome of an attempt that was claimed into `Executing`.
    fn settle(&self, attempt: u32, outcome: AppResult<Outcome<T>>) -> TaskStatus {
        let mut state = self.state.lock();
        if state.status != TaskStatus::Executing || state.attempts != attempt {
            if state.status == TaskStatus::Aborted {
                debug!(task_id = %self.id, attempts = attempt, "task aborted while executing; result dropped");
            }
            return state.status;
        }

        let applied = match outcome {
            Ok(Outcome::Finished(value)) => {
                state.result = Some(value);
                state.transition(TaskStatus::Finished)
            }
            Ok(Outcome::Aborted) => {
                self.aborted.store(true, Ordering::Release);
                state.transition(TaskStatus::Aborted)
            }
            Ok(Outcome::Failed(reason)) => {
                warn!(task_id = %self.id, attempts = attempt, %reason, "task attempt failed");
                state.last_error = Some(reason);
                state.transition(TaskStatus::Failed)
            }
            Err(err) => {
                error!(task_id = %self.id, attempts = attempt, error = %err, "error executing task");
                state.last_error = Some(err.to_string());
                state.transition(TaskStatus::Failed)
            }
        };
        if let Err(err) = applied {
            error!(task_id = %self.id, error = %err, "task state machine rejected outcome");
        }

        if state.status == TaskStatus::Failed && state.attempts < self.effective_budget() {
            let _ = state.transition(TaskStatus::Retrying);
        }

        let status = state.status;
        drop(state);
        self.changed.notify_all();
        status
    }
}

/// Object-safe view the scheduler keeps of heterogeneous tasks.
pub(crate) trait Schedulable: Send + Sync {
    fn id(&self) -> TaskId;
    fn category(&self) -> TaskCategory;
    fn label(&self) -> &str;
    fn status(&self) -> TaskStatus;
    fn moment_ms(&self) -> u128;
    fn attempts(&self) -> u32;
    fn try_budget(&self) -> u32;
    /// Bring a freshly submitted task to `Pending`.
    fn reset(&self) -> Result<(), SchedulerError>;
    /// `Pending -> Executing` if due; false when someone else got there first.
    fn claim(&self) -> bool;
    /// Run an attempt already claimed with `claim`.
    fn run_claimed(&self) -> TaskStatus;
    /// Settle claimed attempt `attempt` as failed if it is still executing.
    fn fail_claimed(&self, attempt: u32, reason: String) -> TaskStatus;
    /// `Retrying -> Pending`.
    fn requeue(&self) -> bool;
    fn abort(&self) -> bool;
}

impl<T: Send + 'static> Schedulable for TaskInner<T> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn category(&self) -> TaskCategory {
        self.category
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    fn moment_ms(&self) -> u128 {
        self.state.lock().moment_ms
    }

    fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    fn try_budget(&self) -> u32 {
        self.try_budget
    }

    fn reset(&self) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        match state.status {
            TaskStatus::Pending => Ok(()),
            TaskStatus::Retrying => state.transition(TaskStatus::Pending),
            other => Err(SchedulerError::InvalidTransition {
                from: other,
                to: TaskStatus::Pending,
            }),
        }
    }

    fn claim(&self) -> bool {
        let mut state = self.state.lock();
        if state.transition(TaskStatus::Executing).is_err() {
            return false;
        }
        state.attempts += 1;
        drop(state);
        self.changed.notify_all();
        true
    }

    fn run_claimed(&self) -> TaskStatus {
        let attempt = {
            let state = self.state.lock();
            if state.status != TaskStatus::Executing {
                return state.status;
            }
            state.attempts
        };
        let outcome = self.run_attempt(attempt);
        self.settle(attempt, outcome)
    }

    fn fail_claimed(&self, attempt: u32, reason: String) -> TaskStatus {
        self.settle(attempt, Ok(Outcome::Failed(reason)))
    }

    fn requeue(&self) -> bool {
        let ok = self.state.lock().transition(TaskStatus::Pending).is_ok();
        if ok {
            self.changed.notify_all();
        }
        ok
    }

    fn abort(&self) -> bool {
        let mut state = self.state.lock();
        if state.transition(TaskStatus::Aborted).is_err() {
            return false;
        }
        self.aborted.store(true, Ordering::Release);
        drop(state);
        self.changed.notify_all();
        true
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Builder for tasks that need a label, budget or initial moment.
pub struct TaskBuilder {
    category: TaskCategory,
    try_budget: u32,
    label: Option<String>,
    moment_ms: u128,
}

impl TaskBuilder {
    /// Start building a task in `category`: one attempt, due immediately.
    #[must_use]
    pub const fn new(category: TaskCategory) -> Self {
        Self {
            category,
            try_budget: 1,
            label: None,
            moment_ms: 0,
        }
    }

    /// Maximum number of attempts. 0 behaves like 1.
    #[must_use]
    pub const fn try_budget(mut self, try_budget: u32) -> Self {
        self.try_budget = try_budget;
        self
    }

    /// Human-readable description used in log lines.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Earliest moment the task may run.
    #[must_use]
    pub const fn moment_ms(mut self, moment_ms: u128) -> Self {
        self.moment_ms = moment_ms;
        self
    }

    /// Finish with a body.
    pub fn build<T: Send + 'static>(self, body: impl TaskBody<T>) -> Task<T> {
        let label = self
            .label
            .unwrap_or_else(|| format!("{} task", self.category));
        Task {
            inner: Arc::new(TaskInner {
                id: TaskId::new(),
                category: self.category,
                try_budget: self.try_budget,
                label,
                body: Box::new(body),
                aborted: Arc::new(AtomicBool::new(false)),
                state: Mutex::new(TaskState {
                    status: TaskStatus::Pending,
                    moment_ms: self.moment_ms,
                    attempts: 0,
                    result: None,
                    last_error: None,
                    history: vec![TaskStatus::Pending],
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Finish with a closure returning a plain payload.
    pub fn build_fn<T, F>(self, f: F) -> Task<T>
    where
        T: Send + 'static,
        F: Fn(&TaskContext) -> AppResult<T> + Send + Sync + 'static,
    {
        self.build(FnBody(f))
    }
}

/// Handle to a unit of deferred, possibly retried work.
pub struct Task<T> {
    inner: Arc<TaskInner<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("category", &self.inner.category)
            .field("label", &self.inner.label)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Task<T> {
    /// Task with an explicit body, due immediately.
    pub fn new(category: TaskCategory, try_budget: u32, body: impl TaskBody<T>) -> Self {
        TaskBuilder::new(category).try_budget(try_budget).build(body)
    }

    /// Task wrapping a closure; `Ok(v)` finishes with `v`, `Err` fails.
    pub fn from_fn<F>(category: TaskCategory, try_budget: u32, f: F) -> Self
    where
        F: Fn(&TaskContext) -> AppResult<T> + Send + Sync + 'static,
    {
        TaskBuilder::new(category).try_budget(try_budget).build_fn(f)
    }

    /// Unique id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Grouping tag.
    #[must_use]
    pub fn category(&self) -> TaskCategory {
        self.inner.category
    }

    /// Log label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Try budget fixed at construction.
    #[must_use]
    pub fn try_budget(&self) -> u32 {
        self.inner.try_budget
    }

    /// Attempts started so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.inner.attempts()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.inner.status()
    }

    /// Earliest eligible run time.
    #[must_use]
    pub fn moment_ms(&self) -> u128 {
        self.inner.moment_ms()
    }

    /// Every status the task has been in, in order, starting with `Pending`.
    #[must_use]
    pub fn history(&self) -> Vec<TaskStatus> {
        self.inner.state.lock().history.clone()
    }

    /// Reason of the most recent failed attempt.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().last_error.clone()
    }

    /// Move the result payload out, leaving `None`.
    #[must_use]
    pub fn take_result(&self) -> Option<T> {
        self.inner.state.lock().result.take()
    }

    /// Set the earliest eligible run time. Only allowed while `Pending`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` when the task is not `Pending`.
    pub fn schedule_at(&self, moment_ms: u128) -> Result<(), SchedulerError> {
        let mut state = self.inner.state.lock();
        if state.status != TaskStatus::Pending {
            return Err(SchedulerError::InvalidTransition {
                from: state.status,
                to: TaskStatus::Pending,
            });
        }
        state.moment_ms = moment_ms;
        Ok(())
    }

    /// Schedule `delay` after the clock's current time.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` when the task is not `Pending`.
    pub fn schedule_in(&self, delay: Duration, clock: &dyn Clock) -> Result<(), SchedulerError> {
        self.schedule_at(clock.now_ms() + delay.as_millis())
    }

    /// Run one attempt on the calling thread.
    ///
    /// Only a `Pending` task runs; any other status is returned unchanged.
    /// Body errors and panics never escape; they become `Failed`, then
    /// `Retrying` while attempts remain.
    pub fn execute(&self) -> TaskStatus {
        if !self.inner.claim() {
            return self.status();
        }
        self.inner.run_claimed()
    }

    /// Cancel the task. Returns false if it was already terminal.
    ///
    /// An attempt in flight keeps running, but its outcome is discarded.
    pub fn abort(&self) -> bool {
        self.inner.abort()
    }

    /// Block until the task is terminal or retrying, or `timeout` elapses.
    ///
    /// `None` or a zero timeout waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> TaskStatus {
        let deadline = timeout
            .filter(|t| !t.is_zero())
            .map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock();
        while !state.status.is_settled() {
            match deadline {
                Some(deadline) => {
                    if self.inner.changed.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.changed.wait(&mut state),
            }
        }
        state.status
    }

    /// Async variant of [`Task::wait`] that parks on tokio's blocking pool.
    #[cfg(feature = "tokio-runtime")]
    pub async fn wait_async(&self, timeout: Option<Duration>) -> TaskStatus {
        let task = self.clone();
        match tokio::task::spawn_blocking(move || task.wait(timeout)).await {
            Ok(status) => status,
            Err(_) => self.status(),
        }
    }

    pub(crate) fn schedulable(&self) -> Arc<dyn Schedulable> {
        self.inner.clone()
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Clone of the result payload; `Some` only after `Finished`.
    #[must_use]
    pub fn result(&self) -> Option<T> {
        self.inner.state.lock().result.clone()
    }
}
