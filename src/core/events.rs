//! Lifecycle event sinks.
//!
//! The scheduler reports submissions, dispatches and outcomes both as log
//! lines and as structured [`LifecycleEvent`]s for whoever wants to keep them.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::task::{TaskCategory, TaskId};

/// Lifecycle action taken on a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    /// Registered with a scheduler.
    Submitted,
    /// Handed to an execution slot.
    Dispatched,
    /// Failed with attempts left and put back to pending.
    Retrying,
    /// Finished successfully.
    Finished,
    /// Failed with the try budget spent.
    Failed,
    /// Aborted.
    Aborted,
}

/// Lifecycle event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Related task.
    pub task_id: TaskId,
    /// Category of the task.
    pub category: TaskCategory,
    /// Action taken.
    pub action: LifecycleAction,
    /// Attempts started when the event was recorded.
    pub attempts: u32,
    /// Timestamp milliseconds.
    pub at_ms: u128,
}

/// Event sink abstraction.
pub trait EventSink: Send + Sync {
    /// Record an event.
    fn record(&self, event: LifecycleEvent);
}

/// In-memory sink with a bounded buffer; the oldest events are dropped first.
pub struct InMemoryEventSink {
    events: Mutex<VecDeque<LifecycleEvent>>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Actions recorded for one task, in order.
    #[must_use]
    pub fn actions_for(&self, task_id: TaskId) -> Vec<LifecycleAction> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .map(|e| e.action)
            .collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn record(&self, event: LifecycleEvent) {
        let mut events = self.events.lock();
        if self.max_events == 0 {
            return;
        }
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Sink that forwards every event to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: LifecycleEvent) {
        tracing::debug!(
            task_id = %event.task_id,
            category = %event.category,
            action = ?event.action,
            attempts = event.attempts,
            at_ms = %event.at_ms,
            "lifecycle event"
        );
    }
}
