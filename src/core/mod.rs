//! Core scheduling abstractions: tasks, slots, pools and dispatch.

pub mod dispatch_queue;
pub mod error;
pub mod events;
pub mod executor;
pub mod resource_pool;
pub mod rotation;
pub mod scheduler;
pub mod task;

pub use dispatch_queue::{Completion, DispatchQueue, Ticket};
pub use error::{AppResult, SchedulerError};
pub use events::{EventSink, InMemoryEventSink, LifecycleAction, LifecycleEvent, TracingEventSink};
pub use executor::{CommandExecutor, Job, Spawn};
pub use resource_pool::{Lease, PoolEntry, PoolLimits, PoolStats, ResourcePool, ResourceSource};
pub use rotation::{CredentialRotation, RefreshTimer};
pub use scheduler::{Scheduler, SchedulerOptions, SchedulerStats, TickReport};
pub use task::{
    Outcome, Task, TaskBody, TaskBuilder, TaskCategory, TaskContext, TaskId, TaskStatus,
};
