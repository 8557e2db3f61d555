//! Tokio runtime spawner implementation.

use std::sync::Arc;

use crate::core::{Job, SchedulerError, Spawn};

/// Tokio-based spawner that runs jobs on the runtime's blocking pool.
///
/// Task bodies and pooled commands are synchronous and may sleep-poll, so
/// they go through `spawn_blocking` rather than the async worker threads.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: Arc<tokio::runtime::Handle>,
}

impl TokioSpawner {
    /// Create a new TokioSpawner from a tokio runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Spawner bound to the runtime the caller is running inside.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Spawn` when called outside a tokio runtime.
    pub fn current() -> Result<Self, SchedulerError> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| SchedulerError::Spawn(e.to_string()))
    }
}

impl Spawn for TokioSpawner {
    fn spawn(&self, _name: &str, job: Job) -> Result<(), SchedulerError> {
        drop(self.handle.spawn_blocking(job));
        Ok(())
    }
}
