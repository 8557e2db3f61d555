//! Spawner that runs each job on a named OS thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::core::{Job, SchedulerError, Spawn};

/// Runs every job on its own short-lived OS thread.
///
/// Thread count stays bounded because callers only spawn while they hold a
/// free slot or a free pool entry.
#[derive(Debug, Clone, Default)]
pub struct ThreadSpawner {
    stack_size: Option<usize>,
    spawned: Arc<AtomicU64>,
}

impl ThreadSpawner {
    /// Spawner using the platform default stack size.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawner with an explicit thread stack size in bytes.
    #[must_use]
    pub fn with_stack_size(stack_size: usize) -> Self {
        Self {
            stack_size: Some(stack_size),
            spawned: Arc::default(),
        }
    }

    /// Threads started so far.
    #[must_use]
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }
}

impl Spawn for ThreadSpawner {
    fn spawn(&self, name: &str, job: Job) -> Result<(), SchedulerError> {
        let seq = self.spawned.fetch_add(1, Ordering::Relaxed);
        let mut builder = thread::Builder::new().name(format!("cw-{name}-{seq}"));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        builder
            .spawn(job)
            .map(|_| debug!(context = name, seq, "spawned worker thread"))
            .map_err(|e| SchedulerError::Spawn(e.to_string()))
    }
}
