//! In-memory store with canned responses and failure injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::bail;
use parking_lot::Mutex;
use tracing::debug;

use super::{Command, Connection, ResultRows};
use crate::core::AppResult;

/// Shared fake database. Unknown commands return no rows.
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    responses: Mutex<HashMap<String, ResultRows>>,
    failures: Mutex<HashMap<String, u32>>,
    executed: Mutex<Vec<Command>>,
    connections: AtomicUsize,
}

impl InMemoryDatabase {
    /// Create an empty database.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer `sql` with `rows`.
    pub fn respond(&self, sql: impl Into<String>, rows: ResultRows) {
        self.responses.lock().insert(sql.into(), rows);
    }

    /// Fail the next `times` executions of `sql`.
    pub fn fail_next(&self, sql: impl Into<String>, times: u32) {
        self.failures.lock().insert(sql.into(), times);
    }

    /// Commands executed so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<Command> {
        self.executed.lock().clone()
    }

    /// Connections opened so far.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Open a connection.
    #[must_use]
    pub fn connect(self: &Arc<Self>) -> InMemoryConnection {
        let id = self.connections.fetch_add(1, Ordering::AcqRel);
        InMemoryConnection {
            id,
            db: Arc::clone(self),
            open: AtomicBool::new(true),
        }
    }

    fn run(&self, command: &Command) -> AppResult<ResultRows> {
        self.executed.lock().push(command.clone());
        {
            let mut failures = self.failures.lock();
            if let Some(left) = failures.get_mut(&command.sql) {
                if *left > 0 {
                    *left -= 1;
                    bail!("injected failure for `{}`", command.sql);
                }
            }
        }
        Ok(self
            .responses
            .lock()
            .get(&command.sql)
            .cloned()
            .unwrap_or_default())
    }
}

/// Connection into an [`InMemoryDatabase`].
#[derive(Debug)]
pub struct InMemoryConnection {
    id: usize,
    db: Arc<InMemoryDatabase>,
    open: AtomicBool,
}

impl InMemoryConnection {
    /// Connection number within its database.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Simulate the server dropping the connection.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl Connection for InMemoryConnection {
    fn query(&self, command: &Command) -> AppResult<ResultRows> {
        if !self.is_open() {
            bail!("connection {} is closed", self.id);
        }
        self.db.run(command)
    }

    fn ensure_open(&self) -> AppResult<()> {
        if !self.open.swap(true, Ordering::AcqRel) {
            debug!(connection = self.id, "reopened connection");
        }
        Ok(())
    }
}
