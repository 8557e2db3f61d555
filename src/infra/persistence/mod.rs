//! Persistence collaborator: commands, rows, and pooled connections.
//!
//! The engine treats the database as "run a command, get rows back". A
//! [`ResourcePool`] of [`Connection`]s is drained by a [`QueryQueue`], and
//! [`query_task`] wraps one command as a retryable task.

pub mod memory;
pub mod query_task;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::{
    AppResult, CommandExecutor, DispatchQueue, ResourcePool, ResourceSource, Spawn,
};

pub use memory::{InMemoryConnection, InMemoryDatabase};
pub use query_task::{query_task, query_task_with_timeout, DEFAULT_QUERY_TIMEOUT};
pub use serde_json::Value;

/// A database command and its positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Command text.
    pub sql: String,
    /// Positional parameters.
    pub params: Vec<Value>,
}

impl Command {
    /// Command without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append a positional parameter.
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Rows returned by a command, column-major names plus row-major values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRows {
    /// Column names, in order.
    pub columns: Vec<String>,
    /// One vector per row, aligned with `columns`.
    pub rows: Vec<Vec<Value>>,
}

impl ResultRows {
    /// Result with the given columns and no rows.
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row.
    #[must_use]
    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values);
        self
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when no rows were returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value at `row` in the named column.
    #[must_use]
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(col)
    }
}

/// A live connection to the relational store.
pub trait Connection: Send + Sync {
    /// Run `command` and return its rows.
    ///
    /// # Errors
    ///
    /// Any failure reported by the store.
    fn query(&self, command: &Command) -> AppResult<ResultRows>;

    /// Make sure the connection is usable, reopening it if it was closed.
    ///
    /// # Errors
    ///
    /// When the connection cannot be reopened.
    fn ensure_open(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Pool source that opens fresh connections with `open(index)`.
pub struct ConnectionFactory<F> {
    open: F,
}

impl<F> ConnectionFactory<F> {
    /// Wrap an opener.
    pub const fn new(open: F) -> Self {
        Self { open }
    }
}

impl<C, F> ResourceSource<C> for ConnectionFactory<F>
where
    C: Connection,
    F: Fn(usize) -> AppResult<C> + Send + Sync,
{
    fn load(&self, capacity: usize) -> AppResult<Vec<C>> {
        let mut connections = Vec::with_capacity(capacity);
        let mut last_error = None;
        for index in 0..capacity {
            match (self.open)(index) {
                Ok(conn) => connections.push(conn),
                Err(err) => {
                    warn!(index, error = %err, "failed to open connection");
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) if connections.is_empty() => Err(err),
            _ => Ok(connections),
        }
    }

    fn validate(&self, conn: &C) -> bool {
        conn.ensure_open().is_ok()
    }
}

/// Executor that reopens the connection if needed and runs the command.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryExecutor;

impl<C: Connection> CommandExecutor<C, Command, ResultRows> for QueryExecutor {
    fn execute(&self, conn: &C, command: Command) -> AppResult<ResultRows> {
        conn.ensure_open()?;
        debug!(sql = %command.sql, params = command.params.len(), "running command");
        conn.query(&command)
    }
}

/// Dispatch queue running commands on pooled connections.
pub type QueryQueue<C> = DispatchQueue<C, Command, ResultRows>;

/// Queue draining `pool` with a [`QueryExecutor`].
pub fn query_queue<C: Connection + 'static>(
    pool: Arc<ResourcePool<C>>,
    spawner: Arc<dyn Spawn>,
) -> QueryQueue<C> {
    DispatchQueue::new(pool, QueryExecutor, spawner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rows_lookup_by_column() {
        let rows = ResultRows::with_columns(["id", "name"])
            .row(vec![json!(1), json!("a")])
            .row(vec![json!(2), json!("b")]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.get(1, "name"), Some(&json!("b")));
        assert_eq!(rows.get(0, "missing"), None);
        assert_eq!(rows.get(5, "id"), None);
    }

    #[test]
    fn factory_keeps_partial_sets() {
        let factory = ConnectionFactory::new(|i: usize| -> AppResult<InMemoryConnection> {
            if i == 1 {
                anyhow::bail!("refused");
            }
            Ok(InMemoryDatabase::new().connect())
        });
        assert_eq!(ResourceSource::<InMemoryConnection>::load(&factory, 3).unwrap().len(), 2);

        let refusing = ConnectionFactory::new(|_: usize| -> AppResult<InMemoryConnection> {
            anyhow::bail!("refused")
        });
        assert!(ResourceSource::<InMemoryConnection>::load(&refusing, 2).is_err());
    }

    #[test]
    fn executor_reopens_closed_connection() {
        let db = InMemoryDatabase::new();
        db.respond("SELECT 1", ResultRows::with_columns(["one"]).row(vec![json!(1)]));
        let conn = db.connect();
        conn.close();
        let rows = QueryExecutor.execute(&conn, Command::new("SELECT 1")).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(conn.is_open());
    }
}
