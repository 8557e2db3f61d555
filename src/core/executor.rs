//! Execution seams: where work runs, and how a pooled handle runs a command.

use crate::core::{AppResult, SchedulerError};

/// A unit of work handed to an execution context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Abstraction for running jobs off the caller's thread.
///
/// Implementations must not run the job inline: a slot job blocks for as long
/// as its task body runs.
pub trait Spawn: Send + Sync {
    /// Run `job` concurrently. `name` identifies the context in logs.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Spawn` if the job could not be started; the job is dropped.
    fn spawn(&self, name: &str, job: Job) -> Result<(), SchedulerError>;
}

/// Abstraction for executing a command against a pooled handle and producing a result.
///
/// This is the persistence seam: a database connection pool pairs with an
/// executor that runs a query on the connection and returns its rows.
///
/// # Example
///
/// ```rust,ignore
/// use chatwatch_engine::core::{AppResult, CommandExecutor};
/// use chatwatch_engine::infra::persistence::{Command, Connection, ResultRows};
///
/// struct RowCounter;
///
/// impl<C: Connection> CommandExecutor<C, Command, usize> for RowCounter {
///     fn execute(&self, conn: &C, command: Command) -> AppResult<usize> {
///         Ok(conn.query(&command)?.len())
///     }
/// }
/// ```
pub trait CommandExecutor<H, C, R>: Send + Sync + 'static {
    /// Run `command` using `handle`.
    ///
    /// # Errors
    ///
    /// Any failure of the underlying resource.
    fn execute(&self, handle: &H, command: C) -> AppResult<R>;
}

impl<H, C, R, F> CommandExecutor<H, C, R> for F
where
    F: Fn(&H, C) -> AppResult<R> + Send + Sync + 'static,
{
    fn execute(&self, handle: &H, command: C) -> AppResult<R> {
        self(handle, command)
    }
}
