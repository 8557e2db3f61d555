//! Query-shaped tasks.

use std::time::Duration;

use super::{Command, Connection, QueryQueue, ResultRows};
use crate::core::{Task, TaskBuilder, TaskCategory};

/// How long a query attempt waits for its command to come back.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Task that runs `command` through `queue`, retried up to `try_budget` attempts.
pub fn query_task<C: Connection + 'static>(
    queue: &QueryQueue<C>,
    command: Command,
    try_budget: u32,
) -> Task<ResultRows> {
    query_task_with_timeout(queue, command, try_budget, DEFAULT_QUERY_TIMEOUT)
}

/// [`query_task`] with an explicit per-attempt timeout.
///
/// Each attempt enqueues the command and blocks its slot on the ticket. A
/// store error, a timeout or a cancelled command fails the attempt. A timed
/// out command that has not reached a connection is withdrawn, so a failed
/// attempt never runs it later.
pub fn query_task_with_timeout<C: Connection + 'static>(
    queue: &QueryQueue<C>,
    command: Command,
    try_budget: u32,
    timeout: Duration,
) -> Task<ResultRows> {
    let queue = queue.clone();
    TaskBuilder::new(TaskCategory::Query)
        .try_budget(try_budget)
        .label(command.sql.clone())
        .build_fn(move |_ctx| {
            queue
                .submit(command.clone())
                .wait(Some(timeout))
                .map_err(anyhow::Error::from)
        })
}
