//! Error types for scheduler and pool operations.

use thiserror::Error;

use crate::core::task::TaskStatus;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A status change outside the task state machine was requested.
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Status the task was in.
        from: TaskStatus,
        /// Status that was requested.
        to: TaskStatus,
    },
    /// No pool entry became free within the caller's retry budget.
    #[error("pool exhausted: {0}")]
    PoolExhausted(String),
    /// The authoritative source could not rebuild the pool.
    #[error("reload failed: {0}")]
    ReloadFailed(String),
    /// Work could not be handed to an execution context.
    #[error("spawn failed: {0}")]
    Spawn(String),
    /// A wait elapsed before the awaited result arrived.
    #[error("timed out")]
    Timeout,
    /// The producer side of a result was dropped without completing.
    #[error("cancelled")]
    Cancelled,
    /// Configuration failed to parse or validate.
    #[error("config error: {0}")]
    Config(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
