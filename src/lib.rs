//! # Chatwatch Engine
//!
//! Cooperative task scheduling and pooled-resource management for
//! chat-monitoring bots.
//!
//! The engine runs deferred, retryable work on a fixed number of execution
//! slots, and hands out scarce external handles (database connections, API
//! credential sets) from fixed-capacity pools that can be reloaded wholesale.
//!
//! ## Components
//!
//! - **Task**: unit of work with a status state machine and a try budget
//! - **Scheduler**: a background loop that, every tick, hands due tasks to free slots
//! - **Resource Pool**: busy/free tracking over a fixed set of handles, with
//!   atomic reloads and a round-robin `get`
//! - **Dispatch Queue**: FIFO of commands waiting for a pooled handle
//! - **Credential Rotation**: a pool that also refreshes itself on a timer
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use chatwatch_engine::core::{Scheduler, SchedulerOptions, TaskBuilder, TaskCategory, TaskStatus};
//! use chatwatch_engine::runtime::ThreadSpawner;
//! use chatwatch_engine::util::clock::system_clock;
//!
//! let scheduler = Scheduler::new(SchedulerOptions::default(), Arc::new(ThreadSpawner::new()), system_clock());
//! scheduler.start()?;
//!
//! let task = scheduler.submit(
//!     TaskBuilder::new(TaskCategory::Statistics)
//!         .try_budget(3)
//!         .build_fn(|_ctx| Ok(count_messages()?)),
//! )?;
//! assert_eq!(task.wait(Some(Duration::from_secs(10))), TaskStatus::Finished);
//!
//! scheduler.stop();
//! ```
//!
//! Query-shaped work goes through [`infra::persistence::query_task`], which
//! enqueues a command on a [`core::DispatchQueue`] bound to a connection pool.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions: tasks, slots, pools and dispatch.
pub mod core;
/// Configuration models for the scheduler, pools and rotation.
pub mod config;
/// Builders to construct engine components from configuration.
pub mod builders;
/// Infrastructure adapters for the relational store and API credentials.
pub mod infra;
/// Runtime adapters providing execution contexts for slots and drains.
pub mod runtime;
/// Shared utilities.
pub mod util;
