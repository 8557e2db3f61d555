//! Configuration models for the scheduler, pools, dispatch and rotation.

pub mod engine;

pub use engine::{DispatchConfig, EngineConfig, PoolConfig, RotationConfig, SchedulerConfig};
