//! Builders to construct engine components from configuration.

pub mod pool_builder;

pub use pool_builder::{
    build_dispatch_queue, build_pools, build_rotation, build_scheduler, PoolBuilder,
};
