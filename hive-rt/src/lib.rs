//! Server instance, worker groups, services, and a symmetric ECS store,
//! built on the lock-free task/AOD/timer/TLS-sync primitives of
//! `hive-task`, `hive-aod`, `hive-timer`, and `hive-sync`.
//!
//! A typical server: build a [`ServerConfig`] out of one or more
//! [`WorkerGroupConfig`]s, [`ServerInstance::initialize`] it, register any
//! [`services::ServiceKind`]s, then [`ServerInstance::start`] it.

pub mod config;
pub mod ecs;
pub mod error;
pub mod logging;
pub mod services;
mod server;
mod worker;

pub use config::{GroupCapabilities, ServerConfig, WorkerGroupConfig, WorkerTickFn};
pub use error::{ConfigError, SpawnError};
pub use hive_alloc::{AllocError, SlabAllocator, SlabBlock};
pub use hive_aod::{AodObject, AodObjectKind, Status};
pub use server::{ServerInstance, ServerLifecycleHooks};
pub use worker::{GroupLifecycleHooks, Worker, WorkerGroup, WorkerRole};

use std::sync::Once;

static INIT: Once = Once::new();

/// One-time library warm-up: installs the tracing subscriber and primes the
/// default slab allocator's tiers. Idempotent; safe to call more than once
/// (later calls are no-ops).
pub fn init() {
    INIT.call_once(|| {
        logging::init_tracing();
        tracing::info!("hive-rt initialized");
    });
}

/// Best-effort teardown hook. The original raises the OS timer resolution
/// to 1ms on Windows for the run loops' sleep cadence to be accurate; on
/// Linux (this workspace's only target) there is no equivalent knob, so
/// both `init` and `shutdown_library` are no-ops on that front. Kept as a
/// symmetric pair with `init` since the public surface names both.
pub fn shutdown_library() {
    tracing::info!("hive-rt shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        shutdown_library();
    }
}
