//! Service abstractions a [`crate::ServerInstance`] hosts alongside its
//! worker groups: plain lifecycle-only services, AOD-backed services with
//! their own thread-safe object, actively-ticked services, and services
//! that want a callback on every worker's start/stop/tick.

mod registry;

pub use registry::ServiceRegistry;

use std::time::Duration;

use hive_aod::{AodObject, AodObjectKind, Status};
use hive_timer::DelayedTaskScheduler;

use crate::error::ConfigError;

/// The lifecycle every service shares, regardless of kind.
pub trait ServiceHooks: Send + Sync {
    fn uid(&self) -> u32;

    /// Run once, before any worker group starts. Returning `Err` aborts
    /// `ServerInstance::start`.
    fn initialize(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn on_server_started(&self) {}

    fn on_server_stopped(&self) {}

    /// Called once the server is signaled to stop. Return
    /// [`Status::Pending`] to finish asynchronously; the service must then
    /// call [`ServiceRegistry::notify_service_stopped`] itself once done.
    /// Any other status is treated as already-stopped.
    fn on_stop_service(&self) -> Status {
        Status::Success
    }
}

/// A service ticked on its own cadence, independent of any worker group.
pub trait ActiveServiceHooks: ServiceHooks {
    fn on_tick(&self);
}

/// A service notified of every worker's lifecycle and tick in every group
/// that sets [`crate::config::GroupCapabilities::TICK_WORKER_SERVICES`].
pub trait WorkerServiceHooks: ServiceHooks {
    fn on_worker_started(&self, _group_id: u32, _worker_id: usize) {}
    fn on_worker_stopped(&self, _group_id: u32, _worker_id: usize) {}
    fn on_tick_worker(&self, _group_id: u32, _worker_id: usize) {}
}

/// What [`ServiceRegistry::add`] accepts; selects which of the registry's
/// internal lists a service lands in.
pub enum ServiceKind {
    Simple(Box<dyn ServiceHooks>),
    Active(Box<dyn ActiveServiceHooks>),
    Worker(Box<dyn WorkerServiceHooks>),
}

/// Convenience wrapper pairing a service UID with its own [`AodObject`], for
/// services whose callbacks need to run thread-safe relative to some shared
/// state without hand-rolling the dispatch/drain bookkeeping.
pub struct AodService {
    uid: u32,
    object: AodObject,
}

impl AodService {
    pub fn new(uid: u32) -> Self {
        Self {
            uid,
            object: AodObject::new(AodObjectKind::Static),
        }
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn do_async<F>(&self, f: F) -> Status
    where
        F: FnOnce() + Send + 'static,
    {
        self.object.do_async(f)
    }

    /// # Safety
    /// See [`AodObject::do_async_after`]: `self` must outlive `delay`.
    pub fn do_async_after(
        &self,
        scheduler: &DelayedTaskScheduler,
        delay: Duration,
        f: impl FnOnce() + Send + 'static,
    ) -> Status {
        self.object.do_async_after(scheduler, delay, f)
    }
}
