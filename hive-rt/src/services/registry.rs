use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use hive_aod::Status;

use crate::error::ConfigError;
use crate::worker::GroupLifecycleHooks;

use super::{ActiveServiceHooks, ServiceHooks, ServiceKind, WorkerServiceHooks};

type StopCompletion = Box<dyn FnOnce() + Send>;

/// Holds every service a [`crate::ServerInstance`] was given, categorized by
/// kind, and fans lifecycle events out to all of them.
#[derive(Default)]
pub struct ServiceRegistry {
    simple: Vec<Box<dyn ServiceHooks>>,
    active: Vec<Box<dyn ActiveServiceHooks>>,
    worker: Vec<Box<dyn WorkerServiceHooks>>,
    pending_stops: AtomicUsize,
    on_all_stopped: Mutex<Option<StopCompletion>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, service: ServiceKind) {
        match service {
            ServiceKind::Simple(s) => self.simple.push(s),
            ServiceKind::Active(s) => self.active.push(s),
            ServiceKind::Worker(s) => self.worker.push(s),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.simple.is_empty() && self.active.is_empty() && self.worker.is_empty()
    }

    pub fn initialize_all(&self) -> Result<(), ConfigError> {
        for s in &self.simple {
            s.initialize()?;
        }
        for s in &self.active {
            s.initialize()?;
        }
        for s in &self.worker {
            s.initialize()?;
        }
        Ok(())
    }

    pub fn on_server_started(&self) {
        for s in &self.simple {
            s.on_server_started();
        }
        for s in &self.active {
            s.on_server_started();
        }
        for s in &self.worker {
            s.on_server_started();
        }
    }

    pub fn on_server_stopped(&self) {
        for s in &self.simple {
            s.on_server_stopped();
        }
        for s in &self.active {
            s.on_server_stopped();
        }
        for s in &self.worker {
            s.on_server_stopped();
        }
    }

    pub fn tick_active_services(&self) {
        for s in &self.active {
            s.on_tick();
        }
    }

    pub fn has_active_services(&self) -> bool {
        !self.active.is_empty()
    }

    /// Ask every service to stop. Services returning [`Status::Pending`]
    /// must later call [`ServiceRegistry::notify_service_stopped`]; once
    /// every pending service (and the ones that stopped synchronously) has
    /// been accounted for, `on_all_stopped` runs exactly once.
    pub fn begin_stop<F>(&self, on_all_stopped: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = 0usize;
        for s in &self.simple {
            if s.on_stop_service() == Status::Pending {
                pending += 1;
            }
        }
        for s in &self.active {
            if s.on_stop_service() == Status::Pending {
                pending += 1;
            }
        }
        for s in &self.worker {
            if s.on_stop_service() == Status::Pending {
                pending += 1;
            }
        }

        if pending == 0 {
            on_all_stopped();
            return;
        }

        self.pending_stops.store(pending, Ordering::Release);
        *self.on_all_stopped.lock() = Some(Box::new(on_all_stopped));
    }

    /// A service that returned [`Status::Pending`] from `on_stop_service`
    /// calls this once its own shutdown work is actually done.
    pub fn notify_service_stopped(&self) {
        if self.pending_stops.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Some(cb) = self.on_all_stopped.lock().take() {
                cb();
            }
        }
    }
}

impl GroupLifecycleHooks for ServiceRegistry {
    fn on_worker_started(&self, group_id: u32, worker_id: usize) {
        for s in &self.worker {
            s.on_worker_started(group_id, worker_id);
        }
    }

    fn on_worker_stopped(&self, group_id: u32, worker_id: usize) {
        for s in &self.worker {
            s.on_worker_stopped(group_id, worker_id);
        }
    }

    fn on_tick_worker_services(&self, group_id: u32, worker_id: usize) {
        for s in &self.worker {
            s.on_tick_worker(group_id, worker_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Arc;

    struct CountingService {
        uid: u32,
        stops: Arc<StdAtomicUsize>,
    }
    impl ServiceHooks for CountingService {
        fn uid(&self) -> u32 {
            self.uid
        }
        fn on_stop_service(&self) -> Status {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Status::Success
        }
    }

    struct PendingService;
    impl ServiceHooks for PendingService {
        fn uid(&self) -> u32 {
            99
        }
        fn on_stop_service(&self) -> Status {
            Status::Pending
        }
    }

    #[test]
    fn stop_completes_immediately_with_no_pending_services() {
        let mut registry = ServiceRegistry::new();
        let stops = Arc::new(StdAtomicUsize::new(0));
        registry.add(ServiceKind::Simple(Box::new(CountingService {
            uid: 1,
            stops: stops.clone(),
        })));

        let completed = Arc::new(StdAtomicUsize::new(0));
        let c = completed.clone();
        registry.begin_stop(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_waits_for_a_pending_service_to_confirm() {
        let mut registry = ServiceRegistry::new();
        registry.add(ServiceKind::Simple(Box::new(PendingService)));

        let completed = Arc::new(StdAtomicUsize::new(0));
        let c = completed.clone();
        registry.begin_stop(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(completed.load(Ordering::SeqCst), 0);

        registry.notify_service_stopped();
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }
}
