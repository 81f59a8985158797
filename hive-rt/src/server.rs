//! Server instance lifecycle: owns every worker group, runs the start/stop
//! sequencing, and is the entry point services and deferred work go
//! through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use hive_task::TaskHeader;

use crate::config::{GroupCapabilities, ServerConfig};
use crate::error::ConfigError;
use crate::services::{ServiceKind, ServiceRegistry};
use crate::worker::{GroupLifecycleHooks, WorkerGroup};
use crate::Status;

/// How often the background ticker calls every registered active service's
/// `on_tick`, when at least one is registered. The original ticks active
/// services as part of a dedicated active object's own cadence; since that
/// cadence isn't itself part of a worker group here, a small dedicated
/// thread plays the same role.
const ACTIVE_SERVICE_TICK_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Unconfigured,
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// User-overridable hooks for the coarse server/group/worker lifecycle
/// events. All default to no-ops.
#[allow(unused_variables)]
pub trait ServerLifecycleHooks: Send + Sync {
    fn on_before_start_server(&self) {}
    fn on_worker_started(&self, group_id: u32, worker_id: usize) {}
    fn on_all_workers_started(&self, group_id: u32) {}
    fn on_worker_group_started(&self, group_id: u32) {}
    fn on_all_worker_groups_started(&self) {}
    fn on_server_started(&self) {}

    fn on_before_stop_server(&self) {}
    fn on_all_services_stopped(&self) {}
    fn on_worker_stopped(&self, group_id: u32, worker_id: usize) {}
    fn on_all_workers_stopped(&self, group_id: u32) {}
    fn on_worker_group_stopped(&self, group_id: u32) {}
    fn on_all_worker_groups_stopped(&self) {}
    fn on_server_stopped(&self) {}
    fn on_after_server_stopped(&self) {}
}

struct NoopServerHooks;
impl ServerLifecycleHooks for NoopServerHooks {}

struct GroupRendezvousHooks {
    server_hooks: Arc<dyn ServerLifecycleHooks>,
    services: Arc<Mutex<ServiceRegistry>>,
}

impl crate::worker::GroupLifecycleHooks for GroupRendezvousHooks {
    fn on_worker_started(&self, group_id: u32, worker_id: usize) {
        self.server_hooks.on_worker_started(group_id, worker_id);
        self.services.lock().on_worker_started(group_id, worker_id);
    }

    fn on_worker_stopped(&self, group_id: u32, worker_id: usize) {
        self.server_hooks.on_worker_stopped(group_id, worker_id);
        self.services.lock().on_worker_stopped(group_id, worker_id);
    }

    fn on_tick_worker_services(&self, group_id: u32, worker_id: usize) {
        self.services.lock().on_tick_worker_services(group_id, worker_id);
    }
}

/// Owns every worker group for one running server and sequences the
/// start/stop lifecycle around them.
pub struct ServerInstance {
    name: String,
    state: Mutex<LifecycleState>,
    stopped_signal: Condvar,
    groups: Vec<Arc<WorkerGroup>>,
    group_index_by_id: HashMap<u32, usize>,
    task_handling_groups: Vec<Arc<WorkerGroup>>,
    next_defer_group: AtomicUsize,
    services: Arc<Mutex<ServiceRegistry>>,
    hooks: Arc<dyn ServerLifecycleHooks>,
    groups_started: AtomicUsize,
    groups_stopped: AtomicUsize,
    is_running: AtomicBool,
    active_ticker_stop: Arc<AtomicBool>,
    active_ticker: Mutex<Option<JoinHandle<()>>>,
}

impl ServerInstance {
    pub fn initialize(config: ServerConfig) -> Result<Arc<Self>, ConfigError> {
        Self::initialize_with_hooks(config, Arc::new(NoopServerHooks))
    }

    pub fn initialize_with_hooks(
        config: ServerConfig,
        hooks: Arc<dyn ServerLifecycleHooks>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        let groups: Vec<Arc<WorkerGroup>> = config
            .groups
            .iter()
            .map(|g| Arc::new(WorkerGroup::from_config(g)))
            .collect();
        let group_index_by_id = groups.iter().enumerate().map(|(i, g)| (g.id, i)).collect();
        let task_handling_groups = groups
            .iter()
            .filter(|g| g.capabilities().contains(GroupCapabilities::HANDLES_TASKS))
            .cloned()
            .collect();

        Ok(Arc::new(Self {
            name: config.name,
            state: Mutex::new(LifecycleState::Initialized),
            stopped_signal: Condvar::new(),
            groups,
            group_index_by_id,
            task_handling_groups,
            next_defer_group: AtomicUsize::new(0),
            services: Arc::new(Mutex::new(ServiceRegistry::new())),
            hooks,
            groups_started: AtomicUsize::new(0),
            groups_stopped: AtomicUsize::new(0),
            is_running: AtomicBool::new(false),
            active_ticker_stop: Arc::new(AtomicBool::new(false)),
            active_ticker: Mutex::new(None),
        }))
    }

    /// Register a service. Must be called before [`ServerInstance::start`].
    pub fn add_service(&self, service: ServiceKind) {
        self.services.lock().add(service);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Run the full start sequence. Blocks until shutdown completes (and
    /// returns [`Status::ServerInstanceFinalized`]) if one worker group
    /// captures the calling thread; otherwise groups run on their own
    /// threads and this returns [`Status::Success`] immediately.
    pub fn start(self: &Arc<Self>) -> Status {
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Initialized {
                return Status::AlreadyPerformed;
            }
            *state = LifecycleState::Starting;
        }

        if let Err(e) = self.services.lock().initialize_all() {
            error!(server = %self.name, error = %e, "service initialization failed");
            return Status::Fail;
        }

        self.hooks.on_before_start_server();
        info!(server = %self.name, "starting server");

        if self.services.lock().has_active_services() {
            self.spawn_active_service_ticker();
        }

        self.is_running.store(true, Ordering::Release);

        let (capturing, non_capturing): (Vec<_>, Vec<_>) =
            self.groups.iter().cloned().partition(|g| self.captures_calling_thread(g));

        for group in &non_capturing {
            if let Err(e) = self.start_group(group) {
                error!(server = %self.name, error = %e, "failed to spawn worker group");
                self.signal_to_stop(true);
                return Status::Fail;
            }
        }

        let Some(master_group) = capturing.into_iter().next() else {
            return Status::Success;
        };

        if let Err(e) = self.start_group(&master_group) {
            error!(server = %self.name, error = %e, "failed to spawn master worker group");
            self.signal_to_stop(true);
            return Status::Fail;
        }

        let mut state = self.state.lock();
        while *state != LifecycleState::Stopped {
            self.stopped_signal.wait(&mut state);
        }
        Status::ServerInstanceFinalized
    }

    fn captures_calling_thread(&self, group: &Arc<WorkerGroup>) -> bool {
        group.workers.iter().any(|w| w.role == crate::worker::WorkerRole::Master)
    }

    fn start_group(self: &Arc<Self>, group: &Arc<WorkerGroup>) -> Result<(), crate::error::SpawnError> {
        let group_id = group.id;
        let server_hooks = self.hooks.clone();
        let services = self.services.clone();
        let rendezvous_hooks = Arc::new(GroupRendezvousHooks { server_hooks, services });

        let this = self.clone();
        let on_fully_started: Arc<dyn Fn(u32) + Send + Sync> =
            Arc::new(move |group_id| this.on_group_fully_started(group_id));
        let this = self.clone();
        let on_fully_stopped: Arc<dyn Fn(u32) + Send + Sync> =
            Arc::new(move |group_id| this.on_group_fully_stopped(group_id));

        debug!(server = %self.name, group_id, "starting worker group");
        group.start(rendezvous_hooks, on_fully_started, on_fully_stopped)
    }

    fn on_group_fully_started(&self, group_id: u32) {
        self.hooks.on_all_workers_started(group_id);
        self.hooks.on_worker_group_started(group_id);

        let reached = self.groups_started.fetch_add(1, Ordering::AcqRel) + 1;
        if reached == self.groups.len() {
            self.hooks.on_all_worker_groups_started();
            self.services.lock().on_server_started();
            self.hooks.on_server_started();
            *self.state.lock() = LifecycleState::Running;
            info!(server = %self.name, "server started");
        }
    }

    fn on_group_fully_stopped(&self, group_id: u32) {
        self.hooks.on_all_workers_stopped(group_id);
        self.hooks.on_worker_group_stopped(group_id);

        let reached = self.groups_stopped.fetch_add(1, Ordering::AcqRel) + 1;
        if reached == self.groups.len() {
            self.hooks.on_all_worker_groups_stopped();
            self.services.lock().on_server_stopped();
            self.hooks.on_server_stopped();
            self.hooks.on_after_server_stopped();
            *self.state.lock() = LifecycleState::Stopped;
            self.stopped_signal.notify_all();
            info!(server = %self.name, "server stopped");
        }
    }

    /// Signal every worker group to stop. `force = true` stops immediately
    /// even if a service asked to finish its own shutdown asynchronously;
    /// `force = false` waits for every [`Status::Pending`] service to call
    /// back via [`ServerInstance::notify_service_stopped`] first.
    pub fn signal_to_stop(&self, force: bool) {
        if !self.is_running.swap(false, Ordering::AcqRel) {
            debug!(server = %self.name, "signal_to_stop: already signaled");
            return;
        }

        *self.state.lock() = LifecycleState::Stopping;
        self.hooks.on_before_stop_server();
        info!(server = %self.name, force, "stopping server");

        let groups = self.groups.clone();
        let ticker_stop = self.active_ticker_stop.clone();
        let hooks = self.hooks.clone();
        let finish = move || {
            ticker_stop.store(true, Ordering::Release);
            hooks.on_all_services_stopped();
            for group in &groups {
                group.stop();
            }
        };

        if force {
            finish();
        } else {
            self.services.lock().begin_stop(finish);
        }
    }

    /// A service that returned [`Status::Pending`] from its stop hook calls
    /// this once it has actually finished.
    pub fn notify_service_stopped(&self) {
        self.services.lock().notify_service_stopped();
    }

    /// Wait for every worker group's spawned threads to exit. Does not wait
    /// on a master (calling-thread) group, since that thread is whichever
    /// one called [`ServerInstance::start`].
    pub fn join_all_groups(&self) {
        for group in &self.groups {
            group.join();
        }
        if let Some(handle) = self.active_ticker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Hand a task to one of the groups marked
    /// [`GroupCapabilities::HANDLES_TASKS`], round-robin across such groups
    /// (and across that group's own workers, via [`WorkerGroup::defer`]).
    pub fn defer(&self, task: *mut TaskHeader) {
        assert!(
            !self.task_handling_groups.is_empty(),
            "no worker group in this server handles generic tasks"
        );
        let index = self.next_defer_group.fetch_add(1, Ordering::Relaxed) % self.task_handling_groups.len();
        self.task_handling_groups[index].defer(task);
    }

    /// Broadcast `f` to every worker in the named group exactly once.
    pub fn sync_tls_on_group<F>(&self, group_id: u32, f: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let index = *self
            .group_index_by_id
            .get(&group_id)
            .unwrap_or_else(|| panic!("no worker group with id {group_id}"));
        self.groups[index].push_tls_sync_task(f);
    }

    fn spawn_active_service_ticker(self: &Arc<Self>) {
        let stop = self.active_ticker_stop.clone();
        let services = self.services.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{}-active-services", self.name))
            .spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    services.lock().tick_active_services();
                    std::thread::sleep(ACTIVE_SERVICE_TICK_PERIOD);
                }
            })
            .expect("failed to spawn active-service ticker thread");
        *self.active_ticker.lock() = Some(handle);
    }
}
