use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use hive_sync::TlsSyncSystem;
use hive_task::TaskHeader;

use crate::config::{GroupCapabilities, WorkerGroupConfig, WorkerTickFn};
use crate::error::SpawnError;

use super::run_loop;
use super::worker::{SharedWorker, Worker, WorkerRole};
use super::GroupLifecycleHooks;

/// Per-group state shared by every worker's [`LoopContext`]: a "last one
/// through" counter for entering the run loop, and a matching one for
/// leaving it, each firing a callback exactly once.
struct GroupRendezvous {
    workers_total: usize,
    workers_started: AtomicUsize,
    workers_stopped: AtomicUsize,
    on_fully_started: Arc<dyn Fn(u32) + Send + Sync>,
    on_fully_stopped: Arc<dyn Fn(u32) + Send + Sync>,
}

/// Everything a worker's run loop needs each iteration, bundled once per
/// [`WorkerGroup::start`] call and shared (via `Arc`) across every worker in
/// the group.
pub(super) struct LoopContext {
    pub(super) group_id: u32,
    pub(super) capabilities: GroupCapabilities,
    pub(super) tick_period: Option<Duration>,
    pub(super) tls_sync: Arc<TlsSyncSystem>,
    pub(super) tls_sync_tick_stride: u32,
    pub(super) on_worker_tick: Option<WorkerTickFn>,
    pub(super) stop_flag: Arc<AtomicBool>,
    pub(super) hooks: Arc<dyn GroupLifecycleHooks>,
    rendezvous: Arc<GroupRendezvous>,
}

impl LoopContext {
    pub(super) fn signal_worker_started(&self) {
        let reached = self.rendezvous.workers_started.fetch_add(1, Ordering::AcqRel) + 1;
        if reached == self.rendezvous.workers_total {
            (self.rendezvous.on_fully_started)(self.group_id);
        }
    }

    pub(super) fn signal_worker_stopped(&self) {
        let reached = self.rendezvous.workers_stopped.fetch_add(1, Ordering::AcqRel) + 1;
        if reached == self.rendezvous.workers_total {
            (self.rendezvous.on_fully_stopped)(self.group_id);
        }
    }
}

/// A set of workers sharing one run-loop configuration.
///
/// `hive_task::TaskQueue` is single-consumer, but a group's inbox is
/// logically shared by every worker in it; each [`Worker`] keeps its own
/// queue and [`WorkerGroup::defer`] round-robins pushes across them, so the
/// single-consumer contract holds per-worker while still presenting one
/// inbox to callers.
pub struct WorkerGroup {
    pub id: u32,
    pub name: String,
    capabilities: GroupCapabilities,
    tick_period: Option<Duration>,
    tls_sync: Arc<TlsSyncSystem>,
    tls_sync_tick_stride: u32,
    on_worker_tick: Option<WorkerTickFn>,
    pub(crate) workers: Vec<SharedWorker>,
    master_worker: Option<SharedWorker>,
    stop_flag: Arc<AtomicBool>,
    next_defer_target: AtomicUsize,
    join_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerGroup {
    pub fn from_config(config: &WorkerGroupConfig) -> Self {
        let tls_sync_tick_stride = if !config.capabilities.contains(GroupCapabilities::SUPPORTS_TLS_SYNC)
            || config.tls_sync_tick_rate_hz == 0
        {
            0
        } else if config.tick_rate_hz == 0 {
            1
        } else {
            (config.tick_rate_hz / config.tls_sync_tick_rate_hz).max(1)
        };

        let workers: Vec<SharedWorker> = (0..config.workers_count)
            .map(|id| {
                let role = if config.captures_calling_thread && id == 0 {
                    WorkerRole::Master
                } else {
                    WorkerRole::Normal
                };
                Arc::new(Worker::new(id, role))
            })
            .collect();
        let master_worker = workers.iter().find(|w| w.role == WorkerRole::Master).cloned();

        Self {
            id: config.id,
            name: config.name.clone(),
            capabilities: config.capabilities,
            tick_period: config.tick_period(),
            tls_sync: Arc::new(TlsSyncSystem::with_ring_capacity(config.tls_sync_ring_capacity)),
            tls_sync_tick_stride,
            on_worker_tick: config.on_worker_tick.clone(),
            workers,
            master_worker,
            stop_flag: Arc::new(AtomicBool::new(false)),
            next_defer_target: AtomicUsize::new(0),
            join_handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn every `Normal` worker, then, if this group has a `Master`
    /// worker, run its loop inline on the calling thread. Returns only once
    /// the master worker's loop exits (i.e. only after the group is told to
    /// stop) if the group has one; returns immediately otherwise.
    ///
    /// On a spawn failure, workers already spawned in this call are stopped
    /// and joined before the error is returned.
    pub fn start(
        self: &Arc<Self>,
        hooks: Arc<dyn GroupLifecycleHooks>,
        on_fully_started: Arc<dyn Fn(u32) + Send + Sync>,
        on_fully_stopped: Arc<dyn Fn(u32) + Send + Sync>,
    ) -> Result<(), SpawnError> {
        let rendezvous = Arc::new(GroupRendezvous {
            workers_total: self.workers.len(),
            workers_started: AtomicUsize::new(0),
            workers_stopped: AtomicUsize::new(0),
            on_fully_started,
            on_fully_stopped,
        });

        let mut handles = Vec::with_capacity(self.workers.len());
        for worker in &self.workers {
            if worker.role == WorkerRole::Master {
                continue;
            }
            let worker = worker.clone();
            let worker_index = worker.id;
            let ctx = self.make_loop_context(rendezvous.clone(), hooks.clone());
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{worker_index}", self.name))
                .spawn(move || run_loop::run(worker, ctx));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    self.stop_flag.store(true, Ordering::Release);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(SpawnError::ThreadSpawnFailed {
                        group_id: self.id,
                        worker_index,
                        source,
                    });
                }
            }
        }
        *self.join_handles.lock() = handles;

        if let Some(master) = &self.master_worker {
            let ctx = self.make_loop_context(rendezvous, hooks);
            run_loop::run(master.clone(), ctx);
        }

        Ok(())
    }

    fn make_loop_context(
        &self,
        rendezvous: Arc<GroupRendezvous>,
        hooks: Arc<dyn GroupLifecycleHooks>,
    ) -> Arc<LoopContext> {
        Arc::new(LoopContext {
            group_id: self.id,
            capabilities: self.capabilities,
            tick_period: self.tick_period,
            tls_sync: self.tls_sync.clone(),
            tls_sync_tick_stride: self.tls_sync_tick_stride,
            on_worker_tick: self.on_worker_tick.clone(),
            stop_flag: self.stop_flag.clone(),
            hooks,
            rendezvous,
        })
    }

    /// Hand a task to one of this group's workers, round-robin. The chosen
    /// worker is woken in case it is currently blocked between reactive
    /// iterations.
    pub fn defer(&self, task: *mut TaskHeader) {
        let index = self.next_defer_target.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        let worker = &self.workers[index];
        worker.inbox.push(task);
        worker.wake();
    }

    /// Signal every worker in this group to exit its loop after its current
    /// iteration. Does not block; call [`WorkerGroup::join`] afterward.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        for worker in &self.workers {
            worker.wake();
        }
    }

    /// Wait for every spawned (non-master) worker thread to exit.
    pub fn join(&self) {
        let mut handles = self.join_handles.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.workers.iter().any(|w| w.is_running())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn capabilities(&self) -> GroupCapabilities {
        self.capabilities
    }

    /// Publish a TLS-sync broadcast to every worker currently in this group.
    pub fn push_tls_sync_task<F>(&self, f: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.tls_sync.push_task(self.workers.len() as u64, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration as StdDuration;

    struct NoopHooks;
    impl GroupLifecycleHooks for NoopHooks {
        fn on_worker_started(&self, _group_id: u32, _worker_id: usize) {}
        fn on_worker_stopped(&self, _group_id: u32, _worker_id: usize) {}
        fn on_tick_worker_services(&self, _group_id: u32, _worker_id: usize) {}
    }

    #[test]
    fn defer_runs_pushed_tasks_across_a_reactive_group() {
        let config = WorkerGroupConfig::new(1, "reactive", 3)
            .with_capabilities(GroupCapabilities::ACTIVE | GroupCapabilities::HANDLES_TASKS);
        let group = Arc::new(WorkerGroup::from_config(&config));

        let started = Arc::new(StdAtomicUsize::new(0));
        let stopped = Arc::new(StdAtomicUsize::new(0));
        let on_started = {
            let started = started.clone();
            Arc::new(move |_id: u32| {
                started.fetch_add(1, Ordering::SeqCst);
            })
        };
        let on_stopped = {
            let stopped = stopped.clone();
            Arc::new(move |_id: u32| {
                stopped.fetch_add(1, Ordering::SeqCst);
            })
        };

        let group_for_thread = group.clone();
        let handle = std::thread::spawn(move || {
            group_for_thread
                .start(Arc::new(NoopHooks), on_started, on_stopped)
                .unwrap();
        });

        std::thread::sleep(StdDuration::from_millis(20));

        let results = Arc::new(StdMutex::new(Vec::new()));
        for i in 0..9 {
            let results = results.clone();
            let task = hive_task::Task::<16>::new(move || {
                results.lock().unwrap().push(i);
            });
            group.defer(task);
        }

        std::thread::sleep(StdDuration::from_millis(50));
        group.stop();
        group.join();
        handle.join().unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        let mut results = results.lock().unwrap().clone();
        results.sort_unstable();
        assert_eq!(results, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn a_group_with_no_capabilities_still_runs_and_stops_cleanly() {
        let config = WorkerGroupConfig::new(2, "idle", 2).with_capabilities(GroupCapabilities::empty());
        let group = Arc::new(WorkerGroup::from_config(&config));
        group
            .start(Arc::new(NoopHooks), Arc::new(|_| {}), Arc::new(|_| {}))
            .unwrap();
        std::thread::sleep(StdDuration::from_millis(20));
        assert!(group.is_running());
        group.stop();
        group.join();
    }
}
