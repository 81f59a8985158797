mod group;
mod run_loop;
mod worker;

pub use group::WorkerGroup;
pub use worker::{Worker, WorkerRole};

/// Per-worker lifecycle callbacks a [`WorkerGroup`] invokes as its workers
/// start and stop. `hive_rt::services::ServiceRegistry` is the production
/// implementation; tests may supply a lighter one.
pub trait GroupLifecycleHooks: Send + Sync {
    fn on_worker_started(&self, group_id: u32, worker_id: usize);
    fn on_worker_stopped(&self, group_id: u32, worker_id: usize);
    fn on_tick_worker_services(&self, group_id: u32, worker_id: usize);
}
