use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hive_task::TaskQueue;
use hive_timer::DelayedTaskScheduler;
use parking_lot::{Condvar, Mutex};

/// Whether a worker runs on a thread spawned for it, or adopts the thread
/// that called [`crate::ServerInstance::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    Normal,
    Master,
}

/// One worker's thread-local-ish context: its own task inbox, its own
/// delayed-task heap, and the wake signal a reactive loop blocks on.
///
/// The inbox is single-consumer (only this worker ever pops from it) even
/// though the group conceptually has one shared inbox — `WorkerGroup::defer`
/// round-robins pushes across each worker's own queue, which keeps
/// [`hive_task::TaskQueue`]'s single-consumer contract intact without a
/// second queue implementation.
pub struct Worker {
    pub id: usize,
    pub role: WorkerRole,
    pub(crate) inbox: TaskQueue,
    pub(crate) timers: DelayedTaskScheduler,
    pub(crate) wake_lock: Mutex<()>,
    pub(crate) wake_signal: Condvar,
    pub(crate) is_running: AtomicBool,
    pub(crate) started_at: Mutex<Option<Instant>>,
}

impl Worker {
    pub fn new(id: usize, role: WorkerRole) -> Self {
        Self {
            id,
            role,
            inbox: TaskQueue::new(),
            timers: DelayedTaskScheduler::new(),
            wake_lock: Mutex::new(()),
            wake_signal: Condvar::new(),
            is_running: AtomicBool::new(false),
            started_at: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn started_at(&self) -> Option<Instant> {
        *self.started_at.lock()
    }

    /// Wake this worker from a reactive block, e.g. because a task was
    /// just pushed to its inbox or the group is stopping.
    pub(crate) fn wake(&self) {
        let _guard = self.wake_lock.lock();
        self.wake_signal.notify_one();
    }
}

pub(crate) type SharedWorker = Arc<Worker>;
