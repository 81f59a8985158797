use crate::queue::TlsSyncQueue;
use crate::task::{make_tls_sync_task, TlsSyncHeader};

const DEFAULT_RING_CAPACITY: usize = 4096;
const TASK_INLINE_CAPACITY: usize = 48;

/// Broadcasts a closure to every worker of a group exactly once.
///
/// Each worker calls [`TlsSyncSystem::tick`] once per loop iteration; the
/// closure runs with `is_final = false` on every worker that observes it,
/// and with `is_final = true` exactly once more, on whichever worker
/// happens to be the last one through.
pub struct TlsSyncSystem {
    queue: TlsSyncQueue,
}

impl TlsSyncSystem {
    pub fn new() -> Self {
        Self::with_ring_capacity(DEFAULT_RING_CAPACITY)
    }

    pub fn with_ring_capacity(capacity: usize) -> Self {
        Self {
            queue: TlsSyncQueue::new(capacity),
        }
    }

    /// Reset the calling worker's cursor. Call once when a worker starts.
    pub fn tls_initialize(&self) {
        self.queue.tls_initialize();
    }

    /// Publish `f` for every one of `workers_count` workers to observe.
    pub fn push_task<F>(&self, workers_count: u64, f: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let task = make_tls_sync_task::<TASK_INLINE_CAPACITY, F>(workers_count, f);
        self.queue.push(task);
    }

    /// Walk every task newly visible to the calling worker since its last
    /// tick, dispatching each and finalizing the ones this call observes
    /// the zero-transition for.
    pub fn tick(&self) {
        let mut task = self.queue.tls_front();
        while !task.is_null() {
            // SAFETY: `task` came from a live ring slot; it has not yet
            // been dispatched by this worker.
            unsafe { TlsSyncHeader::dispatch(task, false) };

            // SAFETY: see above.
            let is_last = unsafe { TlsSyncHeader::release_reference(task) };
            if is_last {
                unsafe { TlsSyncHeader::dispatch(task, true) };
                self.queue.tls_pop();
                // SAFETY: no worker will touch this task again; the slot
                // was just cleared.
                unsafe { TlsSyncHeader::dealloc(task) };
            }

            task = self.queue.tls_next();
        }
    }
}

impl Default for TlsSyncSystem {
    fn default() -> Self {
        Self::new()
    }
}
