//! Delayed-task scheduling for worker run loops.
//!
//! Producers on any thread call [`DelayedTaskScheduler::schedule`] to hand
//! over a task and a deadline. The owning worker periodically calls
//! [`DelayedTaskScheduler::drain_pending`] to fold newly-arrived tasks into
//! a deadline-ordered heap, then [`DelayedTaskScheduler::run_expired`] to
//! dispatch whatever is due. Both of those calls are worker-thread-only;
//! `schedule` is the only cross-thread entry point.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_queue::SegQueue;
use hive_task::{RawTask, Task, TaskHeader};

struct PendingEntry {
    deadline: Instant,
    task: *mut TaskHeader,
}

// SAFETY: `task` is an exclusively-owned task handed across the queue by its
// producer; the queue itself provides the necessary synchronization.
unsafe impl Send for PendingEntry {}

struct HeapEntry {
    deadline: Instant,
    sequence: u64,
    task: *mut TaskHeader,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline, self.sequence).cmp(&(other.deadline, other.sequence))
    }
}

/// A deadline-ordered queue of tasks, fed from any thread and drained by a
/// single owning worker.
pub struct DelayedTaskScheduler {
    pending: SegQueue<PendingEntry>,
    heap: RefCell<BinaryHeap<Reverse<HeapEntry>>>,
    next_sequence: AtomicU64,
}

impl DelayedTaskScheduler {
    pub fn new() -> Self {
        Self {
            pending: SegQueue::new(),
            heap: RefCell::new(BinaryHeap::new()),
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Hand a task over for dispatch no earlier than `deadline`. Safe to
    /// call from any thread.
    pub fn schedule(&self, deadline: Instant, task: *mut TaskHeader) {
        self.pending.push(PendingEntry { deadline, task });
    }

    /// Fold every task waiting in the pending queue into the heap,
    /// assigning each a monotonically increasing sequence number in the
    /// order it is drained (FIFO across the pending queue, then heap order
    /// for ties on the same deadline).
    ///
    /// Worker-thread only: must not be called concurrently with itself or
    /// with [`DelayedTaskScheduler::run_expired`].
    pub fn drain_pending(&self) {
        let mut heap = self.heap.borrow_mut();
        while let Some(entry) = self.pending.pop() {
            let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
            heap.push(Reverse(HeapEntry {
                deadline: entry.deadline,
                sequence,
                task: entry.task,
            }));
        }
    }

    /// Dispatch every task whose deadline has passed relative to `now`.
    /// Returns the number of tasks dispatched.
    ///
    /// Worker-thread only, same restriction as [`DelayedTaskScheduler::drain_pending`].
    pub fn run_expired(&self, now: Instant) -> usize {
        let mut heap = self.heap.borrow_mut();
        let mut dispatched = 0;
        while let Some(Reverse(entry)) = heap.peek() {
            if entry.deadline > now {
                break;
            }
            let Reverse(entry) = heap.pop().expect("just peeked");
            // SAFETY: every task stored in the heap was handed to us whole
            // via `schedule` and has not been touched since.
            let task = unsafe { RawTask::from_raw(entry.task) };
            task.dispatch();
            dispatched += 1;
        }
        dispatched
    }

    /// Number of tasks currently waiting in the heap (not counting anything
    /// still sitting in the pending queue). Worker-thread only.
    pub fn len(&self) -> usize {
        self.heap.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.pending.is_empty()
    }
}

impl Default for DelayedTaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DelayedTaskScheduler {
    fn drop(&mut self) {
        self.drain_pending();
        let mut heap = self.heap.borrow_mut();
        while let Some(Reverse(entry)) = heap.pop() {
            // SAFETY: see `run_expired`; dropping without dispatch still
            // runs the capture's destructor exactly once.
            drop(unsafe { RawTask::from_raw(entry.task) });
        }
    }
}

// The scheduler is shared between the producers calling `schedule` and the
// single owning worker calling `drain_pending`/`run_expired`; `pending` is a
// lock-free MPSC queue and `heap`/`next_sequence` are only ever touched by
// the owning worker, so `Sync` is sound as long as that discipline holds.
unsafe impl Sync for DelayedTaskScheduler {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn tasks_run_only_once_their_deadline_has_passed() {
        let scheduler = DelayedTaskScheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let now = Instant::now();

        let c = counter.clone();
        let far = Task::<16>::new(move || {
            c.fetch_add(1, AtomicOrdering::SeqCst);
        });
        scheduler.schedule(now + Duration::from_secs(3600), far);

        let c = counter.clone();
        let soon = Task::<16>::new(move || {
            c.fetch_add(10, AtomicOrdering::SeqCst);
        });
        scheduler.schedule(now, soon);

        scheduler.drain_pending();
        let dispatched = scheduler.run_expired(now);

        assert_eq!(dispatched, 1);
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 10);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn same_deadline_tasks_dispatch_in_drain_order() {
        let scheduler = DelayedTaskScheduler::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let now = Instant::now();

        for i in 0..20 {
            let order = order.clone();
            let ptr = Task::<16>::new(move || order.lock().unwrap().push(i));
            scheduler.schedule(now, ptr);
        }

        scheduler.drain_pending();
        let dispatched = scheduler.run_expired(now + Duration::from_millis(1));
        assert_eq!(dispatched, 20);
        assert_eq!(*order.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn dropping_the_scheduler_still_runs_pending_destructors() {
        struct DropBomb(Arc<AtomicUsize>);
        impl Drop for DropBomb {
            fn drop(&mut self) {
                self.0.fetch_add(1, AtomicOrdering::SeqCst);
            }
        }
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let scheduler = DelayedTaskScheduler::new();
            let bomb = DropBomb(counter.clone());
            let ptr = Task::<24>::new(move || {
                let _ = &bomb;
            });
            scheduler.schedule(Instant::now() + Duration::from_secs(3600), ptr);
        }
        assert_eq!(counter.load(AtomicOrdering::SeqCst), 1);
    }
}
