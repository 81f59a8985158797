use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::header::TaskHeader;

/// Single-consumer, multi-producer intrusive queue of [`TaskHeader`]s,
/// linked through each task's own `next` field (Vyukov's classic
/// lock-free MPSC construction, using a stub node to avoid a race between
/// the last pop and a concurrent push).
///
/// `push` is wait-free and may be called from any thread. `pop` is
/// lock-free and must only ever be called by one logical consumer at a
/// time — calling it concurrently from two threads is undefined behavior.
pub struct TaskQueue {
    head: AtomicPtr<TaskHeader>,
    tail: UnsafeCell<*mut TaskHeader>,
    stub: *mut TaskHeader,
}

impl TaskQueue {
    pub fn new() -> Self {
        let stub = Box::into_raw(Box::new(TaskHeader::stub()));
        Self {
            head: AtomicPtr::new(stub),
            tail: UnsafeCell::new(stub),
            stub,
        }
    }

    /// Push `task` onto the queue. Returns whether the queue observed as
    /// empty immediately before this push — the one-bit signal the AOD
    /// dispatcher uses to decide whether the pushing thread must itself
    /// drain the object.
    pub fn push(&self, task: *mut TaskHeader) -> bool {
        // SAFETY: `task` is a live, exclusively-owned task handed to us by
        // the caller (it is not on any other queue, per the task's own
        // single-queue invariant).
        unsafe { (*task).next.store(ptr::null_mut(), Ordering::Relaxed) };
        let prev = self.head.swap(task, Ordering::AcqRel);
        let was_empty = prev == self.stub;
        // SAFETY: `prev` was the queue's last-pushed node (or the stub);
        // either way it is still live until `pop` frees it, and only the
        // consumer ever reads `next`.
        unsafe { (*prev).next.store(task, Ordering::Release) };
        was_empty
    }

    /// Pop the next task, `None` if the queue is empty (or if a producer
    /// is mid-push and has not yet linked its node — the caller should
    /// treat that the same as empty and retry later).
    ///
    /// # Safety (logical, not `unsafe fn`)
    /// Must only be called by the single designated consumer.
    pub fn pop(&self) -> Option<*mut TaskHeader> {
        unsafe {
            let tail_cell = self.tail.get();
            let mut tail = *tail_cell;
            let mut next = (*tail).next.load(Ordering::Acquire);

            if tail == self.stub {
                if next.is_null() {
                    return None;
                }
                *tail_cell = next;
                tail = next;
                next = (*next).next.load(Ordering::Acquire);
            }

            if !next.is_null() {
                *tail_cell = next;
                return Some(tail);
            }

            let head = self.head.load(Ordering::Acquire);
            if tail != head {
                // A producer has claimed `head` but not yet linked `tail.next`.
                // The queue is not really empty; tell the caller to retry.
                return None;
            }

            // Re-insert the stub so the consumer has somewhere to land once
            // the in-flight producer finishes linking its node.
            self.push(self.stub);

            next = (*tail).next.load(Ordering::Acquire);
            if !next.is_null() {
                *tail_cell = next;
                return Some(tail);
            }
            None
        }
    }

    /// Best-effort emptiness check. Racy against concurrent producers by
    /// construction (as is the queue itself); useful only for diagnostics.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.stub
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        use crate::header::RawTask;
        while let Some(raw) = self.pop() {
            if raw != self.stub {
                // SAFETY: every non-stub node in this queue is an
                // exclusively-owned task we are now draining.
                drop(unsafe { RawTask::from_raw(raw) });
            }
        }
        // SAFETY: the stub was allocated by `Box::new` in `new` and is not
        // referenced anywhere else once the queue is being dropped.
        drop(unsafe { Box::from_raw(self.stub) });
    }
}

// The queue's shared state (the `head` pointer, the linked tasks' `next`
// fields) is synchronized via atomics; `tail` is only ever touched by the
// single designated consumer, which callers must uphold.
unsafe impl Send for TaskQueue {}
unsafe impl Sync for TaskQueue {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{RawTask, Task};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::thread;

    fn drain_all(q: &TaskQueue, expect: usize) {
        let mut seen = 0;
        while seen < expect {
            if let Some(raw) = q.pop() {
                unsafe { RawTask::from_raw(raw) }.dispatch();
                seen += 1;
            }
        }
    }

    #[test]
    fn single_thread_push_pop_preserves_order() {
        let q = TaskQueue::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..100 {
            let order = order.clone();
            let ptr = Task::<32>::new(move || order.lock().unwrap().push(i));
            q.push(ptr);
        }
        drain_all(&q, 100);
        let order = order.lock().unwrap();
        assert_eq!(*order, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn first_push_reports_previously_empty() {
        let q = TaskQueue::new();
        let a = Task::<1>::new(|| {});
        let b = Task::<1>::new(|| {});
        assert!(q.push(a));
        assert!(!q.push(b));
        drain_all(&q, 2);
    }

    #[test]
    fn cross_thread_produce_then_consume() {
        let q = Arc::new(TaskQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));
        const N: usize = 10_000;

        let producer = {
            let q = q.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..N {
                    let counter = counter.clone();
                    let ptr = Task::<16>::new(move || {
                        counter.fetch_add(1, AtomicOrdering::SeqCst);
                    });
                    q.push(ptr);
                }
            })
        };
        producer.join().unwrap();
        drain_all(&q, N);
        assert_eq!(counter.load(AtomicOrdering::SeqCst), N);
    }

    #[test]
    fn cross_thread_produce_and_consume_concurrently() {
        let q = Arc::new(TaskQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));
        const N: usize = 50_000;

        let producer = {
            let q = q.clone();
            let counter = counter.clone();
            thread::spawn(move || {
                for _ in 0..N {
                    let counter = counter.clone();
                    let ptr = Task::<16>::new(move || {
                        counter.fetch_add(1, AtomicOrdering::SeqCst);
                    });
                    q.push(ptr);
                }
            })
        };

        let mut seen = 0;
        while seen < N {
            if let Some(raw) = q.pop() {
                unsafe { RawTask::from_raw(raw) }.dispatch();
                seen += 1;
            }
        }
        producer.join().unwrap();
        assert_eq!(counter.load(AtomicOrdering::SeqCst), N);
    }
}
