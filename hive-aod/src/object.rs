use std::hint;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use hive_task::{RawTask, Task, TaskHeader, TaskQueue};
use hive_timer::DelayedTaskScheduler;

use crate::Status;

/// What an [`AodObject`] is embedded in. This does not change dispatch
/// behavior (all three share one queue/counter pair); it is bookkeeping
/// for the accessors each variant exposes.
pub enum AodObjectKind {
    /// Embedded in a reference-counted object; `parent` points at the
    /// owning allocation.
    Shared { parent: NonNull<()> },
    /// Embedded in a `'static` object with no separate parent pointer.
    Static,
    /// Embedded just below a caller-supplied control block; `drop_hook` is
    /// invoked instead of an ordinary destructor when the object is retired.
    Custom { drop_hook: unsafe fn(*mut ()) },
}

/// An object that can only ever have one task executing against it at a
/// time, no matter how many threads call [`AodObject::do_async`]
/// concurrently. The mutual exclusion is lock-free: a push becomes the
/// drainer only when it is the one that took `remaining_tasks` from zero to
/// one *and* found the queue empty immediately before its own push. Either
/// signal alone is insufficient — `TaskQueue::pop` relinks the queue's stub
/// ahead of returning the last real task to its caller, so a push can
/// observe an empty queue while another thread is still mid-dispatch of
/// what it just popped. Requiring both conjuncts closes that window: the
/// drainer keeps running (its own task and any pushed while it works) until
/// the queue and the counter both say the object is genuinely idle.
pub struct AodObject {
    remaining_tasks: AtomicU64,
    queue: TaskQueue,
    kind: AodObjectKind,
}

impl AodObject {
    pub fn new(kind: AodObjectKind) -> Self {
        Self {
            remaining_tasks: AtomicU64::new(0),
            queue: TaskQueue::new(),
            kind,
        }
    }

    /// Build a `Shared`-kind object. `parent` must point at the owning
    /// allocation; there is no null default here, callers with no separate
    /// parent allocation should use [`AodObjectKind::Static`] instead.
    pub fn shared(parent: NonNull<()>) -> Self {
        Self::new(AodObjectKind::Shared { parent })
    }

    pub fn kind(&self) -> &AodObjectKind {
        &self.kind
    }

    /// The parent pointer a `Shared` object carries, if any.
    pub fn parent_ptr(&self) -> Option<NonNull<()>> {
        match self.kind {
            AodObjectKind::Shared { parent } => Some(parent),
            _ => None,
        }
    }

    /// Execute `f` thread-safe relative to this object.
    ///
    /// Returns [`Status::ExecutedSync`] if `f` (and possibly other tasks
    /// queued just ahead of or behind it) ran synchronously within this
    /// call, or [`Status::Success`] if another in-flight drain will run it.
    pub fn do_async<F>(&self, f: F) -> Status
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Task::<64>::new(f);
        self.dispatch(task)
    }

    /// Execute `f` no earlier than `delay` from now, thread-safe relative
    /// to this object.
    ///
    /// # Safety
    /// `self` must remain valid until the delayed task fires — the
    /// scheduler holds a raw pointer back to this object, not a reference
    /// with a borrow-checked lifetime. Callers normally ensure this by
    /// keeping the owning allocation (an `Arc`, or a `'static` value) alive
    /// for at least `delay`.
    pub fn do_async_after(
        &self,
        scheduler: &DelayedTaskScheduler,
        delay: Duration,
        f: impl FnOnce() + Send + 'static,
    ) -> Status {
        let self_addr = self as *const AodObject as usize;
        let deadline = Instant::now() + delay;
        let relay = Task::<80>::new(move || {
            // SAFETY: per this function's contract, `self_addr` is still
            // live when the deadline fires.
            let object = unsafe { &*(self_addr as *const AodObject) };
            object.dispatch(Task::<64>::new(f));
        });
        scheduler.schedule(deadline, relay);
        Status::Success
    }

    fn dispatch(&self, task: *mut TaskHeader) -> Status {
        let prev = self.remaining_tasks.fetch_add(1, Ordering::AcqRel);
        let was_empty = self.queue.push(task);
        if !(prev == 0 && was_empty) {
            return Status::Success;
        }
        self.drain();
        Status::ExecutedSync
    }

    /// Run every task currently queued, plus any pushed while running,
    /// until the object is genuinely idle. Called only by the thread whose
    /// push observed the queue transition from empty to non-empty.
    fn drain(&self) {
        loop {
            match self.queue.pop() {
                Some(raw) => {
                    // SAFETY: every node in this queue was produced by
                    // `Task::new` in `do_async`/`do_async_after`'s relay.
                    unsafe { RawTask::from_raw(raw) }.dispatch();
                    self.remaining_tasks.fetch_sub(1, Ordering::AcqRel);
                }
                None => {
                    if self.remaining_tasks.load(Ordering::Acquire) == 0 {
                        return;
                    }
                    // A concurrent push has claimed its slot but not yet
                    // linked it into the queue; spin briefly and retry.
                    hint::spin_loop();
                }
            }
        }
    }

    /// Remaining tasks not yet executed. Racy by construction; useful only
    /// for diagnostics.
    pub fn pending_count(&self) -> u64 {
        self.remaining_tasks.load(Ordering::Relaxed)
    }
}
