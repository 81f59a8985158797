use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crate::task::TlsSyncHeader;

thread_local! {
    static CURSOR: Cell<u64> = const { Cell::new(0) };
}

/// Lock-free, fixed-capacity circular queue of TLS-sync tasks.
///
/// A single monotonic `head` counter is bumped by producers calling
/// [`TlsSyncQueue::push`]; every worker thread keeps its own cursor
/// (thread-local, reset by [`TlsSyncQueue::tls_initialize`]) that walks the
/// ring independently via [`TlsSyncQueue::tls_front`] /
/// [`TlsSyncQueue::tls_next`].
pub struct TlsSyncQueue {
    head: AtomicU64,
    items: Box<[AtomicPtr<TlsSyncHeader>]>,
    mask: u64,
}

impl TlsSyncQueue {
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "tls-sync ring capacity must be a power of two, got {capacity}"
        );
        let items = (0..capacity)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        Self {
            head: AtomicU64::new(0),
            items,
            mask: capacity as u64 - 1,
        }
    }

    /// Reset the calling thread's cursor. Call once per worker before it
    /// starts walking the ring.
    pub fn tls_initialize(&self) {
        CURSOR.with(|c| c.set(0));
    }

    /// Publish a new task, claiming the next ring slot.
    ///
    /// # Panics
    /// Panics (in debug builds) if the slot is still occupied, meaning more
    /// tasks are in flight than the ring has capacity for.
    pub fn push(&self, task: *mut TlsSyncHeader) {
        let index = self.head.fetch_add(1, Ordering::AcqRel);
        let slot = &self.items[(index & self.mask) as usize];
        let previous = slot.swap(task, Ordering::AcqRel);
        debug_assert!(
            previous.is_null(),
            "too many tls-sync tasks in flight at once; increase the ring capacity"
        );
    }

    /// The task at the calling thread's current cursor, or null if it has
    /// caught up to `head`.
    pub fn tls_front(&self) -> *mut TlsSyncHeader {
        let index = CURSOR.with(|c| c.get());
        self.items[(index & self.mask) as usize].load(Ordering::Acquire)
    }

    /// Advance the calling thread's cursor and return the task now at the
    /// front, or null.
    pub fn tls_next(&self) -> *mut TlsSyncHeader {
        let index = CURSOR.with(|c| c.get()) + 1;
        let result = self.items[(index & self.mask) as usize].load(Ordering::Acquire);
        CURSOR.with(|c| c.set(index));
        result
    }

    /// Clear the calling thread's current slot after it finishes with the
    /// task there (the last worker through also destroys it).
    pub fn tls_pop(&self) {
        let index = CURSOR.with(|c| c.get());
        let previous = self.items[(index & self.mask) as usize].swap(ptr::null_mut(), Ordering::AcqRel);
        debug_assert!(!previous.is_null(), "tls_pop called on an empty slot");
    }
}

impl Drop for TlsSyncQueue {
    fn drop(&mut self) {
        for slot in self.items.iter() {
            let ptr = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if !ptr.is_null() {
                // SAFETY: any task still sitting in the ring at drop time
                // was never fully drained; dropping it here is the only
                // remaining owner's responsibility.
                unsafe { TlsSyncHeader::dealloc(ptr) };
            }
        }
    }
}

// SAFETY: all mutable state is either atomic (`head`, `items`) or
// thread-local (`CURSOR`); no two threads ever touch the same non-atomic
// memory through a `&TlsSyncQueue`.
unsafe impl Send for TlsSyncQueue {}
unsafe impl Sync for TlsSyncQueue {}
