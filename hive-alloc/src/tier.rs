use std::alloc::{alloc, Layout};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crate::stats::TierStats;
use crate::{AllocError, CACHE_LINE};

/// Free blocks link through their own storage; `next` lives at offset 0 of
/// an otherwise-unused block.
#[repr(C)]
struct FreeNode {
    next: *mut FreeNode,
}

/// Number of blocks pulled from the shared stack into a per-worker cache at
/// a time, and the cap on how many a worker holds onto before spilling back.
const CACHE_BATCH: usize = 32;
const CACHE_CAP: usize = 128;

thread_local! {
    static TIER_CACHE: RefCell<HashMap<usize, Vec<NonNull<u8>>>> = RefCell::new(HashMap::new());
}

/// One fixed-size-class pool: a lock-free shared free-list (a Treiber
/// stack) plus relaxed-atomic diagnostic counters.
pub(crate) struct Tier {
    block_size: usize,
    head: AtomicPtr<FreeNode>,
    allocs: AtomicU64,
    deallocs: AtomicU64,
    os_allocs: AtomicU64,
    os_deallocs: AtomicU64,
}

impl Tier {
    pub(crate) fn new(block_size: usize) -> Self {
        Self {
            block_size,
            head: AtomicPtr::new(std::ptr::null_mut()),
            allocs: AtomicU64::new(0),
            deallocs: AtomicU64::new(0),
            os_allocs: AtomicU64::new(0),
            os_deallocs: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn block_size(&self) -> usize {
        self.block_size
    }

    fn identity(&self) -> usize {
        self as *const Self as usize
    }

    fn layout(&self) -> Layout {
        Layout::from_size_align(self.block_size, CACHE_LINE)
            .expect("tier size/align overflow")
    }

    /// Pop one block from the shared Treiber stack, `None` if empty.
    fn pop_shared(&self) -> Option<NonNull<u8>> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if head.is_null() {
                return None;
            }
            // SAFETY: non-null nodes on this stack were pushed by `push_shared`,
            // which only ever stores pointers obtained from this tier's own
            // allocations; the stack's single-writer-at-a-time CAS discipline
            // ensures `head` is not concurrently freed while we dereference it.
            let next = unsafe { (*head).next };
            match self.head.compare_exchange_weak(
                head,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return NonNull::new(head as *mut u8),
                Err(actual) => head = actual,
            }
        }
    }

    fn push_shared(&self, ptr: NonNull<u8>) {
        let node = ptr.as_ptr() as *mut FreeNode;
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            // SAFETY: `node` points at a live block sized for this tier; we
            // only write its `next` field, which is within bounds for any
            // tier size class (all tiers are >= size_of::<FreeNode>()).
            unsafe { (*node).next = head };
            match self.head.compare_exchange_weak(
                head,
                node,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    fn os_alloc_one(&self) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: `layout()` always has non-zero size and a valid alignment.
        let raw = unsafe { alloc(self.layout()) };
        self.os_allocs.fetch_add(1, Ordering::Relaxed);
        NonNull::new(raw).ok_or(AllocError::OsAllocationFailed {
            requested: self.block_size,
        })
    }

    pub(crate) fn acquire(&self) -> Result<NonNull<u8>, AllocError> {
        self.allocs.fetch_add(1, Ordering::Relaxed);

        let identity = self.identity();
        if let Some(hit) = TIER_CACHE.with(|c| {
            c.borrow_mut()
                .get_mut(&identity)
                .and_then(|v| v.pop())
        }) {
            return Ok(hit);
        }

        if let Some(block) = self.pop_shared() {
            return Ok(block);
        }

        // Shared stack and local cache both exhausted: grow via the OS.
        // This never fails the caller's request for tier-exhaustion reasons
        // alone — only a genuine OS denial surfaces as an error.
        self.os_alloc_one()
    }

    /// Like [`Tier::acquire`], but refills the calling worker's cache in a
    /// batch from the shared stack, growing the shared stack via the OS
    /// when it runs dry mid-refill. Intended for groups configured with a
    /// thread-local allocator cache.
    pub(crate) fn acquire_cached(&self) -> Result<NonNull<u8>, AllocError> {
        let identity = self.identity();
        let cached = TIER_CACHE.with(|c| c.borrow_mut().get_mut(&identity).and_then(|v| v.pop()));
        if let Some(hit) = cached {
            self.allocs.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        let mut batch = Vec::with_capacity(CACHE_BATCH);
        for _ in 0..CACHE_BATCH {
            match self.pop_shared() {
                Some(b) => batch.push(b),
                None => break,
            }
        }
        if batch.is_empty() {
            batch.push(self.os_alloc_one()?);
        }

        self.allocs.fetch_add(1, Ordering::Relaxed);
        let result = batch.pop().expect("just ensured non-empty");
        TIER_CACHE.with(|c| {
            c.borrow_mut().entry(identity).or_default().extend(batch);
        });
        Ok(result)
    }

    pub(crate) fn release(&self, ptr: NonNull<u8>) {
        self.deallocs.fetch_add(1, Ordering::Relaxed);

        let identity = self.identity();
        let spilled = TIER_CACHE.with(|c| {
            let mut map = c.borrow_mut();
            let cache = map.entry(identity).or_default();
            cache.push(ptr);
            if cache.len() > CACHE_CAP {
                cache.drain(..CACHE_BATCH).collect::<Vec<_>>()
            } else {
                Vec::new()
            }
        });
        for p in spilled {
            self.push_shared(p);
        }
    }

    /// Eagerly grow the shared stack by one OS-backed block so a later
    /// in-tier allocation need not touch the allocator. Best-effort.
    pub(crate) fn warm(&self) {
        if let Ok(block) = self.os_alloc_one() {
            self.push_shared(block);
        }
    }

    pub(crate) fn stats(&self) -> TierStats {
        TierStats {
            block_size: self.block_size,
            allocs: self.allocs.load(Ordering::Relaxed),
            deallocs: self.deallocs.load(Ordering::Relaxed),
            os_allocs: self.os_allocs.load(Ordering::Relaxed),
            os_deallocs: self.os_deallocs.load(Ordering::Relaxed),
        }
    }
}

impl Drop for Tier {
    fn drop(&mut self) {
        // Free every block still resident on the shared stack; per-thread
        // caches intentionally leak their residual blocks at process exit
        // the same way thread_local destructors race shutdown in any
        // long-running server — nothing references them anymore.
        while let Some(ptr) = self.pop_shared() {
            // SAFETY: `ptr` was allocated with `self.layout()`.
            unsafe { std::alloc::dealloc(ptr.as_ptr(), self.layout()) };
            self.os_deallocs.fetch_add(1, Ordering::Relaxed);
        }
    }
}
