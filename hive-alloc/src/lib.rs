//! Tiered slab allocator.
//!
//! Allocations are bucketed into a small number of fixed-size tiers. Each
//! tier is a lock-free free-list (a Treiber stack) of preallocated,
//! cache-line-aligned blocks; requests above the largest tier fall through
//! to the system allocator. Tier exhaustion never fails a request — it
//! grows the tier with one more OS-backed block instead.

mod stats;
mod tier;

use std::alloc::{alloc, dealloc, Layout};
use std::ptr::NonNull;

pub use stats::{AllocStats, TierStats};
use tier::Tier;

/// Platform cache line size; all tiered blocks are aligned to this.
pub const CACHE_LINE: usize = 64;

/// Default tier size classes, smallest to largest.
pub const DEFAULT_TIERS: &[usize] = &[64, 128, 512, 1024, 2048, 8192];

#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    #[error("system allocator denied a request for {requested} bytes")]
    OsAllocationFailed { requested: usize },
}

/// A block handed out by [`SlabAllocator::allocate`].
///
/// `size` is the tier capacity the block was carved from (or the original
/// request size for OS-passthrough blocks) and must be passed back
/// unmodified to [`SlabAllocator::deallocate`].
pub struct SlabBlock {
    ptr: NonNull<u8>,
    size: usize,
}

impl SlabBlock {
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// A tiered, cache-aligned slab allocator.
pub struct SlabAllocator {
    tiers: Vec<Tier>,
    largest: usize,
}

impl SlabAllocator {
    /// Build an allocator with custom tier boundaries (must be sorted
    /// ascending; duplicates are rejected by construction-time assertion in
    /// debug builds since the ladder search assumes strict ordering).
    pub fn new(tier_sizes: &[usize]) -> Self {
        debug_assert!(
            tier_sizes.windows(2).all(|w| w[0] < w[1]),
            "tier sizes must be strictly increasing"
        );
        let tiers = tier_sizes.iter().copied().map(Tier::new).collect();
        Self {
            tiers,
            largest: tier_sizes.last().copied().unwrap_or(0),
        }
    }

    pub fn with_default_tiers() -> Self {
        Self::new(DEFAULT_TIERS)
    }

    /// Warm every tier so that allocations within tier capacity need not
    /// touch the OS allocator later. Best-effort: a failed warm-up round
    /// simply leaves that tier colder, it does not abort.
    pub fn preallocate(&self) {
        for tier in &self.tiers {
            tier.warm();
        }
    }

    /// Tier index whose capacity is the smallest tier `>= size`, ties going
    /// to the smaller tier. `None` if `size` exceeds the largest tier.
    fn tier_for(&self, size: usize) -> Option<usize> {
        self.tiers.iter().position(|t| t.block_size() >= size)
    }

    pub fn allocate(&self, size: usize) -> Result<SlabBlock, AllocError> {
        self.allocate_with(size, Tier::acquire)
    }

    /// Like [`SlabAllocator::allocate`], but the calling worker keeps a
    /// refillable thread-local cache of blocks for tiers it hits, trading
    /// a little memory for avoiding the shared free-list's CAS on the
    /// common path. Use for workers in a group configured with
    /// `THREAD_LOCAL_ALLOCATOR`.
    pub fn allocate_cached(&self, size: usize) -> Result<SlabBlock, AllocError> {
        self.allocate_with(size, Tier::acquire_cached)
    }

    fn allocate_with(
        &self,
        size: usize,
        acquire: impl FnOnce(&Tier) -> Result<NonNull<u8>, AllocError>,
    ) -> Result<SlabBlock, AllocError> {
        if let Some(idx) = self.tier_for(size) {
            let tier = &self.tiers[idx];
            let ptr = acquire(tier)?;
            return Ok(SlabBlock {
                ptr,
                size: tier.block_size(),
            });
        }

        // Above the largest tier: passthrough to the system allocator.
        let layout = Layout::from_size_align(size.max(1), CACHE_LINE)
            .expect("size/align overflow building passthrough layout");
        // SAFETY: layout has non-zero size and a valid power-of-two alignment.
        let raw = unsafe { alloc(layout) };
        let ptr =
            NonNull::new(raw).ok_or(AllocError::OsAllocationFailed { requested: size })?;
        Ok(SlabBlock { ptr, size })
    }

    /// Return a block to the allocator. `block.size()` must be exactly the
    /// value `allocate` returned for this pointer; passing a mismatched size
    /// is undefined behavior (it would route the block to the wrong tier's
    /// free-list, or the wrong `Layout` for an OS-passthrough block).
    pub fn deallocate(&self, block: SlabBlock) {
        if block.size > self.largest {
            let layout = Layout::from_size_align(block.size, CACHE_LINE)
                .expect("size/align overflow building passthrough layout");
            // SAFETY: `block.size` matches the layout used in `allocate`,
            // by this function's contract.
            unsafe { dealloc(block.ptr.as_ptr(), layout) };
            return;
        }

        let idx = self
            .tiers
            .iter()
            .position(|t| t.block_size() == block.size)
            .expect("deallocate() called with a size that matches no tier");
        self.tiers[idx].release(block.ptr);
    }

    pub fn stats(&self) -> AllocStats {
        AllocStats {
            tiers: self.tiers.iter().map(Tier::stats).collect(),
        }
    }
}

impl Default for SlabAllocator {
    fn default() -> Self {
        Self::with_default_tiers()
    }
}
