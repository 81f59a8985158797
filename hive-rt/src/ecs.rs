//! Symmetric ECS store: fixed-capacity parallel component arrays addressed
//! by a generation-checked id. This crate only hosts the store and its
//! AOD-dispatched reclamation callback; it does not interpret component
//! data.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

/// `(type_tag, slot, generation)`. `type_tag` distinguishes stores sharing
/// an id space; `generation` invalidates an id once its slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId {
    pub type_tag: u16,
    pub slot: u32,
    pub generation: u32,
}

struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    generation: AtomicU32,
}

// SAFETY: access to `value` is always gated by `ComponentStore`'s own
// exclusive-borrow rules (a slot is only ever read/written through
// `&mut ComponentStore` or through the single-owner guarantees `acquire`
// and `release` establish around a slot's lifetime).
unsafe impl<T: Send> Send for Slot<T> {}
unsafe impl<T: Send> Sync for Slot<T> {}

/// A fixed-capacity, generation-checked component table for one `T`.
///
/// Free slots are tracked on a LIFO stack guarded by a `parking_lot::Mutex`.
/// A deactivation callback fires exactly once, the moment every issued id
/// has been released and the store is fully reclaimed.
pub struct ComponentStore<T> {
    type_tag: u16,
    slots: Vec<Slot<T>>,
    free: Mutex<Vec<u32>>,
    issued: AtomicU32,
    on_fully_reclaimed: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    deactivating: std::sync::atomic::AtomicBool,
}

impl<T> ComponentStore<T> {
    pub fn new(type_tag: u16, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                value: UnsafeCell::new(MaybeUninit::uninit()),
                generation: AtomicU32::new(0),
            })
            .collect();
        Self {
            type_tag,
            slots,
            free: Mutex::new((0..capacity as u32).rev().collect()),
            issued: AtomicU32::new(0),
            on_fully_reclaimed: Mutex::new(None),
            deactivating: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim a free slot and store `value` in it, returning the id.
    /// `None` if the store has no free slots.
    pub fn acquire(&self, value: T) -> Option<EntityId> {
        let slot_index = self.free.lock().pop()?;
        let slot = &self.slots[slot_index as usize];
        // SAFETY: this slot was just popped off the free list, so no other
        // caller holds it; writing into it does not overlap a live value.
        unsafe { (*slot.value.get()).write(value) };
        self.issued.fetch_add(1, Ordering::AcqRel);
        Some(EntityId {
            type_tag: self.type_tag,
            slot: slot_index,
            generation: slot.generation.load(Ordering::Acquire),
        })
    }

    /// Borrow the component behind `id`, or `None` if its generation has
    /// since been retired.
    pub fn get(&self, id: EntityId) -> Option<&T> {
        let slot = self.slots.get(id.slot as usize)?;
        if slot.generation.load(Ordering::Acquire) != id.generation {
            return None;
        }
        // SAFETY: the generation check above guarantees `id` still refers
        // to the live value written by `acquire`.
        Some(unsafe { (*slot.value.get()).assume_init_ref() })
    }

    /// Release `id`'s slot: drop its value, bump the slot's generation so
    /// stale ids are rejected, and return it to the free list. Calling this
    /// with an already-stale id is a no-op.
    pub fn release(&self, id: EntityId) {
        let Some(slot) = self.slots.get(id.slot as usize) else { return };
        if slot.generation.load(Ordering::Acquire) != id.generation {
            return;
        }
        // SAFETY: the generation check confirms this slot still holds the
        // value `acquire` wrote for `id`, and no other caller can pass the
        // same generation concurrently (it is about to be retired).
        unsafe { (*slot.value.get()).assume_init_drop() };
        slot.generation.fetch_add(1, Ordering::AcqRel);
        self.free.lock().push(id.slot);

        let remaining = self.issued.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && self.deactivating.load(Ordering::Acquire) {
            if let Some(cb) = self.on_fully_reclaimed.lock().take() {
                cb();
            }
        }
    }

    pub fn issued_count(&self) -> u32 {
        self.issued.load(Ordering::Acquire)
    }

    /// Begin deactivation: `on_fully_reclaimed` runs once every
    /// currently-issued id has been released (immediately, if none are
    /// issued right now).
    pub fn deactivate<F>(&self, on_fully_reclaimed: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.deactivating.store(true, Ordering::Release);
        if self.issued_count() == 0 {
            on_fully_reclaimed();
            return;
        }
        *self.on_fully_reclaimed.lock() = Some(Box::new(on_fully_reclaimed));
    }
}

impl<T> Drop for ComponentStore<T> {
    fn drop(&mut self) {
        let free: std::collections::HashSet<u32> = self.free.lock().iter().copied().collect();
        for (index, slot) in self.slots.iter().enumerate() {
            if !free.contains(&(index as u32)) {
                // SAFETY: every slot not on the free list holds a value
                // written by `acquire` that was never subsequently dropped
                // by `release`.
                unsafe { (*slot.value.get()).assume_init_drop() };
            }
        }
    }
}
