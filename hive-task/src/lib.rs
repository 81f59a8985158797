//! Inline, type-erased units of work and the lock-free queue that links
//! them.
//!
//! A [`Task`] stores a `FnOnce() + Send + 'static` closure inline, behind a
//! fixed-size [`TaskHeader`] vtable, so a worker's hot loop never touches a
//! boxed-closure allocation per dispatch beyond the task's own backing
//! store. A [`TaskQueue`] links tasks through their own header rather than
//! a separate node, and reports on each push whether the queue was empty
//! immediately beforehand — the signal higher layers use to decide who is
//! responsible for draining an object.

mod header;
mod queue;

pub use header::{RawTask, Task, TaskHeader};
pub use queue::TaskQueue;

/// Smallest inline capacity worth naming; a zero-capture closure still
/// needs a byte of storage so the header sits at a predictable offset.
pub const MIN_INLINE: usize = 1;
