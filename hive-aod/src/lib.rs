//! Async Object-bound Dispatcher.
//!
//! An [`AodObject`] guarantees at most one queued task executes against it
//! at a time, regardless of how many threads call
//! [`AodObject::do_async`]/[`AodObject::do_async_after`] concurrently. The
//! guarantee costs no lock: the thread whose push finds the object's queue
//! empty becomes the drainer, running that task and any others that arrive
//! while it works, until the queue is empty again.

mod object;
mod status;

pub use object::{AodObject, AodObjectKind};
pub use status::Status;
