//! Queue module: per-subject buffering, message state, and the event port.

mod state;
mod store;
mod subject;

pub use state::MessageState;
pub use store::BufferStore;

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::BufferEvent;

/// Receives the events a [`BufferStore`] emits.
///
/// Design intent:
/// - The store computes events under the subject lock and calls `emit` right
///   after releasing it, in order, before the store operation returns.
/// - `emit` may call back into the store.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &BufferEvent);
}

/// Lock a std mutex, recovering the guard if a previous holder panicked.
///
/// Store bookkeeping never leaves a queue half-updated across a panic point,
/// so the data behind a poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
