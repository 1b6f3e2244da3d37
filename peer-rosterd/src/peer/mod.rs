pub mod hash;
pub mod manager;
pub mod observer;
pub mod record;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a panicking holder poisoned it.
/// Roster and record state stay consistent across a panic: every write is
/// a single assignment.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
