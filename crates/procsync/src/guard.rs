//! RAII guard for automatic mutex unlock

use crate::futex::{Futex, NativeFutex};
use crate::mutex::Mutex;
use crate::LockResult;

/// Unlocks the mutex when dropped, panics included.
///
/// Sugar over the raw [`Mutex`] operations for single-process callers;
/// shared-memory users that pair lock and unlock across process boundaries
/// keep calling the raw API directly.
pub struct MutexGuard<'a, F: Futex = NativeFutex> {
    mutex: &'a Mutex<F>,
    unlocked: bool,
}

impl<'a, F: Futex> MutexGuard<'a, F> {
    pub(crate) fn new(mutex: &'a Mutex<F>) -> Self {
        Self {
            mutex,
            unlocked: false,
        }
    }

    /// Unlocks early, before the guard would be dropped.
    pub fn unlock(mut self) {
        if !self.unlocked {
            self.unlocked = true;
            self.mutex.unlock();
        }
    }
}

impl<F: Futex> Drop for MutexGuard<'_, F> {
    fn drop(&mut self) {
        if !self.unlocked {
            self.mutex.unlock();
        }
    }
}

impl<F: Futex> Mutex<F> {
    /// Acquires under the deadlock watchdog and returns an unlock-on-drop
    /// guard.
    pub fn lock_guard(&self) -> LockResult<MutexGuard<'_, F>> {
        self.lock()?;
        Ok(MutexGuard::new(self))
    }

    /// Attempts to acquire without blocking, returning a guard on success.
    pub fn try_lock_guard(&self) -> LockResult<MutexGuard<'_, F>> {
        self.try_lock()?;
        Ok(MutexGuard::new(self))
    }
}
