//! Futex-based condition variable
//!
//! Built from a sequence counter and a lazily bound mutex reference. A
//! waiter snapshots the counter, releases the mutex, and parks until the
//! counter differs from the snapshot; the value comparison inside the
//! backend wait is what makes a signal between the release and the sleep
//! impossible to lose. Broadcast wakes one waiter and requeues the rest
//! straight onto the mutex word, so they are released one at a time by
//! subsequent unlocks instead of stampeding.

use crate::futex::{Futex, NativeFutex, WaitOutcome};
use crate::mutex::{Mutex, DEADLOCK_TIMEOUT};
use crate::{LockError, LockResult};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// A condition variable usable from memory shared between processes.
///
/// Layout is `#[repr(C)]`: one mutex pointer followed by the 32-bit
/// sequence counter (plus trailing padding). The structure binds to exactly
/// one [`Mutex`], the first one ever waited on, and the binding is stable
/// for the condition variable's lifetime. When shared across processes the
/// bound mutex must live at the same address in every one of them.
///
/// Every operation requires the caller to hold the associated mutex;
/// waiting with a second, different mutex is a usage error with unspecified
/// behavior.
///
/// The sequence counter has no absolute meaning. Waiters only observe that
/// it *changed*, so wraparound is harmless short of 2^32 signals landing
/// inside one unlock-to-sleep window.
#[repr(C)]
pub struct Condvar<F: Futex = NativeFutex> {
    mutex: AtomicPtr<Mutex<F>>,
    seq: AtomicU32,
}

impl Condvar {
    /// Creates a condition variable on the platform's native backend.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_backend()
    }
}

impl<F: Futex> Default for Condvar<F> {
    fn default() -> Self {
        Self::with_backend()
    }
}

impl<F: Futex> Condvar<F> {
    /// Creates a condition variable on a specific wait/wake backend.
    #[must_use]
    pub const fn with_backend() -> Self {
        Self {
            mutex: AtomicPtr::new(ptr::null_mut()),
            seq: AtomicU32::new(0),
        }
    }

    /// (Re)initializes: clears the mutex binding and the sequence counter.
    ///
    /// Required before first use when the structure lives in memory with
    /// unknown prior contents. Any thread still waiting is abandoned.
    pub fn init(&self) {
        self.mutex.store(ptr::null_mut(), Ordering::Release);
        self.seq.store(0, Ordering::Release);
    }

    /// Wakes at most one waiter. Harmless when nobody is waiting.
    ///
    /// The caller must hold the associated mutex.
    pub fn signal(&self) {
        // Relaxed is enough on the counter: waiters synchronize through the
        // mutex, and the backend compares the value itself.
        self.seq.fetch_add(1, Ordering::Relaxed);
        F::wake_one(&self.seq);
    }

    /// Wakes every waiter: one directly, the rest requeued onto the mutex.
    ///
    /// The requeued waiters are released one at a time as the mutex is
    /// unlocked, instead of all waking to fight over it at once. The caller
    /// must hold the associated mutex.
    pub fn broadcast(&self) {
        let mutex = self.mutex.load(Ordering::Acquire);
        // Never bound means nobody has ever waited.
        if mutex.is_null() {
            return;
        }
        self.seq.fetch_add(1, Ordering::Relaxed);

        // SAFETY: the binding is stable once set and the caller keeps the
        // bound mutex's address valid for the condvar's lifetime.
        let mutex = unsafe { &*mutex };
        // The caller holds the mutex, so this cannot acquire a free lock;
        // it forces the eventual unlock to wake the head of the requeued
        // chain rather than skipping the kernel.
        mutex.mark_contested();
        F::requeue(&self.seq, mutex.word(), 1, i32::MAX as u32);
    }

    /// Releases `mutex` and blocks until the condition is signaled, then
    /// re-acquires the mutex before returning.
    ///
    /// Returns [`LockError::Deadlock`] if re-acquiring the mutex exceeds
    /// [`DEADLOCK_TIMEOUT`]. The caller must hold `mutex` and should
    /// re-check its predicate in a loop, as with any condition variable.
    pub fn wait(&self, mutex: &Mutex<F>) -> LockResult<()> {
        self.wait_inner(mutex, None, DEADLOCK_TIMEOUT)
    }

    /// Like [`wait`](Condvar::wait), giving up after `timeout`.
    ///
    /// [`LockError::TimedOut`] means the caller's bound expired before any
    /// signal; the mutex is still re-acquired first (under the watchdog, so
    /// a wedged mutex surfaces as [`LockError::Deadlock`] here too).
    pub fn timed_wait(&self, mutex: &Mutex<F>, timeout: Duration) -> LockResult<()> {
        self.wait_inner(mutex, Some(timeout), DEADLOCK_TIMEOUT)
    }

    /// [`wait`](Condvar::wait) with an explicit re-acquisition watchdog.
    pub fn wait_with_watchdog(&self, mutex: &Mutex<F>, watchdog: Duration) -> LockResult<()> {
        self.wait_inner(mutex, None, watchdog)
    }

    /// [`timed_wait`](Condvar::timed_wait) with an explicit re-acquisition
    /// watchdog. Tests use this to keep the deadlock heuristic fast.
    pub fn timed_wait_with_watchdog(
        &self,
        mutex: &Mutex<F>,
        timeout: Duration,
        watchdog: Duration,
    ) -> LockResult<()> {
        self.wait_inner(mutex, Some(timeout), watchdog)
    }

    fn wait_inner(
        &self,
        mutex: &Mutex<F>,
        timeout: Option<Duration>,
        watchdog: Duration,
    ) -> LockResult<()> {
        let snapshot = self.seq.load(Ordering::Relaxed);
        let bound = self.bind(mutex);

        // Release the mutex before sleeping. The backend compares the
        // counter against the snapshot taken above, so a signal landing
        // between this unlock and the sleep makes the wait return
        // immediately instead of being lost.
        bound.unlock();

        if let WaitOutcome::TimedOut = F::wait(&self.seq, snapshot, timeout) {
            // The mutex is needed even on the expiry path. A re-acquisition
            // that itself runs out the watchdog outranks the timeout.
            return match bound.timed_lock(watchdog) {
                Err(LockError::TimedOut) => Err(LockError::Deadlock),
                _ => Err(LockError::TimedOut),
            };
        }

        // Re-acquire through the contested loop only, never the
        // FREE -> LOCKED fast path: the word must end CONTESTED so that a
        // later unlock keeps waking waiters the broadcast requeued here.
        match bound.lock_contested(Instant::now().checked_add(watchdog)) {
            Err(LockError::TimedOut) => Err(LockError::Deadlock),
            other => other,
        }
    }

    /// Lazily binds this condition variable to the caller's mutex and
    /// returns the bound one.
    fn bind<'a>(&self, mutex: &'a Mutex<F>) -> &'a Mutex<F> {
        let caller = mutex as *const Mutex<F> as *mut Mutex<F>;
        let bound = self.mutex.load(Ordering::Acquire);
        let bound = if bound.is_null() {
            match self.mutex.compare_exchange(
                ptr::null_mut(),
                caller,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => caller,
                Err(existing) => existing,
            }
        } else {
            bound
        };
        debug_assert!(
            ptr::eq(bound, caller),
            "condition variable is already bound to a different mutex"
        );

        // SAFETY: the binding is stable once set, and the caller contract
        // keeps the bound address valid in every process sharing the
        // condvar. With a single mutex per condvar (the documented usage)
        // `bound` and `caller` are the same reference.
        unsafe { &*bound }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::futex::EmulatedFutex;

    #[test]
    fn test_broadcast_before_any_wait_is_noop() {
        let condvar = Condvar::new();
        condvar.broadcast();
    }

    #[test]
    fn test_signal_without_waiters_is_harmless() {
        let condvar = Condvar::new();
        condvar.signal();
        condvar.signal();
    }

    // Single-threaded expiry: the wait releases the mutex, times out, and
    // re-acquires it before reporting.
    #[test]
    fn test_timed_wait_expires_and_reacquires() {
        let mutex = Mutex::new();
        let condvar = Condvar::new();
        mutex.try_lock().unwrap();

        let result = condvar.timed_wait(&mutex, Duration::from_millis(20));
        assert_eq!(result, Err(LockError::TimedOut));
        assert!(mutex.is_locked());
    }

    #[test]
    fn test_rebinding_same_mutex_is_fine() {
        let mutex = Mutex::new();
        let condvar = Condvar::new();
        for _ in 0..3 {
            mutex.try_lock().unwrap();
            let result = condvar.timed_wait(&mutex, Duration::from_millis(5));
            assert_eq!(result, Err(LockError::TimedOut));
            mutex.unlock();
        }
    }

    #[test]
    fn test_init_clears_binding() {
        let mutex = Mutex::new();
        let condvar = Condvar::new();
        mutex.try_lock().unwrap();
        let _ = condvar.timed_wait(&mutex, Duration::from_millis(5));
        mutex.unlock();

        condvar.init();
        // Unbound again: broadcast has no waiters and no mutex to touch.
        condvar.broadcast();
        assert!(!mutex.is_locked());
    }

    // Mutex-reference-sized field plus the 32-bit counter, padded out.
    #[test]
    fn test_layout_is_pointer_plus_word() {
        assert_eq!(
            std::mem::size_of::<Condvar>(),
            2 * std::mem::size_of::<usize>()
        );
    }

    #[test]
    fn test_emulated_backend_timed_wait() {
        let mutex = Mutex::<EmulatedFutex>::with_backend();
        let condvar = Condvar::<EmulatedFutex>::with_backend();
        mutex.try_lock().unwrap();
        assert_eq!(
            condvar.timed_wait(&mutex, Duration::from_millis(20)),
            Err(LockError::TimedOut)
        );
        assert!(mutex.is_locked());
    }
}
