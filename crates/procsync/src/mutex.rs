//! Futex-based mutual exclusion
//!
//! The whole mutex is one 32-bit word with three legal values. The
//! uncontended lock and unlock are each a single atomic operation with no
//! kernel entry; only the contended path parks on the word. Acquisitions
//! that would otherwise block forever are bounded by a watchdog and surface
//! [`LockError::Deadlock`] instead of hanging.

use crate::futex::{Futex, NativeFutex, WaitOutcome};
use crate::{LockError, LockResult};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Unlocked, uncontended.
const FREE: u32 = 0;
/// Held by exactly one thread, nobody waiting.
const LOCKED: u32 = 1;
/// Held, and at least one thread is or was blocked on the word.
const CONTESTED: u32 = 2;

/// How long a watchdog-bounded acquisition may block before it is reported
/// as a probable deadlock.
///
/// Condition waits re-acquire their mutex under exactly this bound.
pub const DEADLOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra slack added to [`DEADLOCK_TIMEOUT`] by [`Mutex::lock`], so a
/// condition wait that runs into the watchdog while re-acquiring its mutex
/// reports the deadlock before an enclosing plain `lock` does.
pub const DEADLOCK_MARGIN: Duration = Duration::from_secs(2);

/// A mutex usable from memory shared between processes.
///
/// The state is a single 32-bit word (`#[repr(transparent)]` over
/// [`AtomicU32`]), so the structure can be placed in a mapped region and
/// driven concurrently from every process that can see it. No owner
/// identity is stored: any thread may unlock the mutex, and locking a mutex
/// the calling thread already holds deadlocks (reported by the watchdog,
/// never detected instantly).
///
/// Caller contract, not defended against: unlocking a mutex that is not
/// locked has unspecified behavior.
#[repr(transparent)]
pub struct Mutex<F: Futex = NativeFutex> {
    state: AtomicU32,
    // fn-pointer phantom: the backend is a set of free functions, and the
    // mutex must stay Send + Sync whatever marker type names them.
    _backend: PhantomData<fn() -> F>,
}

impl Mutex {
    /// Creates an unlocked mutex on the platform's native backend.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_backend()
    }
}

impl<F: Futex> Default for Mutex<F> {
    fn default() -> Self {
        Self::with_backend()
    }
}

impl<F: Futex> Mutex<F> {
    /// Creates an unlocked mutex on a specific wait/wake backend.
    #[must_use]
    pub const fn with_backend() -> Self {
        Self {
            state: AtomicU32::new(FREE),
            _backend: PhantomData,
        }
    }

    /// (Re)initializes the mutex to the unlocked state.
    ///
    /// Required before first use when the word lives in memory with unknown
    /// prior contents, such as a freshly mapped shared region. Any thread
    /// blocked on the mutex at the time of the call is abandoned.
    pub fn init(&self) {
        self.state.store(FREE, Ordering::Release);
    }

    /// Attempts to acquire the mutex without blocking.
    ///
    /// Succeeds only on the FREE -> LOCKED transition; otherwise returns
    /// [`LockError::Busy`] without touching the kernel.
    pub fn try_lock(&self) -> LockResult<()> {
        match self
            .state
            .compare_exchange(FREE, LOCKED, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => Ok(()),
            Err(_) => Err(LockError::Busy),
        }
    }

    /// Acquires the mutex, blocking at most `timeout`.
    ///
    /// Returns [`LockError::TimedOut`] if the lock could not be acquired in
    /// time. The bound covers the whole call: wakeups that lose the retry
    /// race do not restart the clock.
    pub fn timed_lock(&self, timeout: Duration) -> LockResult<()> {
        if self.try_lock().is_ok() {
            return Ok(());
        }
        self.lock_contested(Instant::now().checked_add(timeout))
    }

    /// Acquires the mutex, bounded by the built-in deadlock watchdog.
    ///
    /// Equivalent to [`timed_lock`](Mutex::timed_lock) with
    /// [`DEADLOCK_TIMEOUT`] + [`DEADLOCK_MARGIN`], except that expiry is
    /// reported as [`LockError::Deadlock`]: the wait was not bounded by the
    /// caller, so running out the clock means abnormal contention, an
    /// abandoned lock, or a genuine deadlock.
    pub fn lock(&self) -> LockResult<()> {
        self.lock_with_watchdog(DEADLOCK_TIMEOUT + DEADLOCK_MARGIN)
    }

    /// [`lock`](Mutex::lock) with an explicit watchdog duration.
    ///
    /// Tests use this to keep the deadlock heuristic fast; the semantics
    /// are identical.
    pub fn lock_with_watchdog(&self, watchdog: Duration) -> LockResult<()> {
        match self.timed_lock(watchdog) {
            Err(LockError::TimedOut) => Err(LockError::Deadlock),
            other => other,
        }
    }

    /// Releases the mutex.
    ///
    /// The LOCKED -> FREE transition returns without a kernel call; the
    /// CONTESTED -> FREE transition wakes one thread parked on the word.
    pub fn unlock(&self) {
        if self.state.swap(FREE, Ordering::Release) != LOCKED {
            F::wake_one(&self.state);
        }
    }

    /// Whether the mutex is currently held. A snapshot, stale immediately.
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != FREE
    }

    /// Contended acquisition loop, shared with the condition variable's
    /// re-acquisition step. `deadline` of `None` waits without bound.
    pub(crate) fn lock_contested(&self, deadline: Option<Instant>) -> LockResult<()> {
        loop {
            // Swapping in CONTESTED either acquires the lock (prior value
            // FREE) or records, before parking, that the holder owes a wake
            // on unlock (prior value LOCKED or CONTESTED).
            if self.state.swap(CONTESTED, Ordering::Acquire) == FREE {
                return Ok(());
            }

            let timeout = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(LockError::TimedOut);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            if let WaitOutcome::TimedOut = F::wait(&self.state, CONTESTED, timeout) {
                return Err(LockError::TimedOut);
            }
        }
    }

    /// Marks the word CONTESTED on behalf of a broadcasting condition
    /// variable. The caller must hold the mutex.
    pub(crate) fn mark_contested(&self) {
        self.state.store(CONTESTED, Ordering::Relaxed);
    }

    pub(crate) fn word(&self) -> &AtomicU32 {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::futex::EmulatedFutex;

    #[test]
    fn test_new_mutex_is_unlocked() {
        let mutex = Mutex::new();
        assert!(!mutex.is_locked());
    }

    #[test]
    fn test_try_lock_then_busy() {
        let mutex = Mutex::new();
        assert!(mutex.try_lock().is_ok());
        assert!(mutex.is_locked());
        assert_eq!(mutex.try_lock(), Err(LockError::Busy));
    }

    #[test]
    fn test_unlock_releases() {
        let mutex = Mutex::new();
        mutex.try_lock().unwrap();
        mutex.unlock();
        assert!(!mutex.is_locked());
        assert!(mutex.try_lock().is_ok());
    }

    #[test]
    fn test_init_resets_locked_mutex() {
        let mutex = Mutex::new();
        mutex.try_lock().unwrap();
        mutex.init();
        assert!(mutex.try_lock().is_ok());
    }

    #[test]
    fn test_timed_lock_uncontended() {
        let mutex = Mutex::new();
        assert!(mutex.timed_lock(Duration::from_millis(10)).is_ok());
    }

    // The lock is non-reentrant, so a single thread can drive the full
    // contended timeout path against itself.
    #[test]
    fn test_timed_lock_times_out_on_held_mutex() {
        let mutex = Mutex::new();
        mutex.try_lock().unwrap();
        assert_eq!(
            mutex.timed_lock(Duration::from_millis(20)),
            Err(LockError::TimedOut)
        );
    }

    #[test]
    fn test_watchdog_reports_deadlock() {
        let mutex = Mutex::new();
        mutex.try_lock().unwrap();
        assert_eq!(
            mutex.lock_with_watchdog(Duration::from_millis(20)),
            Err(LockError::Deadlock)
        );
    }

    #[test]
    fn test_emulated_backend_same_protocol() {
        let mutex = Mutex::<EmulatedFutex>::with_backend();
        mutex.try_lock().unwrap();
        assert_eq!(mutex.try_lock(), Err(LockError::Busy));
        assert_eq!(
            mutex.timed_lock(Duration::from_millis(20)),
            Err(LockError::TimedOut)
        );
        mutex.unlock();
        assert!(mutex.try_lock().is_ok());
    }

    #[test]
    fn test_word_is_four_bytes() {
        assert_eq!(std::mem::size_of::<Mutex>(), 4);
        assert_eq!(std::mem::align_of::<Mutex>(), 4);
    }
}
