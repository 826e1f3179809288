//! Process-shared synchronization primitives
//!
//! This crate provides a mutex and a condition variable built directly on a
//! futex-style wait/wake mechanism:
//! - A three-state mutex word (free / locked / contested) whose uncontended
//!   lock and unlock are a single atomic operation with no kernel entry
//! - A condition variable (sequence counter + lazily bound mutex) whose
//!   broadcast requeues waiters onto the mutex instead of waking a herd
//! - A heuristic deadlock watchdog that bounds every otherwise-unbounded
//!   acquisition and reports [`LockError::Deadlock`] instead of hanging
//!
//! All state lives in plain integer words with no per-process identity, so
//! both primitives work between independent processes sharing a mapped
//! memory region, not just between threads of one process.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod condvar;
pub mod futex;
pub mod guard;
pub mod mutex;

pub use condvar::Condvar;
pub use guard::MutexGuard;
pub use mutex::{Mutex, DEADLOCK_MARGIN, DEADLOCK_TIMEOUT};

/// Lock acquisition errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// The mutex was already held and the caller asked not to block
    #[error("mutex is busy")]
    Busy,

    /// The caller-specified wait duration elapsed with no qualifying event
    #[error("operation timed out")]
    TimedOut,

    /// The internal deadlock watchdog expired while acquiring a mutex.
    ///
    /// This is a heuristic signal of abnormal contention (a genuine deadlock,
    /// an abandoned lock, or an unusually slow critical section), not a
    /// verified cycle-detection result.
    #[error("probable deadlock: mutex held longer than the watchdog duration")]
    Deadlock,
}

/// Result of a lock or wait operation
pub type LockResult<T> = Result<T, LockError>;
