//! Futex-style wait/wake capability
//!
//! The primitives in this crate never park threads themselves; they delegate
//! to a [`Futex`] backend keyed by the address of a 32-bit word. On Linux the
//! backend is the real `futex(2)` syscall; everywhere else (and wherever a
//! test wants a pure-userspace queue) an emulation built from condition
//! variables satisfies the same interface.

mod emulated;
#[cfg(target_os = "linux")]
mod linux;

pub use emulated::EmulatedFutex;
#[cfg(target_os = "linux")]
pub use linux::LinuxFutex;

use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Why a [`Futex::wait`] call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The thread was woken, the word no longer held the expected value, or
    /// the sleep was interrupted. The caller must re-check its state.
    Woken,
    /// The timeout elapsed before any wake arrived.
    TimedOut,
}

/// Kernel-style wait queue keyed by the address of a 32-bit word.
///
/// Implementations carry no state of their own; the word is the only shared
/// state and the queue lives in the kernel (or the emulation's table).
pub trait Futex {
    /// Blocks the calling thread while `word` still holds `expected`.
    ///
    /// The value comparison and the enqueue are atomic with respect to
    /// [`wake_one`](Futex::wake_one): a wake issued after the word changes
    /// can never be missed by a thread that observed the old value. Spurious
    /// returns are allowed; callers loop and re-check.
    fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome;

    /// Wakes at most one thread blocked on `word`. Harmless when nobody is.
    fn wake_one(word: &AtomicU32);

    /// Wakes `wake` threads blocked on `from` and moves up to `limit` of the
    /// remaining ones onto the queue for `to` without waking them.
    fn requeue(from: &AtomicU32, to: &AtomicU32, wake: u32, limit: u32);
}

/// The platform's default backend.
#[cfg(target_os = "linux")]
pub type NativeFutex = LinuxFutex;

/// The platform's default backend.
#[cfg(not(target_os = "linux"))]
pub type NativeFutex = EmulatedFutex;
