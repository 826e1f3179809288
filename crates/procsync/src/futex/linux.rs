//! Linux `futex(2)` backend

use super::{Futex, WaitOutcome};
use std::ptr;
use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Backend that issues raw `SYS_futex` calls.
///
/// Uses the shared (non-private) futex opcodes, so the words keep working
/// when placed in memory mapped by more than one process. `FUTEX_WAIT` takes
/// a relative timeout, which is what the lock loops hand it.
pub enum LinuxFutex {}

impl Futex for LinuxFutex {
    fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
        let ts = timeout.map(timespec_from);
        let ts_ptr = ts
            .as_ref()
            .map_or(ptr::null(), |ts| ts as *const libc::timespec);

        let rc = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word.as_ptr(),
                libc::FUTEX_WAIT,
                expected as libc::c_uint,
                ts_ptr,
            )
        };
        if rc == 0 {
            return WaitOutcome::Woken;
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ETIMEDOUT) => WaitOutcome::TimedOut,
            // EAGAIN: the word no longer held `expected` when the kernel
            // looked. EINTR: a signal cut the sleep short. Either way the
            // caller re-checks state and decides whether to wait again.
            _ => WaitOutcome::Woken,
        }
    }

    fn wake_one(word: &AtomicU32) {
        let _ = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word.as_ptr(),
                libc::FUTEX_WAKE,
                1 as libc::c_uint,
            )
        };
    }

    fn requeue(from: &AtomicU32, to: &AtomicU32, wake: u32, limit: u32) {
        // The requeue limit travels in the timeout argument slot.
        let _ = unsafe {
            libc::syscall(
                libc::SYS_futex,
                from.as_ptr(),
                libc::FUTEX_REQUEUE,
                wake as libc::c_uint,
                limit as usize as *const libc::timespec,
                to.as_ptr(),
            )
        };
    }
}

fn timespec_from(timeout: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    }
}
