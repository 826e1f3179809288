//! Portable wait/wake emulation
//!
//! Approximates the kernel futex interface with an address-keyed table of
//! condition variables. Unlike the syscall backend this can only coordinate
//! threads of one process, which is exactly what non-Linux targets and the
//! counting backends in tests need.

use super::{Futex, WaitOutcome};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One parking spot per word address.
struct Bucket {
    /// Number of threads currently parked; guarded recheck happens under
    /// this lock so wakes cannot slip between the value check and the sleep.
    waiters: Mutex<u32>,
    cond: Condvar,
}

/// Buckets are never removed: one small entry per distinct word address, and
/// removal would race a waiter that has fetched the bucket but not yet
/// parked on it.
static TABLE: Lazy<Mutex<FxHashMap<usize, Arc<Bucket>>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

fn bucket(addr: usize) -> Arc<Bucket> {
    TABLE
        .lock()
        .entry(addr)
        .or_insert_with(|| {
            Arc::new(Bucket {
                waiters: Mutex::new(0),
                cond: Condvar::new(),
            })
        })
        .clone()
}

fn existing_bucket(addr: usize) -> Option<Arc<Bucket>> {
    TABLE.lock().get(&addr).cloned()
}

/// Condition-variable emulation of the futex interface.
pub enum EmulatedFutex {}

impl Futex for EmulatedFutex {
    fn wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
        let bucket = bucket(word.as_ptr() as usize);
        let mut waiters = bucket.waiters.lock();

        // The bucket lock spans this check and the sleep below, and wakers
        // notify under the same lock, so a wake issued after the word
        // changes cannot be lost.
        if word.load(Ordering::SeqCst) != expected {
            return WaitOutcome::Woken;
        }

        *waiters += 1;
        let outcome = match timeout {
            Some(timeout) => {
                if bucket.cond.wait_for(&mut waiters, timeout).timed_out() {
                    WaitOutcome::TimedOut
                } else {
                    WaitOutcome::Woken
                }
            }
            None => {
                bucket.cond.wait(&mut waiters);
                WaitOutcome::Woken
            }
        };
        *waiters -= 1;
        outcome
    }

    fn wake_one(word: &AtomicU32) {
        // No bucket means nobody ever parked on this word.
        if let Some(bucket) = existing_bucket(word.as_ptr() as usize) {
            let _waiters = bucket.waiters.lock();
            bucket.cond.notify_one();
        }
    }

    fn requeue(from: &AtomicU32, _to: &AtomicU32, _wake: u32, _limit: u32) {
        // Parked threads cannot be moved between condition variables, so
        // everything on `from` is woken and the losers re-contend on the
        // target word. The herd is the price of portability.
        if let Some(bucket) = existing_bucket(from.as_ptr() as usize) {
            let _waiters = bucket.waiters.lock();
            bucket.cond.notify_all();
        }
    }
}
