//! Transaction locking.
//!
//! A multi-primitive device transaction (reset, select, command, power,
//! read) must reach the adapter without interleaving from other threads.
//! The transaction lock is re-entrant so the operation wrappers can take it
//! unconditionally while a caller holds it across the whole sequence.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    count: usize,
}

/// Re-entrant critical-section lock.
///
/// Acquisition blocks without bound; the lock protects a single terminal
/// resource, so there is no lock ordering to deadlock against.
#[derive(Debug, Default)]
pub struct ExclusiveLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl ExclusiveLock {
    /// Creates an unheld lock.
    pub fn new() -> Self {
        ExclusiveLock::default()
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the lock, blocking while another thread holds it. Re-entry
    /// by the holding thread only bumps a counter.
    pub fn acquire(&self) {
        let me = thread::current().id();
        let mut state = self.state();
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.count = 1;
                    return;
                }
                Some(owner) if owner == me => {
                    state.count += 1;
                    return;
                }
                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Releases one claim; the last release wakes a waiter.
    ///
    /// Releasing a lock this thread does not hold is a caller bug and is
    /// ignored beyond a log line.
    pub fn release(&self) {
        let me = thread::current().id();
        let mut state = self.state();
        if state.owner != Some(me) {
            log::error!("exclusive lock released by a thread that does not hold it");
            return;
        }
        state.count -= 1;
        if state.count == 0 {
            state.owner = None;
            drop(state);
            self.released.notify_one();
        }
    }

    /// Claims the lock for the lifetime of the returned guard.
    pub fn guard(&self) -> ExclusiveGuard<'_> {
        self.acquire();
        ExclusiveGuard { lock: self }
    }
}

/// RAII claim on an [`ExclusiveLock`].
#[must_use = "the claim ends when the guard drops"]
pub struct ExclusiveGuard<'a> {
    lock: &'a ExclusiveLock,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
