//! Blocking lock.
//!
//! A [`Lock`] is a binary ownership token. Unlike [`SpinLock`], a thread that
//! finds the lock held goes to sleep until the holder releases it, and a thread
//! holding a [`Lock`] may block on other things (this is what condition
//! variables are built upon).
//!
//! Ownership is handed over directly: [`Lock::release`] makes the longest
//! waiting thread the new holder before waking it up, so no late comer can
//! barge in between.
//!
//! [`SpinLock`]: super::SpinLock

use super::{SpinLock, WouldBlock};
use crate::thread::{Current, ParkHandle};
use abyss::{DebugFlags, interrupt::InterruptGuard};
use std::collections::VecDeque;

struct LockState {
    holder: Option<u64>,
    waiters: VecDeque<ParkHandle>,
}

/// A blocking lock with FIFO hand-off.
pub struct Lock {
    state: SpinLock<LockState>,
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    /// Creates a lock nobody holds.
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(LockState {
                holder: None,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Acquires the lock, sleeping until it becomes available.
    ///
    /// # Panics
    /// Panics when the current thread already holds the lock.
    pub fn acquire(&self) {
        let me = Current::get_tid();
        let _guard = InterruptGuard::new();
        let mut state = self.state.lock();
        let holder = state.holder;
        if holder.is_none() {
            state.holder = Some(me);
        }
        state.unlock();
        match holder {
            None => return,
            Some(holder) => assert_ne!(holder, me, "Thread {me} acquires a lock it holds."),
        }

        abyss::debug!(DebugFlags::SYNC, "thread {me} waits for a lock");
        Current::park_with(|handle| {
            let mut state = self.state.lock();
            state.waiters.push_back(handle);
            state.unlock();
        });
        debug_assert!(self.is_held_by_current_thread());
    }

    /// Acquires the lock if nobody holds it.
    ///
    /// # Errors
    /// Returns [`WouldBlock`] when the lock is held, by any thread.
    pub fn try_acquire(&self) -> Result<(), WouldBlock> {
        let me = Current::get_tid();
        let mut state = self.state.lock();
        let result = if state.holder.is_none() {
            state.holder = Some(me);
            Ok(())
        } else {
            Err(WouldBlock)
        };
        state.unlock();
        result
    }

    /// Releases the lock, handing it to the longest waiting thread if any.
    ///
    /// # Panics
    /// Panics when the current thread does not hold the lock.
    pub fn release(&self) {
        let me = Current::get_tid();
        let _guard = InterruptGuard::new();
        let mut state = self.state.lock();
        let held = state.holder == Some(me);
        let next = if held { state.waiters.pop_front() } else { None };
        if held {
            state.holder = next.as_ref().map(ParkHandle::tid);
        }
        state.unlock();
        assert!(held, "Thread {me} releases a lock it does not hold.");
        if let Some(next) = next {
            next.unpark();
        }
    }

    /// Whether the current thread holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        let me = Current::get_tid();
        let state = self.state.lock();
        let held = state.holder == Some(me);
        state.unlock();
        held
    }
}
