//! # Semaphore.
//!
//! A **semaphore** maintains an internal count representing the number of
//! available "permits". [`Semaphore::wait`] takes a permit, sleeping while
//! none is left, and [`Semaphore::signal`] gives one back.
//!
//! A semaphore initialized with zero permits serves as an event signal: the
//! waiter sleeps until another thread signals. Waiting `n` times on such a
//! semaphore is a completion barrier for `n` signalling threads.
//!
//! Permits are handed over directly: when threads are waiting,
//! [`Semaphore::signal`] wakes the longest waiting one and gives it the permit
//! instead of incrementing the count.

use super::{SpinLock, WouldBlock};
use crate::thread::{Current, ParkHandle};
use abyss::interrupt::InterruptGuard;
use std::collections::VecDeque;

struct SemaphoreState {
    permits: usize,
    waiters: VecDeque<ParkHandle>,
}

/// Counting semaphore.
pub struct Semaphore {
    state: SpinLock<SemaphoreState>,
}

impl Semaphore {
    /// Creates a new semaphore initialized with a specified number of permits.
    pub const fn new(permits: usize) -> Self {
        Self {
            state: SpinLock::new(SemaphoreState {
                permits,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Waits until a permit becomes available and then acquires it.
    pub fn wait(&self) {
        let _guard = InterruptGuard::new();
        let mut state = self.state.lock();
        if state.permits > 0 {
            state.permits -= 1;
            state.unlock();
            return;
        }
        state.unlock();
        Current::park_with(|handle| {
            let mut state = self.state.lock();
            state.waiters.push_back(handle);
            state.unlock();
        });
    }

    /// Acquires a permit if one is available.
    ///
    /// # Errors
    /// Returns [`WouldBlock`] when no permit is left.
    pub fn try_wait(&self) -> Result<(), WouldBlock> {
        let mut state = self.state.lock();
        let result = if state.permits > 0 {
            state.permits -= 1;
            Ok(())
        } else {
            Err(WouldBlock)
        };
        state.unlock();
        result
    }

    /// Releases a permit back to the semaphore.
    ///
    /// If any threads are blocked in [`wait`], the longest waiting one is
    /// woken up with the permit.
    ///
    /// [`wait`]: Self::wait
    pub fn signal(&self) {
        let _guard = InterruptGuard::new();
        let mut state = self.state.lock();
        let waiter = state.waiters.pop_front();
        if waiter.is_none() {
            state.permits += 1;
        }
        state.unlock();
        if let Some(waiter) = waiter {
            waiter.unpark();
        }
    }

    /// Number of available permits.
    pub fn permits(&self) -> usize {
        let state = self.state.lock();
        let permits = state.permits;
        state.unlock();
        permits
    }
}
