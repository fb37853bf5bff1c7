//! # Condition Variable
//!
//! A condition variable lets a thread holding a [`Lock`] wait until some
//! condition on the protected state becomes true, and lets another thread
//! holding the same lock announce that it may have. It is always used in a
//! loop:
//!
//! ```ignore
//! lock.acquire();
//! while !ready() {
//!     cond.sleep();
//! }
//! // ... the condition holds, and the lock is held ...
//! lock.release();
//! ```
//!
//! [`Condition2`] is built directly from the interrupt gate and the raw
//! thread-state API, without any help from a semaphore.
//!
//! ## Lifecycle of a waiter
//!
//! A thread calling [`Condition2::sleep`] goes through three states:
//!
//! 1. **Queued**: it released the lock and sits at the tail of the wait
//!    queue.
//! 2. **Woken**: [`Condition2::wake`] (or [`Condition2::wake_all`]) removed
//!    it from the queue and made it ready. It does not hold the lock yet, and
//!    competes for it like anybody else.
//! 3. **Returned**: it reacquired the lock, and `sleep` returns.
//!
//! A thread is therefore never in the wait queue while holding the lock, and
//! always holds the lock again when `sleep` returns.
//!
//! ## Atomic release-and-sleep
//!
//! Releasing the lock and entering the wait queue must look like a single
//! step to every other thread. If a timer interrupt slipped in between, a
//! thread could acquire the freed lock, change the condition, and call
//! [`Condition2::wake`] on a queue the sleeper did not enter yet: the wake-up
//! would be lost, and the sleeper would sleep forever. Both steps thus happen
//! with interrupts disabled, and the thread parks before they are enabled
//! again.
//!
//! ## Bounded waits
//!
//! [`Condition2::sleep_for`] additionally arms an [`Alarm`]. The first of a
//! wake-up or the deadline releases the thread, which then withdraws itself
//! from the other structure before returning.
//!
//! [`Lock`]: kthreads::sync::Lock
use crate::{
    alarm::Alarm,
    sleeper::{Sleeper, WakeReason},
};
use kthreads::{
    DebugFlags, InterruptGuard,
    sync::{Lock, SpinLock},
    thread::Current,
    timer,
};
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

struct Waiter {
    id: u64,
    sleeper: Sleeper,
}

/// A condition variable that disables interrupts for synchronization.
///
/// Every method must be called with the associated [`Lock`] held by the
/// current thread.
pub struct Condition2 {
    lock: Arc<Lock>,
    waiters: SpinLock<VecDeque<Waiter>>,
    next_id: AtomicU64,
}

impl Condition2 {
    /// Allocates a new condition variable associated with `lock`.
    pub fn new(lock: Arc<Lock>) -> Self {
        Self {
            lock,
            waiters: SpinLock::new(VecDeque::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// The lock associated with this condition variable.
    pub fn lock(&self) -> &Arc<Lock> {
        &self.lock
    }

    #[track_caller]
    fn assert_held(&self, op: &str) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "Thread {:?} calls Condition2::{op} without holding the lock.",
            Current::name()
        );
    }

    fn enqueue(&self, sleeper: Sleeper) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut waiters = self.waiters.lock();
        waiters.push_back(Waiter { id, sleeper });
        waiters.unlock();
        id
    }

    fn withdraw(&self, id: u64) {
        let mut waiters = self.waiters.lock();
        waiters.retain(|waiter| waiter.id != id);
        waiters.unlock();
    }

    /// Atomically releases the associated lock and goes to sleep on this
    /// condition variable until another thread wakes it using
    /// [`Self::wake`]. The current thread must hold the associated lock. The
    /// thread will automatically reacquire the lock before `sleep` returns.
    #[track_caller]
    pub fn sleep(&self) {
        self.assert_held("sleep");
        let guard = InterruptGuard::new();
        self.lock.release();
        let sleeper = Sleeper::new();
        Current::park_with(|handle| {
            sleeper.register(handle);
            self.enqueue(sleeper.clone());
        });
        drop(guard);
        self.lock.acquire();
    }

    /// Like [`Self::sleep`], but also wakes up once `timeout` ticks passed
    /// according to `alarm`.
    ///
    /// Returns `true` when woken by [`Self::wake`] or [`Self::wake_all`], and
    /// `false` when the timeout expired first. A non-positive `timeout`
    /// returns `false` immediately, without releasing the lock.
    #[track_caller]
    pub fn sleep_for(&self, alarm: &Alarm, timeout: i64) -> bool {
        self.assert_held("sleep_for");
        if timeout <= 0 {
            return false;
        }
        let guard = InterruptGuard::new();
        self.lock.release();
        let deadline = timer::now() + timeout as u64;
        let sleeper = Sleeper::new();
        let mut registration = None;
        Current::park_with(|handle| {
            sleeper.register(handle);
            let id = self.enqueue(sleeper.clone());
            let key = alarm.arm(deadline, sleeper.clone());
            registration = Some((id, key));
        });
        if let Some((id, key)) = registration {
            self.withdraw(id);
            alarm.disarm(key);
        }
        let signalled = sleeper.woken_by() == Some(WakeReason::Signal);
        kthreads::debug!(
            DebugFlags::CONDITION,
            "{} woken by {:?}",
            Current::name(),
            sleeper.woken_by()
        );
        drop(guard);
        self.lock.acquire();
        signalled
    }

    /// Wakes up at most one thread sleeping on this condition variable, the
    /// one that has been waiting the longest. The current thread must hold the
    /// associated lock.
    #[track_caller]
    pub fn wake(&self) {
        self.assert_held("wake");
        let _guard = InterruptGuard::new();
        loop {
            let mut waiters = self.waiters.lock();
            let waiter = waiters.pop_front();
            waiters.unlock();
            let Some(waiter) = waiter else {
                break;
            };
            // A waiter whose alarm fired first is already gone.
            if waiter.sleeper.wake(WakeReason::Signal) {
                break;
            }
        }
    }

    /// Wakes up all threads sleeping on this condition variable, in the order
    /// they went to sleep. The current thread must hold the associated lock.
    #[track_caller]
    pub fn wake_all(&self) {
        self.assert_held("wake_all");
        let _guard = InterruptGuard::new();
        let mut waiters = self.waiters.lock();
        let waiters_ = std::mem::take(&mut *waiters);
        waiters.unlock();
        let woken = waiters_
            .into_iter()
            .filter(|waiter| waiter.sleeper.wake(WakeReason::Signal))
            .count();
        kthreads::debug!(DebugFlags::CONDITION, "wake_all woke {woken} threads");
    }

    /// Number of threads sleeping on this condition variable.
    pub fn waiters(&self) -> usize {
        let waiters = self.waiters.lock();
        let len = waiters.len();
        waiters.unlock();
        len
    }
}
