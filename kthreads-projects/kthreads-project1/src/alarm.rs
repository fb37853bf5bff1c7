//! # Alarm
//!
//! A thread often has to wait for time to pass: a driver polling a device, a
//! retry after a back-off, a bounded wait on a condition. Spinning on
//! [`timer::now`] would burn the only processor of the machine, so the kernel
//! offers an [`Alarm`] instead: the thread parks, and the timer interrupt
//! handler wakes it up once its deadline passed.
//!
//! ## Deadlines
//!
//! [`Alarm::wait_until`] takes a duration `x` in ticks and computes the
//! deadline `now + x`. The sleeping threads are kept in a queue ordered by
//! deadline (ties broken by arrival order). On every timer interrupt,
//! [`Alarm::timer_interrupt`] wakes **every** thread whose deadline passed,
//! in deadline order, before giving the processor away. Waking only the
//! first expired thread would be a bug: the others would oversleep by at
//! least a full timer period, and forever if nothing else ever happens.
//!
//! A thread never resumes before its deadline. It resumes at the first timer
//! interrupt at or after the deadline, plus however long the scheduler takes
//! to pick it.
//!
//! ## Implementation Requirements
//!
//! Checking the clock, inserting the thread in the queue and parking must not
//! be split by a timer interrupt: an interrupt landing in between could run
//! the handler before the thread is registered, and the thread would then
//! sleep one period too long. Everything happens with interrupts disabled.
//!
//! Creating an [`Alarm`] installs its handler as the timer interrupt handler
//! of the machine, in front of the handler that was there. Each interrupt
//! first wakes the expired sleepers of the alarm, then runs the previous
//! handler: the expiry pass of an older alarm, and in the end the scheduler's
//! time slicing. Several alarms can live at once, and once an alarm is
//! dropped its handler only forwards to the previous one.
//!
//! [`timer::now`]: kthreads::timer::now
use crate::sleeper::{Sleeper, WakeReason};
use kthreads::{
    DebugFlags, InterruptGuard,
    sync::SpinLock,
    thread::Current,
    timer::{self, TimerHandler},
};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Position of a sleeping thread in the alarm queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct AlarmKey {
    deadline: u64,
    seq: u64,
}

/// Uses the hardware timer to provide preemption, and to allow threads to
/// sleep until a certain time.
pub struct Alarm {
    sleepers: SpinLock<BTreeMap<AlarmKey, Sleeper>>,
    seq: AtomicU64,
    /// The timer interrupt handler this alarm was installed in front of.
    previous: TimerHandler,
}

impl Alarm {
    /// Creates an alarm and makes it the timer interrupt handler.
    pub fn new() -> Arc<Self> {
        let _guard = InterruptGuard::new();
        let previous = timer::interrupt_handler();
        let alarm = Arc::new(Self {
            sleepers: SpinLock::new(BTreeMap::new()),
            seq: AtomicU64::new(0),
            previous: previous.clone(),
        });
        let weak = Arc::downgrade(&alarm);
        timer::set_interrupt_handler(move || match weak.upgrade() {
            Some(alarm) => alarm.timer_interrupt(),
            None => previous(),
        });
        alarm
    }

    /// The timer interrupt handler.
    ///
    /// Wakes every thread whose deadline passed, then runs the handler this
    /// alarm was installed in front of. That chain ends with the scheduler's
    /// [`timer_tick`], which gives the processor away when the interrupted
    /// thread used up its time slice. Called with interrupts disabled.
    ///
    /// [`timer_tick`]: kthreads::thread::scheduler::Scheduler::timer_tick
    pub fn timer_interrupt(&self) {
        let now = timer::now();
        let mut sleepers = self.sleepers.lock();
        let pending = sleepers.split_off(&AlarmKey {
            deadline: now + 1,
            seq: 0,
        });
        let expired = std::mem::replace(&mut *sleepers, pending);
        sleepers.unlock();

        for (key, sleeper) in expired {
            if sleeper.wake(WakeReason::Timeout) {
                kthreads::debug!(
                    DebugFlags::ALARM,
                    "wake sleeper with deadline {} at {}",
                    key.deadline,
                    now
                );
            }
        }
        (self.previous)();
    }

    /// Puts the current thread to sleep for at least `x` ticks.
    ///
    /// The thread is woken up by the first timer interrupt at or after
    /// `now + x`. A non-positive `x` returns immediately.
    pub fn wait_until(&self, x: i64) {
        if x <= 0 {
            return;
        }
        let _guard = InterruptGuard::new();
        let deadline = timer::now() + x as u64;
        kthreads::debug!(
            DebugFlags::ALARM,
            "{} sleeps until {}",
            Current::name(),
            deadline
        );
        let sleeper = Sleeper::new();
        Current::park_with(|handle| {
            sleeper.register(handle);
            self.arm(deadline, sleeper.clone());
        });
    }

    /// Number of threads waiting for their deadline.
    pub fn pending(&self) -> usize {
        let sleepers = self.sleepers.lock();
        let pending = sleepers.len();
        sleepers.unlock();
        pending
    }

    /// Registers `sleeper` to be woken at `deadline`.
    pub(crate) fn arm(&self, deadline: u64, sleeper: Sleeper) -> AlarmKey {
        let key = AlarmKey {
            deadline,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
        };
        let mut sleepers = self.sleepers.lock();
        sleepers.insert(key, sleeper);
        sleepers.unlock();
        key
    }

    /// Withdraws a registration, returning whether it was still pending.
    pub(crate) fn disarm(&self, key: AlarmKey) -> bool {
        let mut sleepers = self.sleepers.lock();
        let removed = sleepers.remove(&key).is_some();
        sleepers.unlock();
        removed
    }
}
