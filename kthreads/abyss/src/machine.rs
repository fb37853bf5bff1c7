//! The simulated uniprocessor.
//!
//! A [`Machine`] owns the state a real processor keeps in hardware: the
//! interrupt-enable bit, a tick clock, and a periodic timer device with a
//! single handler slot. All kernel threads of one boot are attached to the
//! same machine, which they reach through a thread-local slot ([`attach`],
//! [`current`]). Attaching machines per host thread lets several kernels boot
//! side by side in one process, which the test harness relies on.
//!
//! ## Time
//!
//! The clock does not follow the wall clock. It advances by exactly one tick
//! every time interrupts go from disabled to enabled, and leaps forward to the
//! next timer interrupt when the processor has nothing to run
//! ([`Machine::idle`]).
//!
//! After each tick, a due timer interrupt is delivered. The next firing is
//! scheduled first, then the handler runs with interrupts disabled, and the
//! interrupts are turned back on without another tick. The handler is
//! therefore allowed to yield the processor: the interrupted thread resumes
//! from the middle of its tick when it is scheduled again.
//!
//! ## Halting
//!
//! A halted machine stops ticking and never delivers another interrupt. The
//! kernel halts the machine when it shuts down, right before releasing every
//! host thread that still backs a kernel thread.

use crate::{interrupt::InterruptState, kprint::DebugFlags};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use std::{
    cell::RefCell,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

/// A timer interrupt handler.
pub type TimerHandler = Arc<dyn Fn() + Send + Sync>;

/// Default number of ticks between two timer interrupts.
pub const TIMER_INTERVAL: u64 = 500;

/// Configuration of the periodic timer device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerConfig {
    /// Number of ticks between two timer interrupts.
    pub interval: u64,
    /// Seed for randomizing the timer period.
    ///
    /// When set, each period is drawn uniformly from `1..=2 * interval`, which
    /// shuffles the preemption points of a run while keeping it reproducible.
    pub seed: Option<u64>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            interval: TIMER_INTERVAL,
            seed: None,
        }
    }
}

struct Timer {
    interval: u64,
    next_fire: AtomicU64,
    jitter: Mutex<Option<SmallRng>>,
    handler: Mutex<Option<TimerHandler>>,
}

impl Timer {
    fn next_period(&self) -> u64 {
        let mut jitter = self.jitter.lock().unwrap_or_else(PoisonError::into_inner);
        match jitter.as_mut() {
            Some(rng) => rng.gen_range(1..=2 * self.interval),
            None => self.interval,
        }
    }
}

/// The simulated uniprocessor.
pub struct Machine {
    interrupts: AtomicBool,
    clock: AtomicU64,
    idle_ticks: AtomicU64,
    halted: AtomicBool,
    timer: Timer,
}

impl Machine {
    /// Creates a new machine. Interrupts start disabled at tick 0.
    pub fn new(config: TimerConfig) -> Self {
        assert!(config.interval > 0, "The timer interval must be positive.");
        let timer = Timer {
            interval: config.interval,
            next_fire: AtomicU64::new(0),
            jitter: Mutex::new(config.seed.map(SmallRng::seed_from_u64)),
            handler: Mutex::new(None),
        };
        let first = timer.next_period();
        timer.next_fire.store(first, Ordering::SeqCst);
        Self {
            interrupts: AtomicBool::new(false),
            clock: AtomicU64::new(0),
            idle_ticks: AtomicU64::new(0),
            halted: AtomicBool::new(false),
            timer,
        }
    }

    /// Ticks elapsed since the machine was created.
    pub fn ticks(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    /// Ticks skipped over while the processor was idle.
    pub fn idle_ticks(&self) -> u64 {
        self.idle_ticks.load(Ordering::SeqCst)
    }

    /// The configured timer interval.
    pub fn timer_interval(&self) -> u64 {
        self.timer.interval
    }

    /// Tick at which the next timer interrupt is due.
    pub fn next_timer_interrupt(&self) -> u64 {
        self.timer.next_fire.load(Ordering::SeqCst)
    }

    /// The installed timer interrupt handler.
    pub fn timer_handler(&self) -> Option<TimerHandler> {
        self.timer
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs `handler` as the timer interrupt handler, returning the
    /// previous one.
    pub fn set_timer_handler(&self, handler: TimerHandler) -> Option<TimerHandler> {
        self.timer
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handler)
    }

    /// Reads the interrupt-enable bit.
    pub fn interrupt_state(&self) -> InterruptState {
        if self.interrupts.load(Ordering::SeqCst) {
            InterruptState::On
        } else {
            InterruptState::Off
        }
    }

    pub(crate) fn set_interrupt_state(&self, state: InterruptState) {
        self.interrupts
            .store(state == InterruptState::On, Ordering::SeqCst);
    }

    /// Whether the machine has been halted.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Halts the machine. No interrupt is delivered afterwards.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
        self.timer
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Advances the clock by one tick and delivers a due timer interrupt.
    ///
    /// Called when interrupts are turned back on.
    pub(crate) fn tick(&self) {
        if self.is_halted() {
            return;
        }
        let now = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        if now >= self.timer.next_fire.load(Ordering::SeqCst) {
            self.deliver_timer_interrupt(now);
        }
    }

    fn deliver_timer_interrupt(&self, now: u64) {
        let period = self.timer.next_period();
        self.timer.next_fire.store(now + period, Ordering::SeqCst);
        let handler = self
            .timer
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        debug!(DebugFlags::INTERRUPT, "timer interrupt at tick {now}");
        self.set_interrupt_state(InterruptState::Off);
        if let Some(handler) = handler {
            handler();
        }
        self.set_interrupt_state(InterruptState::On);
    }

    /// Leaps the clock to the tick right before the next timer interrupt.
    ///
    /// The processor must have interrupts disabled. Turning them back on
    /// afterwards lands exactly on the interrupt.
    pub fn idle(&self) {
        assert_eq!(
            self.interrupt_state(),
            InterruptState::Off,
            "The processor idles with interrupts enabled."
        );
        let target = self.next_timer_interrupt().saturating_sub(1);
        let now = self.ticks();
        if target > now {
            self.clock.store(target, Ordering::SeqCst);
            self.idle_ticks.fetch_add(target - now, Ordering::SeqCst);
        }
    }
}

thread_local! {
    static MACHINE: RefCell<Option<Arc<Machine>>> = const { RefCell::new(None) };
}

/// Attaches the calling host thread to `machine`, returning the machine it was
/// attached to before.
pub fn attach(machine: Arc<Machine>) -> Option<Arc<Machine>> {
    MACHINE.with(|slot| slot.borrow_mut().replace(machine))
}

/// Detaches the calling host thread from its machine.
pub fn detach() -> Option<Arc<Machine>> {
    MACHINE.with(|slot| slot.borrow_mut().take())
}

/// The machine the calling host thread is attached to, if any.
pub fn try_current() -> Option<Arc<Machine>> {
    MACHINE.with(|slot| slot.borrow().clone())
}

/// The machine the calling host thread is attached to.
///
/// # Panics
/// Panics when the thread is not attached to any machine, i.e. when it is not
/// a kernel thread.
#[track_caller]
pub fn current() -> Arc<Machine> {
    try_current().unwrap_or_else(|| {
        panic!(
            "Thread {:?} does not run on a machine.",
            std::thread::current().name().unwrap_or("<unnamed>")
        )
    })
}
