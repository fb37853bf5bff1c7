//! # kthreads: a uniprocessor kernel threading substrate
//!
//! **kthreads** simulates the threading core of an operating system kernel: a
//! single processor, a timer that interrupts it periodically, an interrupt
//! gate that keeps those interrupts out of critical sections, and a scheduler
//! that decides which kernel thread runs next.
//!
//! On top of this substrate, every higher-level synchronization primitive is
//! built from only two things:
//!
//! - the interrupt gate ([`InterruptGuard`], or the raw
//!   [`interrupt::disable`] / [`interrupt::restore`] pair), and
//! - the raw thread-state API: [`Current::park_with`], [`ParkHandle::unpark`]
//!   and [`Current::yield_now`].
//!
//! The blocking [`Lock`] and [`Semaphore`] of [`sync`] are built this way, and
//! so are the primitives of the projects.
//!
//! ## Running a kernel
//!
//! A kernel is booted with [`SystemConfigurationBuilder::boot`], which runs the
//! given closure as the `main` thread and returns once the kernel halts. The
//! kernel halts when `main` returns, when any thread panics (the panic is
//! raised again by `boot`), or when every thread is blocked for good
//! ([`KernelError::Deadlock`]).
//!
//! ```ignore
//! SystemConfigurationBuilder::new()
//!     .set_scheduler(Fifo::new())
//!     .boot(|| {
//!         let handle = ThreadBuilder::new("child").spawn(|| println!("child"));
//!         handle.join();
//!     })
//!     .unwrap();
//! ```
//!
//! Several kernels may run at the same time in one process; each boot gets
//! its own machine.
//!
//! ## Implementation Notes
//!
//! Kernel threads are backed by host threads, but only the thread that owns
//! the simulated processor ever runs kernel code. The others sleep until the
//! processor is handed to them. Timer interrupts are only delivered when a
//! thread turns interrupts back on, so a thread that spins without ever
//! touching the interrupt gate is never preempted. **Use
//! [`Current::yield_now`] instead of busy waiting.**
//!
//! ## Debugging
//!
//! Kernel traces are grouped in categories ([`DebugFlags`]) and turned on
//! either through [`SystemConfigurationBuilder::debug_flags`] or the
//! `KTHREADS_DEBUG` environment variable:
//!
//! ```bash
//! $ KTHREADS_DEBUG=ta cargo run -- alarm::wait_short
//! ```
//!
//! prints thread and alarm traces while running the `alarm::wait_short`
//! test. `KTHREADS_SEED=<n>` randomizes the timer period with seed `n`, and
//! `KTHREADS_QUIET=1` silences informational messages.
//!
//! ### Selectively run tests
//!
//! You can run one or more specific test cases by passing their names as
//! arguments to the test runner. For example:
//!
//! ```bash
//! $ cargo run -- communicator::listener_first boat::two_children
//! ```
//!
//! Every test case is also a regular `#[test]`, so `cargo test` runs them
//! all, each one on a fresh kernel.
//!
//! [`InterruptGuard`]: abyss::interrupt::InterruptGuard
//! [`Current::park_with`]: thread::Current::park_with
//! [`Current::yield_now`]: thread::Current::yield_now
//! [`ParkHandle::unpark`]: thread::ParkHandle::unpark
//! [`Lock`]: sync::Lock
//! [`Semaphore`]: sync::Semaphore
#![warn(missing_docs)]

mod kernel;

pub mod sync;
pub mod thread;
pub mod timer;

pub use abyss::{
    DebugFlags, debug, info,
    interrupt::{self, InterruptGuard, InterruptState},
    print, println, warning,
};
pub use kernel::Statistics;

use abyss::machine::{Machine, TimerConfig};
use std::{
    panic::AssertUnwindSafe,
    sync::{Arc, atomic::Ordering},
};
use thread::scheduler::{RoundRobin, Scheduler};

/// Enum representing errors that can occur during a kernel operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KernelError {
    /// Invalid argument, such as an unknown thread id.
    InvalidArgument,
    /// Every remaining thread is blocked and nothing can wake them.
    Deadlock,
}

impl std::fmt::Display for KernelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelError::InvalidArgument => write!(f, "invalid argument"),
            KernelError::Deadlock => write!(f, "deadlock"),
        }
    }
}

impl std::error::Error for KernelError {}

/// Default number of consecutive idle timer interrupts after which the kernel
/// declares a deadlock.
pub const IDLE_LIMIT: u64 = 100_000;

/// A builder for system configuration settings.
///
/// The [`SystemConfigurationBuilder`] struct provides an interface for
/// configuring a kernel before booting it: scheduling policy, timer device,
/// deadlock detection and console output.
///
/// [`SystemConfigurationBuilder::new`] starts from the defaults, overridden
/// by the environment:
///
/// | Variable          | Effect                                         |
/// |-------------------|------------------------------------------------|
/// | `KTHREADS_DEBUG`  | debug categories, see [`DebugFlags::from_letters`] |
/// | `KTHREADS_SEED`   | timer seed, see [`Self::timer_seed`]           |
/// | `KTHREADS_QUIET`  | any value but `0` silences `info!`/`warning!`  |
pub struct SystemConfigurationBuilder {
    scheduler: Option<Arc<dyn Scheduler>>,
    timer: TimerConfig,
    idle_limit: u64,
    debug_flags: DebugFlags,
    quiet: bool,
}

impl Default for SystemConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemConfigurationBuilder {
    /// Creates a builder with the default settings and the environment
    /// overrides.
    pub fn new() -> Self {
        let mut builder = Self {
            scheduler: None,
            timer: TimerConfig::default(),
            idle_limit: IDLE_LIMIT,
            debug_flags: DebugFlags::empty(),
            quiet: false,
        };
        if let Ok(letters) = std::env::var("KTHREADS_DEBUG") {
            builder.debug_flags = DebugFlags::from_letters(&letters);
        }
        if let Ok(seed) = std::env::var("KTHREADS_SEED") {
            match seed.parse() {
                Ok(seed) => builder.timer.seed = Some(seed),
                Err(e) => warning!("Ignoring KTHREADS_SEED={seed:?}: {e}."),
            }
        }
        if let Ok(quiet) = std::env::var("KTHREADS_QUIET") {
            builder.quiet = quiet != "0";
        }
        builder
    }

    /// Sets the scheduler of the kernel.
    ///
    /// Defaults to a [`RoundRobin`] scheduler preempting the running thread on
    /// every timer interrupt.
    pub fn set_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// Sets the number of ticks between two timer interrupts.
    pub fn timer_interval(mut self, ticks: u64) -> Self {
        self.timer.interval = ticks;
        self
    }

    /// Randomizes the timer period with `seed`.
    ///
    /// Each period is drawn from `1..=2 * interval`. Runs with the same seed
    /// see the same interleaving.
    pub fn timer_seed(mut self, seed: u64) -> Self {
        self.timer.seed = Some(seed);
        self
    }

    /// Sets how many consecutive idle timer interrupts are tolerated before
    /// the kernel declares a deadlock.
    pub fn idle_limit(mut self, interrupts: u64) -> Self {
        self.idle_limit = interrupts;
        self
    }

    /// Sets the traced debug categories.
    pub fn debug_flags(mut self, flags: DebugFlags) -> Self {
        self.debug_flags = flags;
        self
    }

    /// Silences `info!` and `warning!` messages.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Boots a kernel and runs `main` as its first thread.
    ///
    /// Returns once the kernel halted. If any kernel thread panicked, the
    /// panic is resumed on the caller.
    ///
    /// # Errors
    /// Returns [`KernelError::Deadlock`] when the kernel halted because every
    /// thread was blocked with nothing left to wake them.
    pub fn boot(self, main: impl FnOnce() + Send + 'static) -> Result<Statistics, KernelError> {
        let Self {
            scheduler,
            timer,
            idle_limit,
            debug_flags,
            quiet,
        } = self;
        debug_flags.install();
        abyss::QUIET.store(quiet, Ordering::SeqCst);
        let scheduler = scheduler.unwrap_or_else(|| Arc::new(RoundRobin::new()));
        kernel::boot(Machine::new(timer), scheduler, idle_limit, Box::new(main))
    }
}

// Test utilities
#[doc(hidden)]
pub trait TestCase
where
    Self: Sync + Send,
{
    fn name(&'static self) -> &'static str;
    fn run(&'static self) -> bool;
}

impl<T> TestCase for T
where
    T: Fn() + Send + Sync + 'static,
{
    fn name(&'static self) -> &'static str {
        std::any::type_name::<T>()
    }
    fn run(&'static self) -> bool {
        print!("test {} ... ", std::any::type_name::<T>());
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            SystemConfigurationBuilder::new().quiet(true).boot(self)
        }));
        match result {
            Ok(Ok(_)) => {
                println!("ok");
                true
            }
            Ok(Err(e)) => {
                println!("FAILED ({e})");
                false
            }
            Err(_) => {
                println!("FAILED");
                false
            }
        }
    }
}

/// A test case that passes only if the kernel ends in
/// [`KernelError::Deadlock`].
///
/// ```ignore
/// TestDriver::start([&thread::spawn_and_join, &Deadlocking(&thread::forgotten_signal)]);
/// ```
pub struct Deadlocking<T: 'static>(pub &'static T);

impl<T> TestCase for Deadlocking<T>
where
    T: Fn() + Send + Sync + 'static,
{
    fn name(&'static self) -> &'static str {
        std::any::type_name::<T>()
    }
    fn run(&'static self) -> bool {
        print!("test {} ... ", std::any::type_name::<T>());
        let test = self.0;
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            SystemConfigurationBuilder::new()
                .quiet(true)
                .idle_limit(IDLE_LIMIT / 100)
                .boot(test)
        }));
        match result {
            Ok(Err(KernelError::Deadlock)) => {
                println!("ok");
                true
            }
            Ok(_) => {
                println!("FAILED (no deadlock)");
                false
            }
            Err(_) => {
                println!("FAILED");
                false
            }
        }
    }
}

/// A driver for running tests.
///
/// Each test runs as the `main` thread of a freshly booted kernel.
pub struct TestDriver {
    _p: (),
}

impl TestDriver {
    /// Run the given tests, keeping those named on the command line if any.
    ///
    /// Names are matched without their crate prefix (`alarm::wait_short`).
    /// Returns whether every test passed.
    pub fn start<const TC: usize>(tests: [&'static dyn TestCase; TC]) -> bool {
        let filter = std::env::args().skip(1).collect::<Vec<_>>();
        let tests = tests
            .iter()
            .filter(|test| {
                let name = test.name();
                let r = name.split("::").next().map(|n| n.len() + 2).unwrap_or(0);
                filter.is_empty() || filter.iter().any(|f| f == &name[r.min(name.len())..])
            })
            .collect::<Vec<_>>();
        let (total, mut succ) = (tests.len(), 0);
        println!(
            "Running {} test{}",
            total,
            if total == 1 { "" } else { "s" }
        );

        for test in tests {
            if test.run() {
                succ += 1;
            }
        }
        println!(
            "test result: {}. {} passed; {} failed",
            if succ == total { "ok" } else { "FAILED" },
            succ,
            total - succ
        );
        succ == total
    }

    /// Runs `test` on a fresh kernel, panicking if it fails.
    pub fn run<T: Fn() + Send + Sync + 'static>(test: &'static T) {
        if let Err(e) = SystemConfigurationBuilder::new().boot(test) {
            panic!("{} failed: {e}.", std::any::type_name::<T>());
        }
    }

    /// Runs `test` on a fresh kernel, panicking unless it deadlocks.
    pub fn run_expecting_deadlock<T: Fn() + Send + Sync + 'static>(test: &'static T) {
        let result = SystemConfigurationBuilder::new()
            .idle_limit(IDLE_LIMIT / 100)
            .boot(test);
        assert_eq!(
            result.err(),
            Some(KernelError::Deadlock),
            "{} was expected to deadlock.",
            std::any::type_name::<T>()
        );
    }
}
