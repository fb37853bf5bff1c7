//! Per-boot kernel state and the processor hand-off.
//!
//! Each kernel thread is backed by a host thread that sleeps on its own
//! [`Parker`] whenever it does not own the simulated processor. Giving the
//! processor to another thread means clearing our `on_cpu` flag, setting the
//! other thread's flag, unparking its host thread, and parking until our flag
//! is set again. The hand-off always happens with interrupts disabled; the
//! resumed thread restores its own interrupt state.
//!
//! The kernel halts when the main thread returns, when any thread panics, or
//! when the idle thread concludes that every remaining thread is blocked for
//! good. Halting stops the machine and releases every host thread. Threads
//! that are still parked unwind with a [`Halted`] payload, which the thread
//! entry swallows.
use crate::{
    KernelError,
    sync::SpinLock,
    thread::{Thread, ThreadKind, ThreadState, scheduler::Scheduler},
};
use abyss::{
    DebugFlags,
    interrupt::{InterruptGuard, InterruptState},
    machine::Machine,
};
use crossbeam_utils::sync::{Parker, Unparker};
use std::{
    any::Any,
    cell::OnceCell,
    collections::BTreeMap,
    panic::AssertUnwindSafe,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

thread_local! {
    static KERNEL: OnceCell<Arc<Kernel>> = const { OnceCell::new() };
    static CURRENT: OnceCell<Arc<Thread>> = const { OnceCell::new() };
    static PARKER: OnceCell<Parker> = const { OnceCell::new() };
}

/// Payload of the unwinding that tears down the threads of a halted kernel.
pub(crate) struct Halted;

/// Why the kernel halted.
pub(crate) enum Outcome {
    Finished,
    Deadlock,
    Panicked(Box<dyn Any + Send>),
}

/// Counters reported when the kernel halts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Ticks elapsed on the machine.
    pub total_ticks: u64,
    /// Ticks skipped while the processor was idle.
    pub idle_ticks: u64,
    /// Number of processor hand-offs.
    pub context_switches: u64,
}

pub(crate) struct Kernel {
    machine: Arc<Machine>,
    scheduler: Arc<dyn Scheduler>,
    idle: OnceLock<Arc<Thread>>,
    threads: SpinLock<BTreeMap<u64, Arc<Thread>>>,
    halted: AtomicBool,
    outcome: SpinLock<Option<Outcome>>,
    boot_waiter: Unparker,
    idle_limit: u64,
    context_switches: AtomicU64,
}

/// The kernel the calling kernel thread belongs to.
#[track_caller]
pub(crate) fn current() -> Arc<Kernel> {
    KERNEL.with(|k| k.get().cloned()).unwrap_or_else(|| {
        panic!(
            "Host thread {:?} is not a kernel thread.",
            std::thread::current().name().unwrap_or("<unnamed>")
        )
    })
}

/// The calling kernel thread.
#[track_caller]
pub(crate) fn current_thread() -> Arc<Thread> {
    CURRENT.with(|th| th.get().cloned()).unwrap_or_else(|| {
        panic!(
            "Host thread {:?} is not a kernel thread.",
            std::thread::current().name().unwrap_or("<unnamed>")
        )
    })
}

fn park_host_thread() {
    PARKER.with(|parker| {
        if let Some(parker) = parker.get() {
            parker.park();
        }
    })
}

impl Kernel {
    pub(crate) fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub(crate) fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    pub(crate) fn thread_by_tid(&self, tid: u64) -> Option<Arc<Thread>> {
        let threads = self.threads.lock();
        let th = threads.get(&tid).cloned();
        threads.unlock();
        th
    }

    pub(crate) fn statistics(&self) -> Statistics {
        Statistics {
            total_ticks: self.machine.ticks(),
            idle_ticks: self.machine.idle_ticks(),
            context_switches: self.context_switches.load(Ordering::SeqCst),
        }
    }

    fn idle_thread(&self) -> Arc<Thread> {
        self.idle
            .get()
            .cloned()
            .expect("The idle thread is created before anything is scheduled.")
    }

    /// Creates a kernel thread and its host thread. The new thread waits for
    /// the processor; scheduling it is up to the caller.
    pub(crate) fn create_thread<F>(
        self: &Arc<Self>,
        name: String,
        kind: ThreadKind,
        thread_fn: F,
    ) -> Arc<Thread>
    where
        F: FnOnce() + Send + 'static,
    {
        let parker = Parker::new();
        let th = Arc::new(Thread::new(name, kind, parker.unparker().clone()));
        if kind != ThreadKind::Idle {
            let mut threads = self.threads.lock();
            threads.insert(th.tid, th.clone());
            threads.unlock();
        }
        abyss::debug!(DebugFlags::THREAD, "create thread {} ({})", th.name, th.tid);

        let (kernel, thread) = (self.clone(), th.clone());
        std::thread::Builder::new()
            .name(th.name.clone())
            .spawn(move || kernel.run_thread(thread, parker, thread_fn))
            .unwrap_or_else(|e| panic!("Failed to back thread {:?}: {e}", th.name));
        th
    }

    /// The very beginning of the thread.
    fn run_thread(self: Arc<Self>, th: Arc<Thread>, parker: Parker, thread_fn: impl FnOnce()) {
        abyss::machine::attach(self.machine.clone());
        KERNEL.with(|k| {
            let _ = k.set(self.clone());
        });
        CURRENT.with(|c| {
            let _ = c.set(th.clone());
        });
        PARKER.with(|p| {
            let _ = p.set(parker);
        });

        if !self.wait_for_cpu(&th) {
            return;
        }
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            // A new thread starts with interrupts enabled.
            abyss::interrupt::enable();
            thread_fn();
        }));
        match result {
            Ok(()) if th.kind == ThreadKind::Main => self.halt(Outcome::Finished),
            Ok(()) if th.kind == ThreadKind::Idle => {}
            Ok(()) => self.exit(&th),
            Err(payload) if payload.is::<Halted>() => {}
            Err(payload) => self.halt(Outcome::Panicked(payload)),
        }
    }

    /// Parks the host thread until `th` owns the processor. Returns `false`
    /// when the kernel halted instead.
    fn wait_for_cpu(&self, th: &Thread) -> bool {
        loop {
            if th.on_cpu.load(Ordering::Acquire) {
                return true;
            }
            if self.halted.load(Ordering::Acquire) {
                return false;
            }
            park_host_thread();
        }
    }

    /// Gives the processor to `next` without waiting for it to come back.
    fn hand_over(&self, me: &Thread, next: &Thread) {
        self.context_switches.fetch_add(1, Ordering::SeqCst);
        next.set_state(ThreadState::Running);
        me.on_cpu.store(false, Ordering::Release);
        next.on_cpu.store(true, Ordering::Release);
        next.unparker.unpark();
    }

    /// Gives the processor to `next` and waits until it is handed back.
    fn switch_to(&self, me: &Arc<Thread>, next: Arc<Thread>) {
        self.hand_over(me, &next);
        drop(next);
        if !self.wait_for_cpu(me) && !std::thread::panicking() {
            std::panic::resume_unwind(Box::new(Halted));
        }
    }

    /// Runs the next ready thread. The caller already decided what happens to
    /// `me` (queued, parked or finished).
    pub(crate) fn reschedule(&self, me: &Arc<Thread>) {
        assert_eq!(
            InterruptState::current(),
            InterruptState::Off,
            "Try to reschedule with interrupts enabled."
        );
        let next = self
            .scheduler
            .next_to_run()
            .unwrap_or_else(|| self.idle_thread());
        if Arc::ptr_eq(me, &next) {
            me.set_state(ThreadState::Running);
        } else {
            self.switch_to(me, next);
        }
    }

    /// Retires the finished thread `me`. Its host thread returns right after.
    fn exit(&self, me: &Arc<Thread>) {
        // Never restored: the next thread restores its own state.
        abyss::interrupt::disable();
        me.finish();
        let mut threads = self.threads.lock();
        threads.remove(&me.tid);
        threads.unlock();
        abyss::debug!(DebugFlags::THREAD, "thread {} ({}) finished", me.name, me.tid);

        let next = self
            .scheduler
            .next_to_run()
            .unwrap_or_else(|| self.idle_thread());
        self.hand_over(me, &next);
    }

    /// The body of the idle thread.
    ///
    /// Runs ready threads when there are some, and otherwise lets time pass
    /// until the next timer interrupt. The kernel is declared deadlocked after
    /// `idle_limit` consecutive timer interrupts without any thread running.
    fn idle_loop(&self) {
        let me = current_thread();
        let mut last_switches = self.context_switches.load(Ordering::SeqCst);
        let mut idle_interrupts = 0;
        while !self.halted.load(Ordering::SeqCst) {
            let guard = InterruptGuard::new();
            let switches = self.context_switches.load(Ordering::SeqCst);
            if switches != last_switches {
                last_switches = switches;
                idle_interrupts = 0;
            }
            if let Some(next) = self.scheduler.next_to_run() {
                self.switch_to(&me, next);
            } else if idle_interrupts >= self.idle_limit {
                abyss::warning!(
                    "Deadlock: nothing ran for {} timer interrupts at tick {}.",
                    idle_interrupts,
                    self.machine.ticks()
                );
                self.halt(Outcome::Deadlock);
                drop(guard);
                return;
            } else {
                idle_interrupts += 1;
                self.machine.idle();
            }
            drop(guard);
        }
    }

    /// Stops the machine and releases every host thread.
    ///
    /// The first outcome wins; later halts only release threads again.
    pub(crate) fn halt(&self, outcome: Outcome) {
        self.machine.halt();
        let mut slot = self.outcome.lock();
        if slot.is_none() {
            *slot = Some(outcome);
        }
        slot.unlock();

        let threads = self.threads.lock();
        let threads_ = threads.values().cloned().collect::<Vec<_>>();
        threads.unlock();

        self.halted.store(true, Ordering::SeqCst);
        for th in threads_.iter().chain(self.idle.get()) {
            th.unparker.unpark();
        }
        self.boot_waiter.unpark();
    }

    fn take_outcome(&self) -> Option<Outcome> {
        let mut slot = self.outcome.lock();
        let outcome = slot.take();
        slot.unlock();
        outcome
    }
}

/// Boots a kernel on a fresh machine, runs `main` as its first thread, and
/// waits for the kernel to halt.
pub(crate) fn boot(
    machine: Machine,
    scheduler: Arc<dyn Scheduler>,
    idle_limit: u64,
    main: Box<dyn FnOnce() + Send>,
) -> Result<Statistics, KernelError> {
    let machine = Arc::new(machine);
    // Setting up runs with the machine's interrupts disabled, on the caller's
    // host thread.
    let previous = abyss::machine::attach(machine.clone());
    let parker = Parker::new();
    let kernel = Arc::new(Kernel {
        machine: machine.clone(),
        scheduler,
        idle: OnceLock::new(),
        threads: SpinLock::new(BTreeMap::new()),
        halted: AtomicBool::new(false),
        outcome: SpinLock::new(None),
        boot_waiter: parker.unparker().clone(),
        idle_limit,
        context_switches: AtomicU64::new(0),
    });
    machine.set_timer_handler(Arc::new(|| current().scheduler().timer_tick()));

    let idle = kernel.create_thread("idle".into(), ThreadKind::Idle, || current().idle_loop());
    let _ = kernel.idle.set(idle);
    let main = kernel.create_thread("main".into(), ThreadKind::Main, main);

    abyss::info!(
        "Machine: timer interrupt every {} ticks, idle limit {}.",
        machine.timer_interval(),
        idle_limit
    );
    main.set_state(ThreadState::Running);
    main.on_cpu.store(true, Ordering::Release);
    main.unparker.unpark();
    drop(main);

    while !kernel.halted.load(Ordering::SeqCst) {
        parker.park();
    }

    let statistics = kernel.statistics();
    abyss::info!(
        "Ticks: total {}, idle {}; context switches: {}.",
        statistics.total_ticks,
        statistics.idle_ticks,
        statistics.context_switches
    );
    let outcome = kernel.take_outcome();
    match previous {
        Some(machine) => abyss::machine::attach(machine),
        None => abyss::machine::detach(),
    };
    match outcome {
        Some(Outcome::Finished) => Ok(statistics),
        Some(Outcome::Deadlock) => Err(KernelError::Deadlock),
        Some(Outcome::Panicked(payload)) => std::panic::resume_unwind(payload),
        None => unreachable!("The kernel halts with an outcome."),
    }
}
