//! Thread abstraction, an abstraction of a cpu core.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with their
//! own stack and local state. Every kernel thread is backed by a host thread,
//! but the simulated machine has a single processor: exactly one kernel thread
//! runs at a time, and the processor changes hands only when the running
//! thread yields, blocks, finishes, or is preempted by a timer interrupt.
//!
//! A thread is always in exactly one [`ThreadState`]:
//!
//! ```text
//!   spawn ──► Ready ──(scheduled)──► Running ──(entry returns)──► Finished
//!               ▲                     │    │
//!               │       (yield_now)   │    │ (park_with)
//!               └─────────────────────┘    ▼
//!               └──────(unpark)────────── Blocked
//! ```
//!
//! ## Blocking
//!
//! Blocking is built from two pieces. [`Current::park_with`] turns the running
//! thread into a [`ParkHandle`], hands the handle to a closure that stores it
//! in some wait structure, and gives the processor away. Later, another thread
//! takes the handle out of the wait structure and calls
//! [`ParkHandle::unpark`], which puts the parked thread back on the ready
//! queue. As the handle is moved into `unpark`, a parked thread is woken at
//! most once.
//!
//! Both halves must run with interrupts disabled, so that checking a condition
//! and registering in a wait structure is never split by a timer interrupt.
pub mod scheduler;

use crate::{KernelError, kernel, sync::SpinLock};
use abyss::{
    DebugFlags,
    interrupt::{InterruptGuard, InterruptState},
};
use crossbeam_utils::sync::Unparker;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
};

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ThreadState {
    /// Thread is on the ready queue.
    Ready,
    /// Thread is running.
    Running,
    /// Thread is parked in some wait structure.
    Blocked,
    /// Thread's entry point returned.
    Finished,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub(crate) enum ThreadKind {
    /// The first thread of a boot. The kernel halts when it returns.
    Main,
    Worker,
    /// Runs when nothing else is ready. Never enters the ready queue.
    Idle,
}

/// Get specified thread's [`ThreadState`] by TID (Thread ID).
///
/// Finished threads are forgotten by the kernel, and reported as
/// [`KernelError::InvalidArgument`] like unknown TIDs.
pub fn get_state_by_tid(tid: u64) -> Result<ThreadState, KernelError> {
    kernel::current()
        .thread_by_tid(tid)
        .map(|th| th.state())
        .ok_or(KernelError::InvalidArgument)
}

/// An thread abstraction.
pub struct Thread {
    /// Thread id
    pub tid: u64,
    /// Thread name
    pub name: String,
    state: AtomicU8,
    pub(crate) kind: ThreadKind,
    /// Set while this thread owns the processor.
    pub(crate) on_cpu: AtomicBool,
    pub(crate) unparker: Unparker,
    joiners: SpinLock<Vec<ParkHandle>>,
}

impl Thread {
    pub(crate) fn new(name: String, kind: ThreadKind, unparker: Unparker) -> Self {
        static TID: AtomicU64 = AtomicU64::new(0);
        Self {
            tid: TID.fetch_add(1, Ordering::SeqCst),
            name,
            state: AtomicU8::new(ThreadState::Ready.into()),
            kind,
            on_cpu: AtomicBool::new(false),
            unparker,
            joiners: SpinLock::new(Vec::new()),
        }
    }

    /// State of the thread.
    pub fn state(&self) -> ThreadState {
        ThreadState::try_from(self.state.load(Ordering::SeqCst))
            .expect("Thread state is always a valid ThreadState.")
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state.into(), Ordering::SeqCst);
    }

    /// Marks the thread finished and wakes up every joiner.
    ///
    /// Interrupts must be disabled.
    pub(crate) fn finish(&self) {
        self.set_state(ThreadState::Finished);
        let mut joiners = self.joiners.lock();
        let joiners_ = std::mem::take(&mut *joiners);
        joiners.unlock();
        joiners_.into_iter().for_each(ParkHandle::unpark);
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// A handle to join thread.
#[derive(Clone)]
pub struct JoinHandle {
    /// Thread id of this handle.
    pub tid: u64,
    th: Arc<Thread>,
}

impl JoinHandle {
    /// Make a join handle for Thread `th`.
    pub(crate) fn new_for(th: &Arc<Thread>) -> Self {
        Self {
            tid: th.tid,
            th: th.clone(),
        }
    }

    /// Blocks until the thread's entry point has returned.
    ///
    /// Joining a thread that already finished returns immediately, so a
    /// handle can be joined any number of times.
    ///
    /// # Panics
    /// Panics when a thread tries to join itself.
    pub fn join(&self) {
        assert_ne!(
            Current::get_tid(),
            self.tid,
            "Thread {:?} tries to join itself.",
            self.th.name
        );
        let _guard = InterruptGuard::new();
        if self.th.state() != ThreadState::Finished {
            Current::park_with(|handle| {
                let mut joiners = self.th.joiners.lock();
                joiners.push(handle);
                joiners.unlock();
            });
        }
        abyss::debug!(
            DebugFlags::THREAD,
            "{} joined {}",
            Current::name(),
            self.th.name
        );
    }

    /// Whether the thread's entry point has returned.
    pub fn is_finished(&self) -> bool {
        self.th.state() == ThreadState::Finished
    }
}

/// A handle that represent the parked thread.
pub struct ParkHandle {
    pub(crate) th: Arc<Thread>,
}

impl ParkHandle {
    /// Thread id of the parked thread.
    pub fn tid(&self) -> u64 {
        self.th.tid
    }

    /// Consume the handle and unpark the underlying thread.
    ///
    /// The thread is appended to the ready queue. It runs when the scheduler
    /// picks it, not immediately.
    pub fn unpark(self) {
        let _guard = InterruptGuard::new();
        assert_eq!(
            self.th.state(),
            ThreadState::Blocked,
            "Thread {:?} is unparked while not parked.",
            self.th.name
        );
        self.th.set_state(ThreadState::Ready);
        kernel::current().scheduler().push_to_queue(self.th);
    }
}

impl std::fmt::Debug for ParkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ParkHandle").field(&self.th.name).finish()
    }
}

/// The opaque structure indicating the running thread on the current cpu.
pub struct Current {
    _p: (),
}

impl Current {
    /// Run a function `f` with [`ParkHandle`] for current thread, and then park
    /// the current thread.
    ///
    /// `f` is expected to store the handle somewhere another thread will find
    /// it. The current thread stays parked until the handle is unparked.
    ///
    /// # Panics
    /// Interrupts must be disabled by the caller. Parking with interrupts
    /// enabled would let a timer interrupt slip in between checking a
    /// condition and registering the handle.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        assert_eq!(
            InterruptState::current(),
            InterruptState::Off,
            "Try to park a thread with interrupts enabled."
        );
        let kernel = kernel::current();
        let th = kernel::current_thread();
        assert_ne!(th.kind, ThreadKind::Idle, "The idle thread never parks.");
        th.set_state(ThreadState::Blocked);
        f(ParkHandle { th: th.clone() });
        kernel.reschedule(&th);
    }

    /// Gives the processor to the next ready thread, if any.
    ///
    /// The current thread goes to the back of the ready queue. May be called
    /// with interrupts in either state.
    pub fn yield_now() {
        let kernel = kernel::current();
        let th = kernel::current_thread();
        let _guard = InterruptGuard::new();
        if th.kind != ThreadKind::Idle {
            th.set_state(ThreadState::Ready);
            kernel.scheduler().push_to_queue(th.clone());
        }
        kernel.reschedule(&th);
    }

    /// Get the current thread's id.
    pub fn get_tid() -> u64 {
        with_current(|th| th.tid)
    }

    /// Get the current thread's name.
    pub fn name() -> String {
        with_current(|th| th.name.clone())
    }
}

/// Run a function `f` with current thread as an argument.
///
/// # Panics
/// Panics when called from a host thread that is not a kernel thread.
#[inline]
pub fn with_current<R>(f: impl FnOnce(&Arc<Thread>) -> R) -> R {
    f(&kernel::current_thread())
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    name: String,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Spawn the thread as a parked state.
    ///
    /// The thread does not run until the returned handle is unparked.
    pub fn spawn_as_parked<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> ParkHandle {
        let th = kernel::current().create_thread(self.name, ThreadKind::Worker, thread_fn);
        th.set_state(ThreadState::Blocked);
        ParkHandle { th }
    }

    /// Spawn the thread.
    ///
    /// The new thread is put at the back of the ready queue; the caller keeps
    /// running.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> JoinHandle {
        let kernel = kernel::current();
        let th = kernel.create_thread(self.name, ThreadKind::Worker, thread_fn);
        let handle = JoinHandle::new_for(&th);
        let _guard = InterruptGuard::new();
        kernel.scheduler().push_to_queue(th);
        handle
    }
}
