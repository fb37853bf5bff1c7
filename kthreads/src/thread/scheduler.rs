//! Thread scheduler

use super::{Current, Thread};
use crossbeam_queue::SegQueue;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

/// A trait for a thread scheduler.
///
/// The [`Scheduler`] trait defines the common functionality expected from a
/// thread scheduler. It provides an interface for managing threads, determining
/// which thread to run next, and handling periodic timer interrupts. A thread
/// scheduler is responsible for controlling the execution of threads in a
/// system. The scheduler determines when each thread is allowed to run and
/// ensures fair allocation of CPU time among all threads.
///
/// The kernel calls [`Scheduler::next_to_run`] and
/// [`Scheduler::push_to_queue`] with interrupts disabled, so an implementation
/// never observes two calls at once.
pub trait Scheduler: Send + Sync {
    /// Peek a next thread to run.
    ///
    /// This method checks the queue and returns the next thread to run. If no
    /// threads are available, it returns `None`, and the processor idles.
    fn next_to_run(&self) -> Option<Arc<Thread>>;

    /// Push a thread `th` into scheduling queue.
    ///
    /// This method adds the specified thread to the queue of threads waiting to
    /// be scheduled.
    fn push_to_queue(&self, th: Arc<Thread>);

    /// Called on every timer interrupt, with interrupts disabled.
    ///
    /// This method allows the scheduler to manage time slices, for instance
    /// by calling [`Current::yield_now`].
    fn timer_tick(&self);
}

/// Get the scheduler of the running kernel.
pub fn scheduler() -> Arc<dyn Scheduler> {
    crate::kernel::current().scheduler().clone()
}

/// A First-in-first-out scheduler.
///
/// Threads keep the processor until they yield or block.
#[derive(Default)]
pub struct Fifo {
    runqueue: SegQueue<Arc<Thread>>,
}

impl Fifo {
    /// Creates an empty FIFO scheduler.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for Fifo {
    fn next_to_run(&self) -> Option<Arc<Thread>> {
        self.runqueue.pop()
    }
    fn push_to_queue(&self, th: Arc<Thread>) {
        self.runqueue.push(th);
    }
    fn timer_tick(&self) {}
}

/// A round robin scheduler.
///
/// Threads are run in FIFO order, and the running thread is moved to the back
/// of the queue every `quantum` timer interrupts.
pub struct RoundRobin {
    runqueue: SegQueue<Arc<Thread>>,
    quantum: u64,
    elapsed: AtomicU64,
}

impl RoundRobin {
    /// Creates a round robin scheduler preempting every timer interrupt.
    pub fn new() -> Self {
        Self::with_quantum(1)
    }

    /// Creates a round robin scheduler preempting every `quantum` timer
    /// interrupts.
    pub fn with_quantum(quantum: u64) -> Self {
        assert!(quantum > 0, "The quantum must be at least one interrupt.");
        Self {
            runqueue: SegQueue::new(),
            quantum,
            elapsed: AtomicU64::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for RoundRobin {
    fn next_to_run(&self) -> Option<Arc<Thread>> {
        self.runqueue.pop()
    }
    fn push_to_queue(&self, th: Arc<Thread>) {
        self.runqueue.push(th);
    }
    fn timer_tick(&self) {
        if self.elapsed.fetch_add(1, Ordering::SeqCst) + 1 >= self.quantum {
            self.elapsed.store(0, Ordering::SeqCst);
            Current::yield_now();
        }
    }
}
