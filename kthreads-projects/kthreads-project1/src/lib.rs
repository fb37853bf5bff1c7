//! # Project 1: Threads
//!
//! In Project 1, you build the synchronization primitives of the kernel on
//! top of a bare uniprocessor thread substrate. The substrate gives you
//! exactly two tools:
//!
//! - the interrupt gate ([`InterruptGuard`]), which keeps the timer from
//!   preempting the running thread inside a critical section, and
//! - the raw thread-state API: [`Current::park_with`] to block the running
//!   thread, [`ParkHandle::unpark`] to make a blocked thread ready, and
//!   [`Current::yield_now`] to give the processor away.
//!
//! Everything in this crate is built from these two tools, and from the
//! blocking [`Lock`] and [`Semaphore`] that the kernel builds the same way.
//! The hard part is never the bookkeeping itself: it is making sure that no
//! thread ever goes to sleep after the event that was supposed to wake it up
//! already happened, and that no thread is ever woken twice.
//!
//! ## Getting Started
//!
//! To begin, navigate to the `kthreads-project1/grader` directory and run:
//!
//! ```bash
//! $ cargo run
//! ```
//!
//! Each test case boots a fresh kernel and runs as its `main` thread. The same
//! cases are also registered as regular tests for `cargo test`.
//!
//! ## Project Outline
//! - [`Alarm`]: Put threads to sleep until a point in time, and wake them up
//!   from the timer interrupt.
//! - [`Condition Variable`]: Build a condition variable out of the interrupt
//!   gate.
//! - [`Communicator`]: Pair speakers and listeners, one word at a time.
//! - [`Boat`]: Solve a crossing puzzle with the primitives above.
//!
//! ## Rules of the game
//!
//! - Every piece of state shared by more than one thread is protected either
//!   by a [`Lock`] or by the interrupt gate (a [`SpinLock`] is the gate plus a
//!   flag).
//! - Nothing blocks or yields while holding a [`SpinLock`].
//! - A [`Lock`] is always acquired before entering a condition variable, and
//!   the condition variable uses the gate internally, never the reverse.
//!
//! [`Alarm`]: alarm
//! [`Condition Variable`]: condition
//! [`Communicator`]: communicator
//! [`Boat`]: boat
//! [`InterruptGuard`]: kthreads::InterruptGuard
//! [`Current::park_with`]: kthreads::thread::Current::park_with
//! [`Current::yield_now`]: kthreads::thread::Current::yield_now
//! [`ParkHandle::unpark`]: kthreads::thread::ParkHandle::unpark
//! [`Lock`]: kthreads::sync::Lock
//! [`Semaphore`]: kthreads::sync::Semaphore
//! [`SpinLock`]: kthreads::sync::SpinLock

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod alarm;
pub mod boat;
pub mod communicator;
pub mod condition;
mod sleeper;

pub use alarm::Alarm;
pub use boat::Boat;
pub use communicator::Communicator;
pub use condition::Condition2;
