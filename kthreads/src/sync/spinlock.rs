//! Uniprocessor spinlock.
//!
//! Implementing a spinlock on a uniprocessor is simple; it just requires
//! preventing thread preemption while holding a lock. By disabling interrupts
//! in the lock-holding thread, other threads cannot access the shared resource
//! as they can't be scheduled.
//!
//! The flip side is that a thread holding a [`SpinLock`] must never block or
//! yield: the processor would move on with interrupts disabled, and the lock
//! would stay held by a thread that does not run. Use [`Lock`] when a critical
//! section needs to wait.
//!
//! [`Lock`]: super::Lock

pub use abyss::spinlock::{SpinLock, SpinLockGuard, WouldBlock};
