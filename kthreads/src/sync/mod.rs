//! Synchronization primitives.
//!
//! Everything in this module is built from the interrupt gate and the raw
//! thread-state API of [`crate::thread`]:
//!
//! - [`SpinLock`] disables interrupts while it is held. It protects the
//!   bookkeeping of the blocking primitives and is never held across a block.
//! - [`Lock`] is a blocking binary lock with FIFO hand-off.
//! - [`Semaphore`] is a blocking counting semaphore with FIFO hand-off.
pub mod lock;
pub mod semaphore;
pub mod spinlock;

pub use lock::Lock;
pub use semaphore::Semaphore;
pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
