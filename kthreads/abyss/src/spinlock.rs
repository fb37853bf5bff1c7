//! Interrupt-disabling spinlock.
//!
//! On the simulated uniprocessor, holding a [`SpinLock`] means running with
//! interrupts disabled, so the holder can never be preempted and the lock is
//! never observed contended by a running thread. The atomic flag still guards
//! the data, which keeps the lock sound while a halted kernel releases its
//! host threads all at once.

use crossbeam_utils::Backoff;
use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

/// The lock could not be acquired at this time because the operation would
/// otherwise block.
#[derive(Debug, PartialEq, Eq)]
pub struct WouldBlock;

/// Protects `T` by keeping interrupts off on the simulated processor.
///
/// The data is reachable only through a [`SpinLockGuard`], handed out by
/// [`lock`] or [`try_lock`]. Interrupts stay disabled while the guard is
/// alive, so a thread must never block or yield while holding a spinlock.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
///
/// # Examples
///
/// ```ignore
/// use std::sync::Arc;
/// use kthreads::sync::SpinLock;
/// use kthreads::thread::ThreadBuilder;
///
/// let data = Arc::new(SpinLock::new(0));
///
/// let handles = (0..10)
///     .map(|_| {
///         let data = Arc::clone(&data);
///         ThreadBuilder::new("work").spawn(move || {
///             let mut guard = data.lock();
///             *guard += 1;
///             // the lock must be "explicitly" unlocked before `guard` goes out of scope.
///             guard.unlock();
///         })
///     })
///     .collect::<Vec<_>>();
/// handles.iter().for_each(|h| h.join());
/// ```
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates an unlocked spinlock holding `t`.
    #[inline]
    pub const fn new(t: T) -> SpinLock<T> {
        SpinLock {
            data: UnsafeCell::new(t),
            locked: AtomicBool::new(false),
        }
    }

    /// Unwraps the protected data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Disables interrupts and takes the lock.
    ///
    /// The returned guard must be released with [`SpinLockGuard::unlock`];
    /// dropping it panics. Locking a spinlock twice from the same thread
    /// never returns.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        let guard = loop {
            let guard = crate::interrupt::InterruptGuard::new();
            if !self.locked.swap(true, Ordering::Acquire) {
                break guard;
            }
            drop(guard);
            backoff.snooze();
        };

        SpinLockGuard {
            caller: std::panic::Location::caller(),
            lock: self,
            guard: Some(guard),
        }
    }

    /// Takes the lock if it is free, without spinning.
    ///
    /// # Errors
    /// Returns [`WouldBlock`] when the lock is held.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        let guard = crate::interrupt::InterruptGuard::new();
        if !self.locked.swap(true, Ordering::Acquire) {
            Ok(SpinLockGuard {
                guard: Some(guard),
                caller: std::panic::Location::caller(),
                lock: self,
            })
        } else {
            Err(WouldBlock)
        }
    }
}

impl<T: Default> Default for SpinLock<T> {
    /// An unlocked spinlock holding `T::default()`.
    fn default() -> SpinLock<T> {
        SpinLock::new(Default::default())
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

/// Access to the data of a held [`SpinLock`].
///
/// Holds the interrupt guard of the critical section. The lock is released
/// only by [`unlock`]; dropping the guard otherwise is a bug and panics.
///
/// [`unlock`]: Self::unlock
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    caller: &'static std::panic::Location<'static>,
    lock: &'a SpinLock<T>,
    guard: Option<crate::interrupt::InterruptGuard>,
}

unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Releases the lock, then restores the interrupt state. A pending timer
    /// interrupt may be delivered on the way out.
    pub fn unlock(mut self) {
        self.lock.locked.store(false, Ordering::Release);
        self.guard.take();
        std::mem::forget(self);
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            // Leave the data to the unwinding thread; the lock stays poisoned.
            return;
        }
        panic!(
            "`.unlock()` must be explicitly called before dropping SpinLockGuard.
The lock is held at {:?}.",
            self.caller
        );
    }
}
