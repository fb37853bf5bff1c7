//! A parked thread that more than one party may try to wake.
//!
//! A [`ParkHandle`] can only be unparked once, which is what a thread waiting
//! on a single structure needs. A thread in a bounded wait is registered in
//! two structures at once (a condition variable and the alarm), and whichever
//! fires first must wake it while the other finds nothing left to do. A
//! [`Sleeper`] is the shared slot both structures point to.
use kthreads::{sync::SpinLock, thread::ParkHandle};
use std::sync::Arc;

/// What released a [`Sleeper`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WakeReason {
    /// Woken explicitly, e.g. by [`Condition2::wake`].
    ///
    /// [`Condition2::wake`]: crate::Condition2::wake
    Signal,
    /// Woken by the alarm once its deadline passed.
    Timeout,
}

struct Slot {
    handle: Option<ParkHandle>,
    woken_by: Option<WakeReason>,
}

/// Shared slot holding the [`ParkHandle`] of a parked thread.
#[derive(Clone)]
pub(crate) struct Sleeper(Arc<SpinLock<Slot>>);

impl Sleeper {
    pub(crate) fn new() -> Self {
        Self(Arc::new(SpinLock::new(Slot {
            handle: None,
            woken_by: None,
        })))
    }

    /// Fills the slot with the handle of the thread about to park.
    pub(crate) fn register(&self, handle: ParkHandle) {
        let mut slot = self.0.lock();
        debug_assert!(slot.handle.is_none() && slot.woken_by.is_none());
        slot.handle = Some(handle);
        slot.unlock();
    }

    /// Wakes the parked thread for `reason`.
    ///
    /// Returns `false` when somebody else already woke it.
    pub(crate) fn wake(&self, reason: WakeReason) -> bool {
        let mut slot = self.0.lock();
        let handle = slot.handle.take();
        if handle.is_some() {
            slot.woken_by = Some(reason);
        }
        slot.unlock();
        match handle {
            Some(handle) => {
                handle.unpark();
                true
            }
            None => false,
        }
    }

    /// Why the thread was woken, if it was.
    pub(crate) fn woken_by(&self) -> Option<WakeReason> {
        let slot = self.0.lock();
        let reason = slot.woken_by;
        slot.unlock();
        reason
    }
}
