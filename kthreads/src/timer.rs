//! The machine clock and the timer interrupt.
//!
//! Time is counted in ticks of the simulated machine. The clock advances by
//! one tick whenever interrupts are turned back on, and leaps ahead while the
//! processor idles, so ticks measure kernel activity rather than wall time.
use crate::thread::scheduler::scheduler;
use std::sync::Arc;

pub use abyss::machine::TimerHandler;

/// Ticks elapsed since boot.
pub fn now() -> u64 {
    crate::kernel::current().machine().ticks()
}

/// Number of ticks between two timer interrupts.
///
/// With a timer seed configured, this is the average period.
pub fn interval() -> u64 {
    crate::kernel::current().machine().timer_interval()
}

/// The installed timer interrupt handler.
pub fn interrupt_handler() -> TimerHandler {
    crate::kernel::current()
        .machine()
        .timer_handler()
        .unwrap_or_else(|| Arc::new(|| scheduler().timer_tick()))
}

/// Installs `handler` as the timer interrupt handler.
///
/// The handler runs with interrupts disabled on whichever thread the
/// interrupt lands on, and may yield the processor. By default the kernel
/// forwards every timer interrupt to [`Scheduler::timer_tick`]. A handler
/// that wants to keep the previous behavior reads it first with
/// [`interrupt_handler`] and calls it, with interrupts disabled in between.
///
/// [`Scheduler::timer_tick`]: crate::thread::scheduler::Scheduler::timer_tick
pub fn set_interrupt_handler(handler: impl Fn() + Send + Sync + 'static) {
    crate::kernel::current()
        .machine()
        .set_timer_handler(Arc::new(handler));
}
