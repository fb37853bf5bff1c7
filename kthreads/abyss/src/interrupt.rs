//! Interrupt
//!
//! The interrupt-enable bit of the machine is the only source of atomicity on
//! the simulated uniprocessor: while it is clear, no timer interrupt is
//! delivered, and the running thread keeps the processor until it gives it up
//! on its own.
//!
//! [`disable`] and [`restore`] are the raw gate. They must always be paired,
//! including on early returns, which is what [`InterruptGuard`] is for.
//! Turning interrupts back on advances the clock by one tick.
use crate::machine;
use std::marker::PhantomData;

/// Enumeration representing the interrupt state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterruptState {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled.
    Off,
}

impl InterruptState {
    /// Reads the current interrupt state.
    ///
    /// # Returns
    /// - [`InterruptState::On`] if interrupts are enabled.
    /// - [`InterruptState::Off`] if interrupts are disabled.
    pub fn current() -> Self {
        machine::current().interrupt_state()
    }
}

/// Disables interrupts, returning the state they were in.
///
/// Disabling twice is harmless: the second call returns
/// [`InterruptState::Off`].
pub fn disable() -> InterruptState {
    let machine = machine::current();
    let previous = machine.interrupt_state();
    machine.set_interrupt_state(InterruptState::Off);
    previous
}

/// Puts interrupts back to `previous`.
///
/// Going from disabled to enabled advances the clock by one tick, which may
/// deliver a timer interrupt on the spot.
pub fn restore(previous: InterruptState) {
    let machine = machine::current();
    match previous {
        InterruptState::Off => machine.set_interrupt_state(InterruptState::Off),
        InterruptState::On => {
            if machine.interrupt_state() == InterruptState::Off {
                machine.set_interrupt_state(InterruptState::On);
                machine.tick();
            }
        }
    }
}

/// Enables interrupts.
pub fn enable() {
    restore(InterruptState::On)
}

/// An RAII-based guard for managing interrupt disabling.
///
/// When an `InterruptGuard` is created, interrupts are disabled. When it is
/// dropped, the interrupt state is restored to what it was before the guard was
/// created.
///
/// **Important:**
/// - [`InterruptGuard`] instances **must be dropped in reverse order of their
///   creation** to prevent unintended interrupt state changes.
/// - Due to Rust's ownership and scoping rules, this invariant is naturally
///   upheld unless `drop()` is explicitly called prematurely or an
///   [`InterruptGuard`] is stored in a struct field.
///
/// A guard may live across a thread switch: the thread that blocks hands the
/// processor over with interrupts disabled, and restores its own state only
/// when it runs again.
pub struct InterruptGuard {
    previous: InterruptState,
    _not_send: PhantomData<*const ()>,
}

impl InterruptGuard {
    /// Creates a new `InterruptGuard`, disabling interrupts.
    ///
    /// # Example
    /// ```ignore
    /// let _guard = InterruptGuard::new(); // Disables interrupts
    /// // Critical section...
    /// // Interrupts are restored when `_guard` goes out of scope.
    /// ```
    pub fn new() -> Self {
        Self {
            previous: disable(),
            _not_send: PhantomData,
        }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        // No interrupt is delivered to an unwinding thread.
        if std::thread::panicking() {
            if let Some(machine) = machine::try_current() {
                machine.set_interrupt_state(self.previous);
            }
            return;
        }
        restore(self.previous);
    }
}
