//! Kernel print utilities.
//!
//! Besides the plain console macros, the kernel traces its internals through
//! [`debug!`]. Each trace belongs to a category of [`DebugFlags`], and only the
//! categories installed with [`DebugFlags::install`] reach the console.

use std::sync::atomic::{AtomicU32, Ordering};

bitflags::bitflags! {
    /// Categories of kernel debug traces.
    pub struct DebugFlags: u32 {
        /// Thread creation, completion and joins.
        const THREAD = 1 << 0;
        /// Timer interrupts and idle periods.
        const INTERRUPT = 1 << 1;
        /// Alarm sleeps and wake-ups.
        const ALARM = 1 << 2;
        /// Condition variable traffic.
        const CONDITION = 1 << 3;
        /// Communicator hand-offs.
        const COMMUNICATOR = 1 << 4;
        /// Boat crossings.
        const BOAT = 1 << 5;
        /// Locks and semaphores.
        const SYNC = 1 << 6;
    }
}

static DEBUG_FLAGS: AtomicU32 = AtomicU32::new(0);

impl DebugFlags {
    /// Parses a list of category letters.
    ///
    /// `t` thread, `i` interrupt, `a` alarm, `c` condition, `m` communicator,
    /// `b` boat, `s` sync. `+` enables every category. Unknown letters are
    /// ignored.
    pub fn from_letters(letters: &str) -> Self {
        letters.chars().fold(Self::empty(), |flags, c| {
            flags
                | match c {
                    '+' => Self::all(),
                    't' => Self::THREAD,
                    'i' => Self::INTERRUPT,
                    'a' => Self::ALARM,
                    'c' => Self::CONDITION,
                    'm' => Self::COMMUNICATOR,
                    'b' => Self::BOAT,
                    's' => Self::SYNC,
                    _ => Self::empty(),
                }
        })
    }

    /// Makes `self` the set of traced categories.
    pub fn install(self) {
        DEBUG_FLAGS.store(self.bits(), Ordering::SeqCst);
    }

    /// The set of traced categories.
    pub fn current() -> Self {
        Self::from_bits_truncate(DEBUG_FLAGS.load(Ordering::SeqCst))
    }
}

#[doc(hidden)]
pub fn _print(fmt: std::fmt::Arguments<'_>) {
    std::print!("{fmt}");
}

#[doc(hidden)]
pub fn _debugging(flags: DebugFlags) -> bool {
    DebugFlags::current().intersects(flags)
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the standard output.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the standard output.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
///
/// Use the format! syntax to write data to the standard output.
#[macro_export]
macro_rules! info {
    () => (if !$crate::QUIET.load(std::sync::atomic::Ordering::SeqCst) { $crate::print!("[INFO]\n") });
    ($($arg:tt)*) => (if !$crate::QUIET.load(std::sync::atomic::Ordering::SeqCst) { $crate::print!("[INFO] {}\n", format_args!($($arg)*)) });
}

/// Display a warning message.
///
/// Use the format! syntax to write data to the standard output.
#[macro_export]
macro_rules! warning {
    () => (if !$crate::QUIET.load(std::sync::atomic::Ordering::SeqCst) { $crate::print!("[WARN]\n") });
    ($($arg:tt)*) => (if !$crate::QUIET.load(std::sync::atomic::Ordering::SeqCst) { $crate::print!("[WARN] {}\n", format_args!($($arg)*)) });
}

/// Display a debug trace of the given [`DebugFlags`] category.
///
/// ```ignore
/// debug!(DebugFlags::ALARM, "{} sleeps until {}", name, deadline);
/// ```
#[macro_export]
macro_rules! debug {
    ($flags:expr, $($arg:tt)*) => (if $crate::kprint::_debugging($flags) { $crate::print!("[DEBUG] {}\n", format_args!($($arg)*)) });
}
