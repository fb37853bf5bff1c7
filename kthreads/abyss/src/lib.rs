//! The abyss of the kernel that emulates the hardware.
//!
//! This crate contains the simulated uniprocessor the kernel runs on: the
//! interrupt-enable bit, the tick clock, the periodic timer device, and the
//! primitives that sit directly on top of them (interrupt guards, spinlocks
//! and the kernel console).
//!
//! Kernel threads are backed by host threads, but only one of them is
//! considered to be running on the simulated processor at a time. Everything
//! a real processor keeps in hardware is therefore kept in a [`Machine`],
//! shared by every kernel thread of a single boot.
//!
//! You are **not** supposed to use the modules of this crate directly when
//! implementing the synchronization primitives. Instead, see the
//! [`kthreads`] crate to find which modules (or functions) are available.
//!
//! [`kthreads`]: ../kthreads/index.html
//! [`Machine`]: machine::Machine
#![allow(clippy::new_without_default)]

use std::sync::atomic::AtomicBool;

#[doc(hidden)]
#[macro_use]
pub mod kprint;
pub mod interrupt;
pub mod machine;
pub mod spinlock;

pub use kprint::DebugFlags;

/// Suppresses `info!` and `warning!` messages when set.
#[doc(hidden)]
pub static QUIET: AtomicBool = AtomicBool::new(false);
