//! Helpers for writing kernel test cases.
//!
//! A test case is a plain `fn()` that runs as the `main` thread of a freshly
//! booted kernel. Annotating it with [`kernel_test`] also registers it as a
//! `#[test]`, so the same case runs both from the grader binary and from
//! `cargo test`.
extern crate grading_derive;

pub use grading_derive::*;

#[doc(hidden)]
pub use kthreads::TestDriver;
