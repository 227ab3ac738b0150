//! # Kernel synchronization primitives
//!
//! The kernel core is single-threaded; the only code that can observe state
//! half-built is a trap handler firing during boot. [`BootCell`] publishes
//! a value exactly once so such handlers either see nothing or see the
//! complete value.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod boot_cell;

pub use boot_cell::BootCell;
