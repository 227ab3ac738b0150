//! # Kernel Configuration and Boot Interface
//!
//! Shared definitions between the loader, the kernel binary and the kernel's
//! library crates. Nothing in here touches hardware.
//!
//! * [`boot`]: the loader-to-kernel handoff record and entry signature.
//! * [`memory`]: the fixed physical and virtual layout, expressed as `const`s
//!   and checked at compile time.
//! * [`vectors`]: which of the 256 trap vectors are routed where.
//! * [`stage`]: the boot sequence as an explicit state machine that ends in
//!   a terminal state instead of a bare `loop {}`.
//!
//! ## Virtual layout
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │ Identity map of 0..4 GiB        │  kernel tables, P|RW
//! 0x0000_0001_0000_0000 ├─────────────────────────────────┤
//!                       │            unmapped             │
//! USER_WINDOW_BASE      ├─────────────────────────────────┤ 0xffff_ffff_c000_0000
//!                       │ slot 0:   user stack page       │
//!                       │ slot 1..: user image            │
//!                       │ slot 510: thread-local block    │
//!                       │ slot 511: lazily resolved page  │
//! 0xFFFF_FFFF_C020_0000 └─────────────────────────────────┘
//! ```
//!
//! The kernel is linked at its physical load address and runs out of the
//! identity map, so no higher-half alias exists.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod stage;
pub mod vectors;

/// Maximum level emitted by the kernel logger.
pub const KERNEL_LOG_LEVEL: log::LevelFilter = if cfg!(debug_assertions) {
    log::LevelFilter::Debug
} else {
    log::LevelFilter::Info
};
