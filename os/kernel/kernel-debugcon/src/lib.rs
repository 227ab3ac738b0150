//! # Debug Console Output
//!
//! Byte-wise output on I/O port `0xE9`. QEMU captures it with
//! `-debugcon stdio`, Xen HVM guests get it in the hypervisor console log,
//! and on bare metal the writes are ignored.
//!
//! Two entry points:
//! * [`DebugconLogger`], the `log` backend the kernel installs first thing.
//! * [`debugcon_trace!`], raw formatted output that bypasses `log` (panics,
//!   trap paths that must not depend on the logger).
//!
//! Without the `enabled` feature both compile to no-ops.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::{DebugconLogger, write_record};

/// The debug console port.
pub const DEBUGCON_PORT: u16 = 0xE9;

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod port {
    use core::fmt::{self, Write};

    #[allow(clippy::inline_always)]
    #[inline(always)]
    fn putc(c: u8) {
        unsafe {
            core::arch::asm!(
            "out dx, al",
            in("dx") crate::DEBUGCON_PORT,
            in("al") c,
            options(nomem, nostack, preserves_flags)
            );
        }
    }

    /// `fmt::Write` onto the debug console port.
    pub struct PortSink;

    impl Write for PortSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(putc);
            Ok(())
        }
    }

    #[inline]
    pub fn write(args: fmt::Arguments) {
        // Best effort.
        let _ = fmt::write(&mut PortSink, args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod port {
    use core::fmt;

    /// Discards everything.
    pub struct PortSink;

    impl fmt::Write for PortSink {
        #[inline]
        fn write_str(&mut self, _: &str) -> fmt::Result {
            Ok(())
        }
    }

    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn write(_: fmt::Arguments) {}
}

/// Formats straight onto the debug console port.
#[macro_export]
macro_rules! debugcon_trace {
    ($($arg:tt)*) => {{
        $crate::port::write(core::format_args!($($arg)*));
    }};
}
