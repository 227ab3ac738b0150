//! # System Call Numbers and Dispatch
//!
//! The register contract of the `syscall` entry stub:
//!
//! | Register | Meaning |
//! |----------|---------|
//! | `rdi` | call number |
//! | `rsi`, `rdx`, `r10`, `r8`, `r9` | arguments 1..=5 |
//! | `rax` | return value, `0` on success, a negative errno otherwise |
//!
//! Dispatch is a fixed numeric match. Anything the kernel has to do on
//! behalf of a call goes through a [`SyscallHost`], so the table can be
//! exercised without hardware.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

use core::ffi::{CStr, c_char};

/// Known call numbers.
#[repr(u64)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Sysno {
    /// Print a NUL-terminated string. Argument 1 is the pointer.
    PrintCStr = 1,
}

impl TryFrom<u64> for Sysno {
    type Error = SyscallError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::PrintCStr),
            other => Err(SyscallError::Unknown(other)),
        }
    }
}

/// The five argument registers in call order.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct SyscallArgs(pub [u64; 5]);

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SyscallError {
    #[error("unknown system call {0}")]
    Unknown(u64),
    #[error("null pointer argument")]
    NullPointer,
    #[error("string argument is not valid UTF-8")]
    InvalidUtf8,
}

impl SyscallError {
    /// Value placed in `rax`.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Unknown(_) => -38,   // ENOSYS
            Self::NullPointer => -14,  // EFAULT
            Self::InvalidUtf8 => -22,  // EINVAL
        }
    }
}

/// Kernel services a system call may use.
pub trait SyscallHost {
    fn print(&mut self, text: &str);
}

/// Runs call `sysno` and returns the value for `rax`.
///
/// # Safety
/// Pointer arguments are dereferenced as-is: for [`Sysno::PrintCStr`] a
/// non-null argument must point to a NUL-terminated string readable in the
/// current address space.
pub unsafe fn dispatch<H: SyscallHost>(host: &mut H, sysno: u64, args: SyscallArgs) -> i64 {
    match unsafe { try_dispatch(host, sysno, args) } {
        Ok(()) => 0,
        Err(e) => {
            log::debug!("syscall {sysno} failed: {e}");
            e.code()
        }
    }
}

/// Like [`dispatch`] but keeps the error typed.
///
/// # Safety
/// See [`dispatch`].
pub unsafe fn try_dispatch<H: SyscallHost>(
    host: &mut H,
    sysno: u64,
    args: SyscallArgs,
) -> Result<(), SyscallError> {
    match Sysno::try_from(sysno)? {
        Sysno::PrintCStr => {
            let text = unsafe { user_c_str(args.0[0]) }?;
            host.print(text);
            Ok(())
        }
    }
}

/// # Safety
/// See [`dispatch`].
unsafe fn user_c_str<'a>(addr: u64) -> Result<&'a str, SyscallError> {
    if addr == 0 {
        return Err(SyscallError::NullPointer);
    }
    let s = unsafe { CStr::from_ptr(addr as *const c_char) };
    s.to_str().map_err(|_| SyscallError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Console {
        lines: Vec<String>,
    }

    impl SyscallHost for Console {
        fn print(&mut self, text: &str) {
            self.lines.push(text.to_owned());
        }
    }

    fn args_with(ptr: *const c_char) -> SyscallArgs {
        SyscallArgs([ptr as u64, 0, 0, 0, 0])
    }

    #[test]
    fn print_returns_success_and_prints() {
        let mut console = Console::default();
        let text = c"Hello from ring 3";
        let rax = unsafe { dispatch(&mut console, 1, args_with(text.as_ptr())) };
        assert_eq!(rax, 0);
        assert_eq!(console.lines, ["Hello from ring 3"]);
    }

    #[test]
    fn unknown_numbers_fail_without_side_effects() {
        let mut console = Console::default();
        for sysno in [0, 2, 60, u64::MAX] {
            let rax = unsafe { dispatch(&mut console, sysno, args_with(c"x".as_ptr())) };
            assert_ne!(rax, 0);
            assert_eq!(rax, -38);
        }
        assert!(console.lines.is_empty());
    }

    #[test]
    fn null_and_invalid_strings_are_rejected() {
        let mut console = Console::default();
        let rax = unsafe { dispatch(&mut console, 1, SyscallArgs::default()) };
        assert_eq!(rax, SyscallError::NullPointer.code());

        let bad = [0xFFu8, 0xFE, 0x00];
        let result = unsafe { try_dispatch(&mut console, 1, args_with(bad.as_ptr().cast())) };
        assert_eq!(result, Err(SyscallError::InvalidUtf8));
        assert!(console.lines.is_empty());
    }
}
