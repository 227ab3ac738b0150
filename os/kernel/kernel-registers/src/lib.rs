//! # Typed `X86_64` Registers
//!
//! Bitfield views of the control registers and model-specific registers the
//! kernel core programs during boot: the paging root ([`cr3::Cr3`]), the
//! SYSCALL machinery ([`efer::Efer`], [`msr::Ia32Star`], [`msr::Ia32LStar`],
//! [`msr::Ia32Fmask`]) and the FS segment base ([`msr::Ia32FsBase`]).
//!
//! The layouts are plain data and can be built and inspected anywhere. The
//! actual register accesses are gated behind the `asm` feature.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cr3;
pub mod efer;
pub mod msr;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}
