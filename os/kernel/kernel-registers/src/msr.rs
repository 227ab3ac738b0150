//! # Model-Specific Registers (MSR)
//!
//! Raw `rdmsr`/`wrmsr` access plus typed views of the registers that set up
//! the `syscall` fast path and the FS base used for thread-local storage.
//!
//! Some MSR indices are not architectural but discovered at run time, e.g.
//! the hypervisor's hypercall-page register announced through CPUID. Those
//! are addressed with [`Msr::new`] directly.
//!
//! ## References
//! - Intel SDM Vol. 3, §5.8.8 "Fast System Calls in 64-Bit Mode"
//! - Intel SDM Vol. 3, §2.5.4 "FS and GS Base Address Registers"

mod ia32_fmask;
mod ia32_fs_base;
mod ia32_lstar;
mod ia32_star;

pub use ia32_fmask::Ia32Fmask;
pub use ia32_fs_base::Ia32FsBase;
pub use ia32_lstar::Ia32LStar;
pub use ia32_star::Ia32Star;

/// Identifies a **Model-Specific Register (MSR)** by its index.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Msr(pub u32);

impl Msr {
    #[inline(always)]
    #[allow(clippy::inline_always)]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline(always)]
    #[allow(clippy::inline_always)]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Write a 64-bit value to the register.
    ///
    /// # Safety
    /// - `WRMSR` is only valid at **CPL=0**; user mode gets a `#GP(0)`.
    /// - The register must exist and accept the value. Writing an invalid or
    ///   reserved MSR raises a general protection fault.
    #[cfg(feature = "asm")]
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    #[doc(alias = "write_model_specific_register")]
    pub unsafe fn store_raw(self, val: u64) {
        let lo = (val & 0xFFFF_FFFF) as u32;
        let hi = (val >> 32) as u32;
        let msr = self.raw();
        unsafe {
            core::arch::asm!(
            "wrmsr",
            in("ecx") msr,
            in("eax") lo,
            in("edx") hi,
            options(nostack, preserves_flags)
            );
        }
    }

    /// Read the 64-bit value of the register.
    ///
    /// # Safety
    /// Same requirements as [`Msr::store_raw`].
    #[cfg(feature = "asm")]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    #[doc(alias = "read_model_specific_register")]
    pub unsafe fn load_raw(self) -> u64 {
        let lo: u32;
        let hi: u32;
        let ecx = self.raw();
        unsafe {
            core::arch::asm!(
            "rdmsr",
            in("ecx") ecx,
            out("eax") lo,
            out("edx") hi,
            options(nomem, nostack, preserves_flags)
            );
        }
        (u64::from(hi) << 32) | u64::from(lo)
    }
}
