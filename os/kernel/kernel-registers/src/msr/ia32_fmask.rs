use crate::msr::Msr;
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// `IA32_FMASK`: `RFLAGS` mask for `syscall` (MSR `0xC000_0084`).
///
/// On `syscall` the CPU computes `RFLAGS := RFLAGS & !IA32_FMASK`, so every
/// bit set here is cleared on kernel entry.
#[bitfield(u64, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct Ia32Fmask {
    /// Bits 0–7: arithmetic flags, left alone.
    #[bits(8)]
    arithmetic: u8,

    /// Bit 8: TF.
    pub tf_trap: bool,

    /// Bit 9: IF. Set so the handler runs with external interrupts masked.
    pub if_interrupt_enable: bool,

    /// Bit 10: DF.
    pub df_direction: bool,

    /// Bits 11–17.
    #[bits(7)]
    other: u8,

    /// Bit 18: AC.
    pub ac_alignment_check: bool,

    /// Bits 19–63: must stay zero.
    #[bits(45)]
    reserved: u64,
}

impl Ia32Fmask {
    pub const IA32_FMASK: u32 = 0xC000_0084;
    pub const MSR: Msr = Msr::new(Self::IA32_FMASK);

    /// Mask IF only: the syscall handler is non-reentrant and must not be
    /// interrupted before it has switched stacks.
    #[must_use]
    pub const fn interrupts_masked() -> Self {
        Self::new().with_if_interrupt_enable(true)
    }
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Ia32Fmask {
    #[inline(always)]
    #[allow(clippy::inline_always)]
    unsafe fn load_unsafe() -> Self {
        let msr = unsafe { Self::MSR.load_raw() };
        Self::from_bits(msr)
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Ia32Fmask {
    #[inline(always)]
    #[allow(clippy::inline_always)]
    unsafe fn store_unsafe(self) {
        unsafe { Self::MSR.store_raw(self.into_bits()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_only_the_interrupt_flag() {
        assert_eq!(Ia32Fmask::interrupts_masked().into_bits(), 1 << 9);
    }
}
