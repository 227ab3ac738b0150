use crate::msr::Msr;
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// `IA32_EFER` (MSR `0xC000_0080`).
///
/// Only the architectural bits the kernel touches are named. Everything else
/// is carried through untouched by read-modify-write.
#[bitfield(u64, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct Efer {
    /// Bit 0: SCE, enables `SYSCALL`/`SYSRET`.
    pub sce: bool,

    /// Bits 1–7.
    #[bits(7)]
    pub other_low: u8,

    /// Bit 8: LME, long mode enable.
    pub lme: bool,

    /// Bit 9.
    pub reserved: bool,

    /// Bit 10: LMA, long mode active (read-only).
    pub lma: bool,

    /// Bit 11: NXE, honour the NX page-table bit.
    pub nxe: bool,

    /// Bits 12–63.
    #[bits(52)]
    pub other_high: u64,
}

impl Efer {
    /// MSR index for `IA32_EFER`.
    pub const MSR_EFER: u32 = 0xC000_0080;
    pub const MSR: Msr = Msr::new(Self::MSR_EFER);
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Efer {
    unsafe fn load_unsafe() -> Self {
        Self::from_bits(unsafe { Self::MSR.load_raw() })
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Efer {
    unsafe fn store_unsafe(self) {
        unsafe { Self::MSR.store_raw(self.into_bits()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabling_sce_preserves_long_mode_bits() {
        let efer = Efer::from_bits(0x0D00).with_sce(true);
        assert_eq!(efer.into_bits(), 0x0D01);
        assert!(efer.lme() && efer.lma() && efer.nxe());
    }
}
