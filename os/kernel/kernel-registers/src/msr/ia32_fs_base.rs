//! Provides the [`Ia32FsBase`] type.

use crate::msr::Msr;
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;

/// Model-Specific Register: current **FS base address** (MSR `0xC000_0100`).
///
/// `fs:`-relative memory references resolve against this value. The kernel
/// points it at the thread-local block whose first word is its own address.
#[bitfield(u64, order = Lsb)]
pub struct Ia32FsBase {
    #[bits(64)]
    pub base: VirtualAddress,
}

impl Ia32FsBase {
    pub const IA32_FS_BASE: u32 = 0xC000_0100;
    pub const MSR: Msr = Msr::new(Self::IA32_FS_BASE);

    /// `None` for non-canonical addresses, which `WRMSR` would reject with `#GP`.
    #[must_use]
    pub const fn for_block(base: VirtualAddress) -> Option<Self> {
        if base.is_canonical() {
            Some(Self::new().with_base(base))
        } else {
            None
        }
    }
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Ia32FsBase {
    #[inline(always)]
    #[allow(clippy::inline_always)]
    unsafe fn load_unsafe() -> Self {
        let msr = unsafe { Self::MSR.load_raw() };
        Self::from_bits(msr)
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Ia32FsBase {
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
    fn rejects_non_canonical_bases() {
        assert!(Ia32FsBase::for_block(VirtualAddress::new(0x0000_8000_0000_0000)).is_none());
        let fs = Ia32FsBase::for_block(VirtualAddress::new(0xFFFF_FFFF_C01F_E000));
        assert_eq!(fs.map(Ia32FsBase::into_bits), Some(0xFFFF_FFFF_C01F_E000));
    }
}
