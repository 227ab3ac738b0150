//! The paging root.

use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// CR3: Page-Map Level-4 Base Register (IA-32e, PCID disabled).
///
/// Writing CR3 switches the active address space and flushes every
/// non-global translation in one step.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct Cr3 {
    /// Bits 0–2: reserved.
    #[bits(3)]
    reserved0: u8,

    /// Bit 3: page-level write-through for the PML4 walk.
    pub pwt: bool,

    /// Bit 4: page-level cache disable for the PML4 walk.
    pub pcd: bool,

    /// Bits 5–11: reserved.
    #[bits(7)]
    reserved1: u8,

    /// Bits 12–51: PML4 physical base >> 12.
    #[bits(40)]
    pml4_base_4k: u64,

    /// Bits 52–63: reserved.
    #[bits(12)]
    reserved2: u16,
}

impl Cr3 {
    /// Write-back caching, no PCID. The only form the kernel loads.
    ///
    /// `pml4_phys` must be 4 KiB-aligned; the low bits are dropped otherwise.
    #[must_use]
    pub const fn from_pml4_phys(pml4_phys: PhysicalAddress) -> Self {
        Self::new().with_pml4_base_4k(pml4_phys.as_u64() >> 12)
    }

    #[must_use]
    pub const fn pml4_phys(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.pml4_base_4k() << 12)
    }
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let mut cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}
