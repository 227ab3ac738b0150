use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// A single 64-bit x86-64 paging-structure entry.
///
/// The same layout serves all four levels. The kernel core only ever builds
/// 4 KiB mappings, so `large_page` stays clear everywhere.
///
/// | Bits  | Field | Meaning |
/// |-------|-------|---------|
/// | 0     | P     | present |
/// | 1     | RW    | writable |
/// | 2     | US    | user accessible |
/// | 3–8   |       | caching, accessed, dirty, PS, global |
/// | 9–11  |       | available to software |
/// | 12–51 | addr  | physical frame |
/// | 52–62 |       | available / protection key |
/// | 63    | NX    | execute disable |
///
/// An all-zero entry means "not mapped".
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on leaf writes.
    pub dirty: bool,

    /// Page Size (PS, bit 7).
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// Bits 9..=11.
    #[bits(3)]
    pub os_available_low: u8,

    /// Physical address bits [51:12].
    #[bits(40)]
    phys_addr_bits_51_12: u64,

    /// Bits 52..=58.
    #[bits(7)]
    pub os_available_high: u8,

    /// Bits 59..=62.
    #[bits(4)]
    pub protection_key: u8,

    /// No-Execute (NX, bit 63).
    pub no_execute: bool,
}

impl PageEntryBits {
    /// Flag bits the builders ever set.
    pub const DEFINED_FLAGS: u64 = 0b111;

    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_phys_addr_bits_51_12(phys.as_u64() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(self, phys: PhysicalAddress) -> Self {
        self.with_phys_addr_bits_51_12(phys.as_u64() >> 12)
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_51_12() << 12)
    }

    /// Supervisor-only, present and writable (`P|RW`).
    #[inline]
    #[must_use]
    pub const fn kernel(phys: PhysicalAddress) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_physical_address(phys)
    }

    /// Present, writable and reachable from ring 3 (`P|RW|US`).
    #[inline]
    #[must_use]
    pub const fn user(phys: PhysicalAddress) -> Self {
        Self::kernel(phys).with_user_access(true)
    }

    /// `RW|US` without `P`: faults on access, yet differs from an unmapped
    /// slot so the fault handler knows the slot is meant to be resolved.
    #[inline]
    #[must_use]
    pub const fn lazy_sentinel() -> Self {
        Self::new().with_writable(true).with_user_access(true)
    }

    #[inline]
    #[must_use]
    pub const fn is_unmapped(&self) -> bool {
        self.into_bits() == 0
    }

    /// Bits below the frame address.
    #[inline]
    #[must_use]
    pub const fn flag_bits(&self) -> u64 {
        self.into_bits() & 0xFFF
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_match_the_hardware_encoding() {
        let pa = PhysicalAddress::new(0x0012_3000);
        assert_eq!(PageEntryBits::kernel(pa).into_bits(), 0x0012_3003);
        assert_eq!(PageEntryBits::user(pa).into_bits(), 0x0012_3007);
        assert_eq!(PageEntryBits::lazy_sentinel().into_bits(), 0x6);
        assert!(!PageEntryBits::lazy_sentinel().present());
        assert!(!PageEntryBits::lazy_sentinel().is_unmapped());
    }

    #[test]
    fn physical_address_drops_the_page_offset() {
        let e = PageEntryBits::kernel(PhysicalAddress::new(0x5000));
        assert_eq!(e.physical_address(), PhysicalAddress::new(0x5000));
        assert_eq!(e.flag_bits(), 0b11);
    }
}
