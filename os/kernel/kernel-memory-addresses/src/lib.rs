//! # Physical and Virtual Address Types
//!
//! Zero-cost wrappers that keep physical addresses, virtual addresses and
//! frame numbers apart at compile time. Everything here is 4 KiB granular:
//! the kernel core only ever maps 4 KiB pages.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | Guest-physical memory (RAM, MMIO, hypervisor-shared pages). |
//! | [`VirtualAddress`] | Address translated through the active page tables. |
//! | [`FrameNumber`] | A physical address shifted right by [`PAGE_SHIFT`] (a "PFN"/"GPFN"). |
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0010_3000);
//! assert!(pa.is_page_aligned());
//! assert_eq!(pa.frame().as_u64(), 0x103);
//! assert_eq!(PhysicalAddress::from(pa.frame()), pa);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod frame_number;
mod physical_address;
mod virtual_address;

pub use frame_number::FrameNumber;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Size of a base page in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/// Converts a pointer to its integer address in a `const` context.
#[inline]
pub(crate) const fn ptr_to_u64<T>(ptr: *const T) -> u64 {
    const _: () = assert!(
        size_of::<*const ()>() == size_of::<u64>(),
        "pointer size mismatch"
    );

    // using a union to const-time convert a pointer to an u64
    union Ptr<T> {
        ptr: *const T,
        raw: u64,
    }

    let ptr = Ptr { ptr };
    unsafe { ptr.raw }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_helpers_on_physical_addresses() {
        let pa = PhysicalAddress::new(0x1234_5678);
        assert!(!pa.is_page_aligned());
        assert!(PhysicalAddress::new(0x1234_5000).is_page_aligned());
        assert_eq!(pa.frame(), FrameNumber::new(0x12345));
    }

    #[test]
    fn pages_advance_by_whole_frames() {
        let pa = PhysicalAddress::new(0x8000);
        assert_eq!(pa.add_pages(3), PhysicalAddress::new(0xB000));
        assert_eq!(pa.sub_pages(1), Some(PhysicalAddress::new(0x7000)));
        assert_eq!(PhysicalAddress::new(0).sub_pages(1), None);
    }

    #[test]
    fn frame_number_round_trip() {
        let frame = FrameNumber::new(0xFEE00);
        assert_eq!(frame.base(), PhysicalAddress::new(0xFEE0_0000));
        assert_eq!(frame.add(1).as_u64(), 0xFEE01);
    }

    #[test]
    fn virtual_addresses_index_page_table_levels() {
        let va = VirtualAddress::new(0xFFFF_FFFF_C01F_E000);
        assert_eq!(va.pml4_index(), 511);
        assert_eq!(va.pdpt_index(), 511);
        assert_eq!(va.pd_index(), 0);
        assert_eq!(va.pt_index(), 510);
        assert!(va.is_canonical());
        assert!(!VirtualAddress::new(0x0000_8000_0000_0000).is_canonical());
    }

    #[test]
    fn debug_formatting_names_the_space() {
        assert_eq!(
            format!("{:?}", PhysicalAddress::new(0x1000)),
            "PA(0x0000000000001000)"
        );
        assert_eq!(
            format!("{:?}", VirtualAddress::new(0x1000)),
            "VA(0x0000000000001000)"
        );
        assert_eq!(format!("{:?}", FrameNumber::new(0x1)), "PFN(0x1)");
    }
}
