//! # Virtual Memory Support
//!
//! Builds the two address spaces of the kernel core out of raw physical
//! memory handed over by the loader:
//!
//! * **kernel-only**: a 1:1 map of the first 4 GiB, supervisor `P|RW`.
//! * **kernel+user**: a fresh top-level table whose slot 0 references the
//!   kernel's directory-pointer table and whose slot 511 leads to a single
//!   2 MiB user window at `0xFFFF_FFFF_C000_0000`.
//!
//! ```text
//!  user top ──[0]──► kernel directory-pointer ──[0..4]──► kernel directory ──► kernel entries (1 GiB each)
//!           └─[511]─► user directory-pointer ──[511]──► user directory ──[0]──► user entries
//!                                                                              ├ [0]   stack page
//!                                                                              ├ [1..] image pages
//!                                                                              ├ [510] thread-local block
//!                                                                              └ [511] lazy sentinel
//! ```
//!
//! Every level lives in a [`TableArena`] slot named by a [`TableRole`].
//! Builders never compute table addresses by hand, and every entry access
//! is bounds-checked against its role's length.
//!
//! Activation is a separate step ([`AddressSpace::activate`]) that goes
//! through a [`PagingRoot`], so the whole module can be exercised on the
//! host against fake physical memory.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod address_space;
mod arena;
mod kernel_space;
mod page_entry_bits;
mod user_layout;
mod user_space;

pub use crate::address_space::{AddressSpace, Cr3Root, PagingRoot};
pub use crate::arena::{TableArena, TableRole};
pub use crate::kernel_space::{KernelSpace, build_kernel_space};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::user_layout::UserLayout;
pub use crate::user_space::{SlotRemap, UserImage, UserSpace, build_user_space};

use kernel_memory_addresses::PhysicalAddress;

/// Converts physical addresses to pointers usable in the current address
/// space (identity map in the kernel, a host buffer in tests).
pub trait PhysMapper {
    /// # Safety
    /// `pa` must be backed by memory that stays mapped and writable through
    /// this mapper for as long as the returned pointer is used.
    unsafe fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8;
}

/// Errors from building or editing page tables.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmemError {
    #[error("{0:?} is not 4 KiB aligned")]
    Misaligned(PhysicalAddress),
    #[error("slot {index} is outside the {role:?} table")]
    SlotOutOfRange { role: TableRole, index: usize },
    #[error("kernel and user table regions overlap")]
    Overlap,
    #[error("user image of {pages} pages exceeds {max} slots")]
    ImageTooLarge { pages: usize, max: usize },
    #[error("user image is empty")]
    EmptyImage,
    #[error("user slot {slot} already maps {mapped:?}")]
    SlotOccupied { slot: usize, mapped: PhysicalAddress },
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use kernel_info::memory::{KERNEL_TABLE_FRAMES, user};
    use kernel_memory_addresses::PAGE_SIZE;

    /// A 4 KiB-aligned raw frame. We use this as our "physical RAM" backing store in tests.
    #[repr(C, align(4096))]
    pub struct Aligned4K([u8; 4096]);

    /// Simulated physical memory starting at address 0.
    ///
    /// The pointer is taken once from the owned buffer so all writes go
    /// through the same provenance.
    pub struct TestPhys {
        frames: Vec<Aligned4K>,
        base: *mut u8,
    }

    impl TestPhys {
        pub fn with_frames(n: usize) -> Self {
            let mut frames = Vec::with_capacity(n);
            for _ in 0..n {
                frames.push(Aligned4K([0u8; 4096]));
            }
            let base = frames.as_mut_ptr().cast::<u8>();
            Self { frames, base }
        }

        pub fn len_bytes(&self) -> u64 {
            self.frames.len() as u64 * PAGE_SIZE
        }
    }

    impl PhysMapper for TestPhys {
        unsafe fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
            assert!(pa.as_u64() < self.len_bytes(), "{pa:?} outside test memory");
            #[allow(clippy::cast_possible_truncation)]
            unsafe {
                self.base.add(pa.as_u64() as usize)
            }
        }
    }

    /// Kernel arena at frame 1, user region right after it (one stack page
    /// in between).
    pub const KERNEL_BASE: u64 = PAGE_SIZE;
    pub const USER_BASE: u64 = KERNEL_BASE + (KERNEL_TABLE_FRAMES + 1) * PAGE_SIZE;
    /// A small fake user image after the user region.
    pub const IMAGE_BASE: u64 = USER_BASE + user::PAGES * PAGE_SIZE;
    #[allow(clippy::cast_possible_truncation)]
    pub const TOTAL_FRAMES: usize = (IMAGE_BASE / PAGE_SIZE) as usize + 16;

    pub fn memory() -> TestPhys {
        TestPhys::with_frames(TOTAL_FRAMES)
    }

    pub fn layout() -> UserLayout {
        UserLayout::new(PhysicalAddress::new(USER_BASE)).expect("aligned")
    }

    pub fn arena(phys: &TestPhys) -> TableArena<'_, TestPhys> {
        unsafe { TableArena::new(phys, PhysicalAddress::new(KERNEL_BASE), layout()) }
            .expect("valid arena")
    }

    /// Records every root that would have been written to CR3.
    #[derive(Default)]
    pub struct RecordingRoot {
        pub loads: Vec<PhysicalAddress>,
    }

    impl PagingRoot for RecordingRoot {
        unsafe fn load(&mut self, top: PhysicalAddress) {
            self.loads.push(top);
        }
    }
}
