//! # Address Space Activation
//!
//! An [`AddressSpace`] is nothing more than the physical address of a fully
//! populated top-level table. Making it current is a single write of the
//! paging root, which flushes every translation not present in the new
//! tree. Build first, activate last.

use kernel_memory_addresses::PhysicalAddress;
use kernel_registers::StoreRegisterUnsafe;
use kernel_registers::cr3::Cr3;

/// Something that can hold the paging root.
pub trait PagingRoot {
    /// # Safety
    /// `top` must be a complete top-level table that maps the code, stack
    /// and data the caller touches after the switch.
    unsafe fn load(&mut self, top: PhysicalAddress);
}

/// The CPU's CR3.
#[derive(Debug, Default, Copy, Clone)]
pub struct Cr3Root;

impl PagingRoot for Cr3Root {
    #[inline]
    unsafe fn load(&mut self, top: PhysicalAddress) {
        unsafe { Cr3::from_pml4_phys(top).store_unsafe() }
    }
}

/// A built, activatable address space.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AddressSpace {
    top: PhysicalAddress,
}

impl AddressSpace {
    pub(crate) const fn new(top: PhysicalAddress) -> Self {
        Self { top }
    }

    /// Physical address of the top-level table.
    #[must_use]
    pub const fn top(&self) -> PhysicalAddress {
        self.top
    }

    /// Loads this space into `root`.
    ///
    /// # Safety
    /// See [`PagingRoot::load`].
    pub unsafe fn activate<R: PagingRoot>(&self, root: &mut R) {
        log::trace!("activating address space rooted at {:?}", self.top);
        unsafe { root.load(self.top) };
    }
}
