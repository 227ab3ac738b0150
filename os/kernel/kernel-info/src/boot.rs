//! # Kernel Boot Information

use kernel_memory_addresses::PhysicalAddress;

/// Kernel entry point as called by the loader.
///
/// The loader has already exited firmware services and left the CPU in long
/// mode with an identity mapping covering the kernel image and every region
/// named in [`KernelBootInfo`].
pub type KernelEntryFn = extern "sysv64" fn(*const KernelBootInfo) -> !;

/// Physical memory the loader reserved for the kernel core.
///
/// Keep this `#[repr(C)]` with fixed-size integers; it crosses a binary
/// boundary.
#[repr(C)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KernelBootInfo {
    /// Base of the kernel page-table arena,
    /// [`KERNEL_TABLE_FRAMES`](crate::memory::KERNEL_TABLE_FRAMES) frames.
    pub kernel_tables: u64,

    /// Base of the user region. The user stack page sits one page below it.
    /// See [`memory::user`](crate::memory::user) for the offsets inside.
    pub user_region: u64,

    /// First physical page of the loaded user image.
    pub user_image: u64,

    /// Number of pages in the user image.
    pub user_image_pages: u64,

    /// Entry point as an offset from the first image byte.
    pub user_entry_offset: u64,
}

impl KernelBootInfo {
    #[must_use]
    pub const fn kernel_tables(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.kernel_tables)
    }

    #[must_use]
    pub const fn user_region(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.user_region)
    }

    #[must_use]
    pub const fn user_image(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.user_image)
    }
}
