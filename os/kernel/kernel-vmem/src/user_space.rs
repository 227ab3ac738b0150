use crate::{
    AddressSpace, KernelSpace, PageEntryBits, PagingRoot, PhysMapper, TableArena, TableRole,
    UserLayout, VmemError,
};
use kernel_info::memory::{
    ENTRIES_PER_TABLE, LAZY_SLOT, TLS_SLOT, USER_IMAGE_MAX_PAGES, USER_IMAGE_SLOT, USER_STACK_SLOT,
};
use kernel_memory_addresses::PhysicalAddress;

/// The loaded user program: physically contiguous pages.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UserImage {
    pub base: PhysicalAddress,
    pub pages: usize,
}

/// The kernel+user address space.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UserSpace {
    top: PhysicalAddress,
    layout: UserLayout,
}

/// The two single-slot rewrites performed on the live user entry table.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SlotRemap {
    /// Point the lazy sentinel slot at the lazy backing page (page-fault path).
    LazyPage,
    /// Point the thread-local slot at the thread-local block.
    ThreadLocal,
}

impl SlotRemap {
    #[must_use]
    pub const fn slot(self) -> usize {
        match self {
            Self::LazyPage => LAZY_SLOT,
            Self::ThreadLocal => TLS_SLOT,
        }
    }

    #[must_use]
    pub const fn target(self, layout: &UserLayout) -> PhysicalAddress {
        match self {
            Self::LazyPage => layout.lazy_page(),
            Self::ThreadLocal => layout.tls_page(),
        }
    }
}

impl UserSpace {
    #[must_use]
    pub const fn address_space(&self) -> AddressSpace {
        AddressSpace::new(self.top)
    }

    #[must_use]
    pub const fn layout(&self) -> &UserLayout {
        &self.layout
    }

    /// Rewrites one user entry slot and reloads the paging root.
    ///
    /// The written value depends only on the layout, so repeating the call
    /// leaves the table unchanged. A slot that already maps some other page
    /// (an image page, for a full-size image) is left alone.
    ///
    /// # Errors
    /// [`VmemError::SlotOccupied`] when the slot maps another frame.
    ///
    /// # Safety
    /// `self` must be the space currently loaded in `root` (or about to be),
    /// built in `arena`.
    pub unsafe fn remap<M: PhysMapper, R: PagingRoot>(
        &self,
        arena: &TableArena<'_, M>,
        remap: SlotRemap,
        root: &mut R,
    ) -> Result<PageEntryBits, VmemError> {
        let target = remap.target(&self.layout);
        let slot = remap.slot();
        let current = arena.read(TableRole::UserEntries, slot)?;
        if current.present() && current.physical_address() != target {
            return Err(VmemError::SlotOccupied {
                slot,
                mapped: current.physical_address(),
            });
        }

        let entry = PageEntryBits::user(target);
        arena.write(TableRole::UserEntries, slot, entry)?;
        unsafe { self.address_space().activate(root) };
        Ok(entry)
    }
}

/// Builds the kernel+user tables on top of an already built kernel space.
///
/// Slot 0 maps the stack page, slots `1..=pages` map the image, every other
/// slot is zero except the lazy sentinel in slot 511. The image size is
/// validated before any entry is written.
pub fn build_user_space<M: PhysMapper>(
    arena: &mut TableArena<'_, M>,
    kernel: &KernelSpace,
    image: UserImage,
) -> Result<UserSpace, VmemError> {
    if image.pages == 0 {
        return Err(VmemError::EmptyImage);
    }
    if image.pages > USER_IMAGE_MAX_PAGES {
        return Err(VmemError::ImageTooLarge {
            pages: image.pages,
            max: USER_IMAGE_MAX_PAGES,
        });
    }
    if !image.base.is_page_aligned() {
        return Err(VmemError::Misaligned(image.base));
    }

    let layout = *arena.user_layout();
    let image_slots = USER_IMAGE_SLOT..USER_IMAGE_SLOT + image.pages;
    arena.fill(TableRole::UserEntries, |i| match i {
        USER_STACK_SLOT => PageEntryBits::user(layout.stack_page()),
        LAZY_SLOT => PageEntryBits::lazy_sentinel(),
        i if image_slots.contains(&i) => {
            PageEntryBits::user(image.base.add_pages((i - USER_IMAGE_SLOT) as u64))
        }
        _ => PageEntryBits::new(),
    });

    let entries = arena.phys(TableRole::UserEntries);
    arena.fill(TableRole::UserDirectory, |i| {
        if i == 0 {
            PageEntryBits::user(entries)
        } else {
            PageEntryBits::new()
        }
    });

    let directory = arena.phys(TableRole::UserDirectory);
    arena.fill(TableRole::UserDirectoryPointer, |i| {
        if i == ENTRIES_PER_TABLE - 1 {
            PageEntryBits::user(directory)
        } else {
            PageEntryBits::new()
        }
    });

    let directory_pointer = arena.phys(TableRole::UserDirectoryPointer);
    let shared_kernel = kernel.directory_pointer();
    arena.fill(TableRole::UserTop, |i| match i {
        0 => PageEntryBits::kernel(shared_kernel),
        i if i == ENTRIES_PER_TABLE - 1 => PageEntryBits::user(directory_pointer),
        _ => PageEntryBits::new(),
    });

    let top = arena.phys(TableRole::UserTop);
    log::debug!("user space: {} image pages, top at {top:?}", image.pages);
    Ok(UserSpace { top, layout })
}
