//! Page-table levels addressed by role.

use crate::{PageEntryBits, PhysMapper, UserLayout, VmemError};
use kernel_info::memory::{
    ENTRIES_PER_TABLE, KERNEL_DIRECTORY_ENTRIES, KERNEL_LEAF_ENTRIES, KERNEL_TABLE_FRAMES, user,
};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};

/// Every paging level the kernel core owns.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TableRole {
    /// 1:1 leaf entries for the first 4 GiB (2048 frames).
    KernelEntries,
    /// 2048 directory entries (4 frames).
    KernelDirectory,
    KernelDirectoryPointer,
    KernelTop,
    UserEntries,
    UserDirectory,
    UserDirectoryPointer,
    UserTop,
}

impl TableRole {
    pub const ALL: [Self; 8] = [
        Self::KernelEntries,
        Self::KernelDirectory,
        Self::KernelDirectoryPointer,
        Self::KernelTop,
        Self::UserEntries,
        Self::UserDirectory,
        Self::UserDirectoryPointer,
        Self::UserTop,
    ];

    /// Number of 8-byte entries in this level.
    #[must_use]
    pub const fn len(self) -> usize {
        match self {
            Self::KernelEntries => KERNEL_LEAF_ENTRIES,
            Self::KernelDirectory => KERNEL_DIRECTORY_ENTRIES,
            _ => ENTRIES_PER_TABLE,
        }
    }

    /// Number of frames the level occupies.
    #[must_use]
    pub const fn frames(self) -> u64 {
        (self.len() as u64 * 8).div_ceil(PAGE_SIZE)
    }

    #[must_use]
    pub const fn is_user(self) -> bool {
        matches!(
            self,
            Self::UserEntries | Self::UserDirectory | Self::UserDirectoryPointer | Self::UserTop
        )
    }

    /// Page offset from the owning region's base.
    const fn frame_offset(self) -> u64 {
        const DIRECTORY: u64 = (KERNEL_LEAF_ENTRIES / ENTRIES_PER_TABLE) as u64;
        const DIRECTORY_POINTER: u64 = DIRECTORY + (KERNEL_DIRECTORY_ENTRIES / ENTRIES_PER_TABLE) as u64;
        match self {
            Self::KernelEntries => 0,
            Self::KernelDirectory => DIRECTORY,
            Self::KernelDirectoryPointer => DIRECTORY_POINTER,
            Self::KernelTop => DIRECTORY_POINTER + 1,
            Self::UserEntries => user::ENTRIES,
            Self::UserDirectory => user::DIRECTORY,
            Self::UserDirectoryPointer => user::DIRECTORY_POINTER,
            Self::UserTop => user::TOP,
        }
    }
}

const _: () = assert!(TableRole::KernelTop.frame_offset() + 1 == KERNEL_TABLE_FRAMES);

/// Backing storage for all paging levels.
///
/// The kernel levels are packed back to back from `kernel`; the user levels
/// sit at fixed offsets inside the [`UserLayout`].
///
/// Entries are read and written with volatile accesses through the mapper:
/// the tables are shared with the MMU and never borrowed as Rust slices.
/// Bulk construction takes `&mut self`. Single-slot reads and writes take
/// `&self` because trap handlers edit live tables through the shared boot
/// context.
pub struct TableArena<'m, M: PhysMapper> {
    mapper: &'m M,
    kernel: PhysicalAddress,
    user: UserLayout,
}

impl<'m, M: PhysMapper> TableArena<'m, M> {
    /// # Safety
    /// The caller hands over exclusive use of
    /// [`KERNEL_TABLE_FRAMES`] frames at `kernel` and of the user region
    /// described by `user`, all reachable through `mapper`.
    pub unsafe fn new(
        mapper: &'m M,
        kernel: PhysicalAddress,
        user: UserLayout,
    ) -> Result<Self, VmemError> {
        if !kernel.is_page_aligned() {
            return Err(VmemError::Misaligned(kernel));
        }

        let kernel_end = kernel.add_pages(KERNEL_TABLE_FRAMES);
        if kernel < user.end() && user.stack_page() < kernel_end {
            return Err(VmemError::Overlap);
        }

        Ok(Self {
            mapper,
            kernel,
            user,
        })
    }

    #[must_use]
    pub const fn user_layout(&self) -> &UserLayout {
        &self.user
    }

    /// Physical base of the level.
    #[must_use]
    pub const fn phys(&self, role: TableRole) -> PhysicalAddress {
        let base = if role.is_user() {
            self.user.base()
        } else {
            self.kernel
        };
        base.add_pages(role.frame_offset())
    }

    fn slot_ptr(&self, role: TableRole, index: usize) -> Result<*mut u64, VmemError> {
        if index >= role.len() {
            return Err(VmemError::SlotOutOfRange { role, index });
        }
        let pa = self.phys(role) + (index * size_of::<u64>()) as u64;
        // SAFETY: in bounds of the level; the constructor's contract covers the region.
        Ok(unsafe { self.mapper.phys_to_ptr(pa) }.cast::<u64>())
    }

    pub fn read(&self, role: TableRole, index: usize) -> Result<PageEntryBits, VmemError> {
        let ptr = self.slot_ptr(role, index)?;
        Ok(PageEntryBits::from_bits(unsafe { ptr.read_volatile() }))
    }

    pub fn write(
        &self,
        role: TableRole,
        index: usize,
        entry: PageEntryBits,
    ) -> Result<(), VmemError> {
        let ptr = self.slot_ptr(role, index)?;
        unsafe { ptr.write_volatile(entry.into_bits()) };
        Ok(())
    }

    /// Writes every slot of `role` with `entry_for(index)`.
    pub fn fill(&mut self, role: TableRole, mut entry_for: impl FnMut(usize) -> PageEntryBits) {
        let base = self.phys(role);
        let mut pa = base;
        for index in 0..role.len() {
            let ptr = unsafe { self.mapper.phys_to_ptr(pa) }.cast::<u64>();
            unsafe { ptr.write_volatile(entry_for(index).into_bits()) };
            pa += size_of::<u64>() as u64;
        }
        debug_assert_eq!(pa.as_u64() - base.as_u64(), (role.len() * 8) as u64);
    }

    /// Zeroes every slot of `role`.
    pub fn clear(&mut self, role: TableRole) {
        self.fill(role, |_| PageEntryBits::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{KERNEL_BASE, USER_BASE, arena, layout, memory};

    #[test]
    fn roles_are_placed_back_to_back() {
        let phys = memory();
        let arena = arena(&phys);
        assert_eq!(arena.phys(TableRole::KernelEntries).as_u64(), KERNEL_BASE);
        assert_eq!(
            arena.phys(TableRole::KernelDirectory).as_u64(),
            KERNEL_BASE + 2048 * PAGE_SIZE
        );
        assert_eq!(
            arena.phys(TableRole::KernelDirectoryPointer).as_u64(),
            KERNEL_BASE + 2052 * PAGE_SIZE
        );
        assert_eq!(
            arena.phys(TableRole::KernelTop).as_u64(),
            KERNEL_BASE + 2053 * PAGE_SIZE
        );
        assert_eq!(arena.phys(TableRole::UserEntries).as_u64(), USER_BASE);
        assert_eq!(arena.phys(TableRole::UserTop).as_u64(), USER_BASE + 0x3000);

        let frames: u64 = TableRole::ALL
            .iter()
            .filter(|r| !r.is_user())
            .map(|r| r.frames())
            .sum();
        assert_eq!(frames, KERNEL_TABLE_FRAMES);
    }

    #[test]
    fn slot_access_is_bounds_checked() {
        let phys = memory();
        let arena = arena(&phys);
        assert_eq!(
            arena.read(TableRole::UserEntries, 512),
            Err(VmemError::SlotOutOfRange {
                role: TableRole::UserEntries,
                index: 512
            })
        );
        assert!(arena.read(TableRole::KernelDirectory, 2047).is_ok());
        assert!(arena.write(TableRole::KernelDirectory, 2048, PageEntryBits::new()).is_err());
    }

    #[test]
    fn writes_land_in_the_addressed_slot() {
        let phys = memory();
        let arena = arena(&phys);
        let entry = PageEntryBits::user(PhysicalAddress::new(0x7000));
        arena.write(TableRole::UserDirectory, 3, entry).expect("in range");
        assert_eq!(arena.read(TableRole::UserDirectory, 3), Ok(entry));
        assert_eq!(
            arena.read(TableRole::UserDirectory, 2),
            Ok(PageEntryBits::new())
        );
    }

    #[test]
    fn overlapping_regions_are_rejected() {
        let phys = memory();
        let overlapping = UserLayout::new(PhysicalAddress::new(KERNEL_BASE + PAGE_SIZE)).expect("aligned");
        let result = unsafe { TableArena::new(&phys, PhysicalAddress::new(KERNEL_BASE), overlapping) };
        assert!(matches!(result, Err(VmemError::Overlap)));

        let misaligned =
            unsafe { TableArena::new(&phys, PhysicalAddress::new(KERNEL_BASE + 8), layout()) };
        assert!(matches!(misaligned, Err(VmemError::Misaligned(_))));
    }
}
