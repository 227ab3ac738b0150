use crate::{AddressSpace, PageEntryBits, PhysMapper, TableArena, TableRole};
use kernel_info::memory::KERNEL_DIRECTORY_POINTER_SLOTS;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};

/// The kernel-only address space.
///
/// Obtaining one is the only way to build the kernel+user space, whose top
/// level references (never copies) the kernel directory-pointer table.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelSpace {
    top: PhysicalAddress,
    directory_pointer: PhysicalAddress,
}

impl KernelSpace {
    #[must_use]
    pub const fn address_space(&self) -> AddressSpace {
        AddressSpace::new(self.top)
    }

    /// The table shared into user top-level slot 0.
    #[must_use]
    pub const fn directory_pointer(&self) -> PhysicalAddress {
        self.directory_pointer
    }
}

/// Builds the 1:1 map of the first 4 GiB.
///
/// Every leaf entry is populated without gaps; the directory-pointer table
/// uses its first four slots and the top level only slot 0. All remaining
/// slots are written as zero.
pub fn build_kernel_space<M: PhysMapper>(arena: &mut TableArena<'_, M>) -> KernelSpace {
    arena.fill(TableRole::KernelEntries, |i| {
        PageEntryBits::kernel(PhysicalAddress::new(i as u64 * PAGE_SIZE))
    });

    let entries = arena.phys(TableRole::KernelEntries);
    arena.fill(TableRole::KernelDirectory, |i| {
        PageEntryBits::kernel(entries.add_pages(i as u64))
    });

    let directory = arena.phys(TableRole::KernelDirectory);
    arena.fill(TableRole::KernelDirectoryPointer, |i| {
        if i < KERNEL_DIRECTORY_POINTER_SLOTS {
            PageEntryBits::kernel(directory.add_pages(i as u64))
        } else {
            PageEntryBits::new()
        }
    });

    let directory_pointer = arena.phys(TableRole::KernelDirectoryPointer);
    arena.fill(TableRole::KernelTop, |i| {
        if i == 0 {
            PageEntryBits::kernel(directory_pointer)
        } else {
            PageEntryBits::new()
        }
    });

    let top = arena.phys(TableRole::KernelTop);
    log::debug!(
        "kernel space: {} leaf entries, top at {top:?}",
        TableRole::KernelEntries.len()
    );
    KernelSpace {
        top,
        directory_pointer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingRoot, arena, memory};

    #[test]
    fn leaf_entries_are_complete_and_strictly_increasing() {
        let phys = memory();
        let mut arena = arena(&phys);
        build_kernel_space(&mut arena);

        let mut previous = None;
        for i in 0..TableRole::KernelEntries.len() {
            let e = arena.read(TableRole::KernelEntries, i).expect("in range");
            assert_eq!(e.flag_bits(), 0b11, "entry {i}");
            assert_eq!(e.into_bits() & !0xFFF, i as u64 * PAGE_SIZE, "entry {i}");
            if let Some(prev) = previous {
                assert!(e.physical_address() > prev);
            }
            previous = Some(e.physical_address());
        }
        assert_eq!(
            arena.read(TableRole::KernelEntries, 0).map(PageEntryBits::into_bits),
            Ok(0x3)
        );
    }

    #[test]
    fn upper_levels_chain_down_and_bound_the_range() {
        let phys = memory();
        let mut arena = arena(&phys);
        let space = build_kernel_space(&mut arena);

        let entries = arena.phys(TableRole::KernelEntries);
        for j in [0usize, 1, 511, 2047] {
            let pde = arena.read(TableRole::KernelDirectory, j).expect("in range");
            assert_eq!(pde, PageEntryBits::kernel(entries.add_pages(j as u64)));
        }

        let directory = arena.phys(TableRole::KernelDirectory);
        for j in 0..512 {
            let pdpte = arena.read(TableRole::KernelDirectoryPointer, j).expect("in range");
            if j < 4 {
                assert_eq!(pdpte, PageEntryBits::kernel(directory.add_pages(j as u64)));
            } else {
                assert!(pdpte.is_unmapped(), "slot {j}");
            }
        }

        let top0 = arena.read(TableRole::KernelTop, 0).expect("in range");
        assert_eq!(top0.physical_address(), space.directory_pointer());
        for j in 1..512 {
            assert!(arena.read(TableRole::KernelTop, j).expect("in range").is_unmapped());
        }
        assert_eq!(space.address_space().top(), arena.phys(TableRole::KernelTop));
    }

    #[test]
    fn rebuilding_clears_stale_slots() {
        let phys = memory();
        let mut arena = arena(&phys);
        arena
            .write(TableRole::KernelTop, 300, PageEntryBits::kernel(PhysicalAddress::new(0x9000)))
            .expect("in range");
        build_kernel_space(&mut arena);
        assert!(arena.read(TableRole::KernelTop, 300).expect("in range").is_unmapped());
    }

    #[test]
    fn activation_loads_the_top_level_table() {
        let phys = memory();
        let mut arena = arena(&phys);
        let space = build_kernel_space(&mut arena);

        let mut root = RecordingRoot::default();
        unsafe { space.address_space().activate(&mut root) };
        assert_eq!(root.loads, [arena.phys(TableRole::KernelTop)]);
    }
}
