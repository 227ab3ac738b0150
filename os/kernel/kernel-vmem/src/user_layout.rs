use crate::VmemError;
use kernel_info::memory::user;
use kernel_memory_addresses::PhysicalAddress;

/// Physical placement of everything inside the user region.
///
/// The loader reserves one contiguous run of pages. Its base is the user
/// entry table; the stack page sits directly below it and the remaining
/// pages follow at the fixed offsets in [`kernel_info::memory::user`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UserLayout {
    base: PhysicalAddress,
    stack: PhysicalAddress,
}

impl UserLayout {
    /// Fails when `base` is not page aligned or leaves no room for the
    /// stack page below it.
    pub const fn new(base: PhysicalAddress) -> Result<Self, VmemError> {
        if !base.is_page_aligned() {
            return Err(VmemError::Misaligned(base));
        }
        match base.sub_pages(1) {
            Some(stack) => Ok(Self { base, stack }),
            None => Err(VmemError::Misaligned(base)),
        }
    }

    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    #[must_use]
    pub const fn page(&self, offset: u64) -> PhysicalAddress {
        self.base.add_pages(offset)
    }

    #[must_use]
    pub const fn stack_page(&self) -> PhysicalAddress {
        self.stack
    }

    #[must_use]
    pub const fn lazy_page(&self) -> PhysicalAddress {
        self.page(user::LAZY_PAGE)
    }

    /// Top of the privileged stack loaded into `TSS.RSP0`.
    #[must_use]
    pub const fn privileged_stack_top(&self) -> PhysicalAddress {
        self.page(user::PRIVILEGED_STACK + 1)
    }

    #[must_use]
    pub const fn tls_page(&self) -> PhysicalAddress {
        self.page(user::TLS_PAGE)
    }

    #[must_use]
    pub const fn shared_area(&self) -> PhysicalAddress {
        self.page(user::SHARED_AREA)
    }

    #[must_use]
    pub const fn grant_target(&self) -> PhysicalAddress {
        self.page(user::GRANT_TARGET)
    }

    /// First byte past the region.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        self.page(user::PAGES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_follow_the_region_base() {
        let layout = UserLayout::new(PhysicalAddress::new(0x0100_0000)).expect("aligned");
        assert_eq!(layout.stack_page().as_u64(), 0x00FF_F000);
        assert_eq!(layout.lazy_page().as_u64(), 0x0100_4000);
        assert_eq!(layout.privileged_stack_top().as_u64(), 0x0100_6000);
        assert_eq!(layout.tls_page().as_u64(), 0x0100_7000);
        assert_eq!(layout.shared_area().as_u64(), 0x0100_8000);
        assert_eq!(layout.grant_target().as_u64(), 0x0100_A000);
    }

    #[test]
    fn rejects_unaligned_or_zero_bases() {
        assert_eq!(
            UserLayout::new(PhysicalAddress::new(0x1234)),
            Err(VmemError::Misaligned(PhysicalAddress::new(0x1234)))
        );
        assert!(UserLayout::new(PhysicalAddress::new(0)).is_err());
    }
}
