//! Physical memory access.
//!
//! The loader identity-maps the first 4 GiB and the kernel keeps that map
//! in both of its address spaces, so physical and kernel virtual addresses
//! coincide. The kernel image is linked at its physical load address,
//! which makes the address of a `static` its physical address, too.

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

#[derive(Debug, Default, Copy, Clone)]
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    #[inline]
    unsafe fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        pa.as_u64() as *mut u8
    }
}

pub static IDENTITY: IdentityMapper = IdentityMapper;

/// Kernel virtual address of `pa`.
#[inline]
pub const fn virt_of(pa: PhysicalAddress) -> VirtualAddress {
    VirtualAddress::new(pa.as_u64())
}

/// Physical address of a kernel object.
#[inline]
pub const fn phys_of<T>(ptr: *const T) -> PhysicalAddress {
    PhysicalAddress::from_ptr(ptr)
}
