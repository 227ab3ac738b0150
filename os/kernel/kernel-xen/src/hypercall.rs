//! Hypercall page and the typed `memory_op` / `xen_version` calls.
//!
//! Once the hypercall page is installed, Xen fills it with one 32-byte stub
//! per hypercall number. A hypercall is a `call` into `page + nr * 32` with
//! the arguments in `rdi, rsi, rdx, r10, r8` and the result in `rax`. Every
//! call used here takes at most three arguments.

use crate::{DOMID_SELF, XenError};
use core::fmt;
use kernel_memory_addresses::{FrameNumber, VirtualAddress};

/// Hypercall numbers the kernel issues.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u64)]
pub enum HypercallOp {
    MemoryOp = 12,
    XenVersion = 17,
    GrantTableOp = 20,
}

impl HypercallOp {
    #[inline]
    #[must_use]
    pub const fn number(self) -> u64 {
        self as u64
    }
}

/// Size of one stub in the hypercall page.
pub const HYPERCALL_STUB_SIZE: u64 = 32;

pub trait Hypercall {
    /// Issues hypercall `op` with three register arguments.
    ///
    /// # Safety
    /// Pointer arguments must reference records that are valid for the
    /// hypervisor to read and write for the duration of the call, and the
    /// operation itself may remap guest memory.
    unsafe fn hypercall3(&self, op: HypercallOp, a1: u64, a2: u64, a3: u64) -> i64;
}

/// The installed hypercall page, addressed through the current mapping.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HypercallPage {
    base: VirtualAddress,
}

impl HypercallPage {
    /// # Safety
    /// `base` must map the page whose physical address was handed to the
    /// hypervisor, and the hypervisor must have filled it.
    #[must_use]
    pub const unsafe fn new(base: VirtualAddress) -> Option<Self> {
        if !base.is_page_aligned() {
            return None;
        }
        Some(Self { base })
    }

    /// Stub address for `op`.
    #[inline]
    #[must_use]
    pub const fn entry(&self, op: HypercallOp) -> VirtualAddress {
        VirtualAddress::new(self.base.as_u64() + op.number() * HYPERCALL_STUB_SIZE)
    }
}

impl Hypercall for HypercallPage {
    unsafe fn hypercall3(&self, op: HypercallOp, a1: u64, a2: u64, a3: u64) -> i64 {
        let ret: i64;
        let entry = self.entry(op).as_u64();
        unsafe {
            core::arch::asm!(
                "call {entry}",
                entry = in(reg) entry,
                inlateout("rdi") a1 => _,
                inlateout("rsi") a2 => _,
                inlateout("rdx") a3 => _,
                lateout("rax") ret,
                clobber_abi("C"),
            );
        }
        ret
    }
}

/// `XENMEM_add_to_physmap`.
pub const XENMEM_ADD_TO_PHYSMAP: u64 = 7;

/// `XENVER_version`.
pub const XENVER_VERSION: u64 = 0;

/// Source spaces for [`add_to_physmap`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u32)]
pub enum PhysmapSpace {
    SharedInfo = 0,
    GrantTable = 1,
}

/// `struct xen_add_to_physmap`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
pub struct AddToPhysmap {
    pub domid: u16,
    /// Only meaningful for the batched GMFN range space.
    pub size: u16,
    pub space: u32,
    pub idx: u64,
    pub gpfn: u64,
}

const _: () = assert!(size_of::<AddToPhysmap>() == 24);

/// Places hypervisor page `idx` of `space` at guest frame `gpfn`.
///
/// # Safety
/// Whatever was at `gpfn` is replaced by the hypervisor's page. The frame
/// must be reserved for this purpose.
///
/// # Errors
/// [`XenError::Hypercall`] with the negative errno Xen returned.
pub unsafe fn add_to_physmap(
    hv: &impl Hypercall,
    space: PhysmapSpace,
    idx: u64,
    gpfn: FrameNumber,
) -> Result<(), XenError> {
    let mut xatp = AddToPhysmap {
        domid: DOMID_SELF,
        size: 0,
        space: space as u32,
        idx,
        gpfn: gpfn.as_u64(),
    };
    let op = HypercallOp::MemoryOp;
    let code = unsafe {
        hv.hypercall3(
            op,
            XENMEM_ADD_TO_PHYSMAP,
            (&raw mut xatp) as u64,
            0,
        )
    };
    if code < 0 {
        return Err(XenError::Hypercall { op, code });
    }
    Ok(())
}

/// Hypervisor release as reported by `XENVER_version`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct XenVersion {
    pub major: u16,
    pub minor: u16,
}

impl XenVersion {
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self {
            major: (v >> 16) as u16,
            minor: (v & 0xFFFF) as u16,
        }
    }
}

impl fmt::Display for XenVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Queries the hypervisor version.
///
/// # Errors
/// [`XenError::Hypercall`] if the call fails.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn xen_version(hv: &impl Hypercall) -> Result<XenVersion, XenError> {
    let op = HypercallOp::XenVersion;
    // XENVER_version takes no argument record.
    let code = unsafe { hv.hypercall3(op, XENVER_VERSION, 0, 0) };
    if code < 0 {
        return Err(XenError::Hypercall { op, code });
    }
    Ok(XenVersion::from_raw(code as u32))
}
