//! The `shared_info` page: per-VCPU state, event channel bitmaps and the
//! wall clock, written by the hypervisor at any time.
//!
//! The structures only describe layout. All reads go through
//! [`SharedInfoView`], which uses volatile accesses and never forms a
//! reference into the page.

use crate::XenError;
use crate::hypercall::{Hypercall, PhysmapSpace, add_to_physmap};
use crate::pvclock::{Versioned, VcpuTimeSnapshot, WallClockSnapshot};
use core::mem::offset_of;
use core::ptr::{NonNull, addr_of};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use log::{error, info};

/// `XEN_LEGACY_MAX_VCPUS` on x86.
pub const MAX_VIRT_CPUS: usize = 32;

/// `struct vcpu_time_info`.
#[derive(Debug, Copy, Clone, Default)]
#[repr(C)]
pub struct VcpuTimeInfo {
    pub version: u32,
    pub pad0: u32,
    pub tsc_timestamp: u64,
    pub system_time: u64,
    pub tsc_to_system_mul: u32,
    pub tsc_shift: i8,
    pub flags: u8,
    pub pad1: [u8; 2],
}

/// `struct arch_vcpu_info` (x86).
#[derive(Debug, Copy, Clone, Default)]
#[repr(C)]
pub struct ArchVcpuInfo {
    pub cr2: u64,
    pub pad: u64,
}

/// `struct vcpu_info`.
#[derive(Debug, Copy, Clone, Default)]
#[repr(C)]
pub struct VcpuInfo {
    pub evtchn_upcall_pending: u8,
    pub evtchn_upcall_mask: u8,
    pub evtchn_pending_sel: u64,
    pub arch: ArchVcpuInfo,
    pub time: VcpuTimeInfo,
}

/// `struct shared_info`, up to and including the wall clock.
#[derive(Debug, Copy, Clone)]
#[repr(C)]
pub struct SharedInfo {
    pub vcpu_info: [VcpuInfo; MAX_VIRT_CPUS],
    pub evtchn_pending: [u64; 64],
    pub evtchn_mask: [u64; 64],
    pub wc_version: u32,
    pub wc_sec: u32,
    pub wc_nsec: u32,
    pub wc_sec_hi: u32,
}

const _: () = {
    assert!(size_of::<VcpuTimeInfo>() == 32);
    assert!(size_of::<VcpuInfo>() == 64);
    assert!(offset_of!(VcpuInfo, evtchn_pending_sel) == 8);
    assert!(offset_of!(VcpuInfo, time) == 32);
    assert!(offset_of!(SharedInfo, evtchn_pending) == 2048);
    assert!(offset_of!(SharedInfo, evtchn_mask) == 2560);
    assert!(offset_of!(SharedInfo, wc_version) == 3072);
    assert!(offset_of!(SharedInfo, wc_sec_hi) == 3084);
    assert!(size_of::<SharedInfo>() <= 4096);
};

/// Volatile accessor for a mapped `shared_info` page.
#[derive(Debug, Copy, Clone)]
pub struct SharedInfoView {
    ptr: NonNull<SharedInfo>,
}

impl SharedInfoView {
    /// # Safety
    /// `ptr` must point at a mapped `shared_info` page that stays mapped for
    /// the lifetime of the view and every copy of it.
    #[must_use]
    pub const unsafe fn new(ptr: NonNull<SharedInfo>) -> Self {
        Self { ptr }
    }

    /// Time record of VCPU `vcpu`, or `None` past [`MAX_VIRT_CPUS`].
    #[must_use]
    pub fn vcpu_time(&self, vcpu: usize) -> Option<VcpuTimeView> {
        if vcpu >= MAX_VIRT_CPUS {
            return None;
        }
        let base = self.ptr.as_ptr();
        // In bounds: vcpu < MAX_VIRT_CPUS.
        let time = unsafe { addr_of!((*base).vcpu_info[vcpu].time) };
        Some(VcpuTimeView { ptr: time })
    }

    #[must_use]
    pub const fn wall_clock(&self) -> WallClockView {
        WallClockView {
            ptr: self.ptr.as_ptr(),
        }
    }
}

/// Seqlock source for one VCPU's `vcpu_time_info`.
#[derive(Debug, Copy, Clone)]
pub struct VcpuTimeView {
    ptr: *const VcpuTimeInfo,
}

impl Versioned for VcpuTimeView {
    type Snapshot = VcpuTimeSnapshot;

    fn version(&self) -> u32 {
        unsafe { addr_of!((*self.ptr).version).read_volatile() }
    }

    fn snapshot(&self) -> VcpuTimeSnapshot {
        unsafe {
            VcpuTimeSnapshot {
                tsc_timestamp: addr_of!((*self.ptr).tsc_timestamp).read_volatile(),
                system_time: addr_of!((*self.ptr).system_time).read_volatile(),
                tsc_to_system_mul: addr_of!((*self.ptr).tsc_to_system_mul).read_volatile(),
                tsc_shift: addr_of!((*self.ptr).tsc_shift).read_volatile(),
            }
        }
    }
}

/// Seqlock source for the wall clock fields.
#[derive(Debug, Copy, Clone)]
pub struct WallClockView {
    ptr: *const SharedInfo,
}

impl Versioned for WallClockView {
    type Snapshot = WallClockSnapshot;

    fn version(&self) -> u32 {
        unsafe { addr_of!((*self.ptr).wc_version).read_volatile() }
    }

    fn snapshot(&self) -> WallClockSnapshot {
        unsafe {
            WallClockSnapshot {
                sec: addr_of!((*self.ptr).wc_sec).read_volatile(),
                nsec: addr_of!((*self.ptr).wc_nsec).read_volatile(),
                sec_hi: addr_of!((*self.ptr).wc_sec_hi).read_volatile(),
            }
        }
    }
}

/// Asks the hypervisor to place `shared_info` at `frame` and returns a view
/// through `virt`, the address `frame` is mapped at.
///
/// # Safety
/// `frame` must be a reserved, page-aligned frame mapped at `virt` for the
/// rest of the kernel's lifetime.
///
/// # Errors
/// The failed `memory_op`; the caller decides whether that is fatal.
pub unsafe fn map_shared_info(
    hv: &impl Hypercall,
    frame: PhysicalAddress,
    virt: VirtualAddress,
) -> Result<SharedInfoView, XenError> {
    if let Err(e) = unsafe { add_to_physmap(hv, PhysmapSpace::SharedInfo, 0, frame.frame()) } {
        error!("cannot get shared info: {e}");
        return Err(e);
    }

    let ptr = NonNull::new(virt.as_mut_ptr::<SharedInfo>()).ok_or(XenError::NotPresent)?;
    info!("shared_info mapped at {virt}");
    Ok(unsafe { SharedInfoView::new(ptr) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pvclock::read_consistent;
    use crate::test_support::RecordingHypervisor;

    fn blank() -> Box<SharedInfo> {
        Box::new(SharedInfo {
            vcpu_info: [VcpuInfo::default(); MAX_VIRT_CPUS],
            evtchn_pending: [0; 64],
            evtchn_mask: [0; 64],
            wc_version: 0,
            wc_sec: 0,
            wc_nsec: 0,
            wc_sec_hi: 0,
        })
    }

    #[test]
    fn views_read_the_right_fields() {
        let mut info = blank();
        info.vcpu_info[1].time = VcpuTimeInfo {
            version: 4,
            tsc_timestamp: 100,
            system_time: 5_000,
            tsc_to_system_mul: 1 << 31,
            tsc_shift: -1,
            ..VcpuTimeInfo::default()
        };
        info.wc_version = 2;
        info.wc_sec = 7;
        info.wc_nsec = 9;

        let view = unsafe { SharedInfoView::new(NonNull::from(&mut *info)) };
        let time = view.vcpu_time(1).expect("vcpu 1");
        let snap = read_consistent(&time, 4).expect("stable");
        assert_eq!(snap.tsc_timestamp, 100);
        assert_eq!(snap.system_time, 5_000);
        assert_eq!(snap.tsc_shift, -1);

        let wc = read_consistent(&view.wall_clock(), 4).expect("stable");
        assert_eq!(wc.nanos(), 7_000_000_009);

        assert!(view.vcpu_time(MAX_VIRT_CPUS).is_none());
    }

    #[test]
    fn map_shared_info_uses_shared_info_space() {
        let hv = RecordingHypervisor::new(|_, _| 0);
        let mut info = blank();
        let virt = VirtualAddress::from_ptr(&raw mut *info);
        let view = unsafe { map_shared_info(&hv, PhysicalAddress::new(0x5000), virt) };
        assert!(view.is_ok());
        let calls = hv.calls.borrow();
        assert_eq!(calls.len(), 1);
    }

    #[test]
    fn map_shared_info_failure_is_reported() {
        let hv = RecordingHypervisor::new(|_, _| -1);
        let mut info = blank();
        let virt = VirtualAddress::from_ptr(&raw mut *info);
        let view = unsafe { map_shared_info(&hv, PhysicalAddress::new(0x5000), virt) };
        assert!(view.is_err());
    }
}
