//! # Xen bring-up
//!
//! Wires [`kernel_xen`] to real memory: the hypercall page, the
//! `shared_info` page and the grant table frame are page-aligned kernel
//! statics, whose physical addresses the identity map makes known.
//!
//! Only installing the hypercall page and the grant table is mandatory
//! once Xen is detected; the clock report and the grant demo degrade to
//! warnings.

use crate::memory::{phys_of, virt_of};
use core::ffi::CStr;
use kernel_info::memory::{
    CLOCK_RETRY_LIMIT, CLOCK_SELF_TEST_SAMPLES, GRANT_SPIN_LIMIT, PEER_DOMAIN, PEER_GRANT_REF,
};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
use kernel_vmem::UserLayout;
use kernel_xen::cpuid::NativeCpuid;
use kernel_xen::gnttab::{
    GrantEntry, GrantHandle, NR_GRANT_ENTRIES, map_grant_frames, map_grant_ref,
};
use kernel_xen::hypercall::xen_version;
use kernel_xen::pvclock::{monotonic_ns, wait_one_second, wall_clock_ns};
use kernel_xen::shared_info::{SharedInfoView, map_shared_info};
use kernel_xen::{GrantRef, GrantTable, HypercallPage, XenError, XenLeaves, XenVersion, detect};
use log::{info, warn};

const NANOS_PER_SECOND: u64 = 1_000_000_000;

#[allow(clippy::cast_possible_truncation)]
const PAGE_BYTES: usize = PAGE_SIZE as usize;

#[repr(C, align(4096))]
struct ReservedPage([u8; PAGE_BYTES]);

/// Filled with hypercall stubs by the hypervisor.
static mut HYPERCALL_PAGE: ReservedPage = ReservedPage([0; PAGE_BYTES]);

/// Replaced by the hypervisor's `shared_info` frame.
static mut SHARED_INFO_PAGE: ReservedPage = ReservedPage([0; PAGE_BYTES]);

/// The single grant table frame.
#[repr(C, align(4096))]
struct GrantFrames([GrantEntry; NR_GRANT_ENTRIES]);

static GRANT_FRAMES: GrantFrames = GrantFrames([GrantEntry::EMPTY; NR_GRANT_ENTRIES]);

/// What the Xen stage brought up.
pub struct XenBridge {
    version: Option<XenVersion>,
    shared_info: Option<SharedInfoView>,
    grants: GrantTable<'static>,
    shared_grant: Option<GrantRef>,
    peer: Option<GrantHandle>,
}

impl XenBridge {
    /// Every optional step succeeded.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.version.is_some()
            && self.shared_info.is_some()
            && self.shared_grant.is_some()
            && self.peer.is_some()
    }

    #[must_use]
    pub const fn version(&self) -> Option<XenVersion> {
        self.version
    }

    /// Grant references still free for new grants.
    #[must_use]
    pub fn free_grants(&self) -> usize {
        self.grants.free_list().available()
    }
}

/// Detects Xen and brings up the hypercall page, `shared_info`, the grant
/// table and the peer mapping.
///
/// Returns `Ok(None)` when no usable Xen is present.
///
/// # Safety
/// CPL0, single call, with `layout` describing the active user region.
///
/// # Errors
/// Installing the hypercall page or the grant table frame failed.
pub unsafe fn bring_up(layout: &UserLayout) -> Result<Option<XenBridge>, XenError> {
    let cpu = NativeCpuid;
    if detect(&cpu).is_none() {
        info!("no Xen hypervisor detected");
        return Ok(None);
    }
    let Some(leaves) = XenLeaves::probe(&cpu) else {
        warn!("Xen signature found but no usable leaf base");
        return Ok(None);
    };
    let (major, minor) = leaves.version(&cpu);
    info!("Xen {major}.{minor}, leaves at {:#x}", leaves.base());

    let hypercall_pa = phys_of(&raw const HYPERCALL_PAGE);
    unsafe { leaves.install_hypercall_page(&cpu, hypercall_pa)? };
    // SAFETY: the page was just handed to the hypervisor and is identity mapped.
    let hv = unsafe { HypercallPage::new(virt_of(hypercall_pa)) }.ok_or(XenError::NotPresent)?;

    let version = match xen_version(&hv) {
        Ok(v) => {
            info!("Xen version {v}");
            Some(v)
        }
        Err(e) => {
            warn!("xen_version failed: {e}");
            None
        }
    };

    let shared_pa = phys_of(&raw const SHARED_INFO_PAGE);
    let shared_info = match unsafe { map_shared_info(&hv, shared_pa, virt_of(shared_pa)) } {
        Ok(view) => {
            report_clock(&view);
            Some(view)
        }
        Err(e) => {
            warn!("continuing without shared_info: {e}");
            None
        }
    };

    unsafe { map_grant_frames(&hv, &[phys_of(&raw const GRANT_FRAMES)])? };
    let mut grants = GrantTable::new(&GRANT_FRAMES.0, GRANT_SPIN_LIMIT);
    info!("grant table mapped, {} references free", grants.free_list().available());

    let shared_grant = match grants.grant_access(PEER_DOMAIN, layout.shared_area().frame(), false) {
        Ok(r) => {
            info!("granted {} to domain {PEER_DOMAIN} as {r:?}", layout.shared_area());
            Some(r)
        }
        Err(e) => {
            warn!("cannot grant the shared area: {e}");
            None
        }
    };

    let target = layout.grant_target();
    let peer = match unsafe { map_grant_ref(&hv, target, PEER_DOMAIN, GrantRef(PEER_GRANT_REF)) } {
        Ok(handle) => {
            log_peer_page(target);
            Some(handle)
        }
        Err(e) => {
            warn!("peer grant not mapped: {e}");
            None
        }
    };

    Ok(Some(XenBridge {
        version,
        shared_info,
        grants,
        shared_grant,
        peer,
    }))
}

/// Logs the wall clock, then proves the monotonic clock ticks by waiting
/// for it to advance one second.
fn report_clock(shared: &SharedInfoView) {
    let Some(time) = shared.vcpu_time(0) else {
        warn!("no time record for VCPU 0");
        return;
    };
    let wall = shared.wall_clock();

    match wall_clock_ns(&wall, CLOCK_RETRY_LIMIT) {
        Ok(ns) => info!("wall clock: {}", Seconds(ns)),
        Err(e) => warn!("wall clock unreadable: {e}"),
    }

    let now = || monotonic_ns(&time, rdtsc, CLOCK_RETRY_LIMIT);
    match wait_one_second(now, u64::from(CLOCK_SELF_TEST_SAMPLES)) {
        Ok(Some(test)) => info!(
            "monotonic clock went from {} to {} in {} reads",
            Seconds(test.start_ns),
            Seconds(test.end_ns),
            test.samples
        ),
        Ok(None) => warn!("monotonic clock did not advance one second in {CLOCK_SELF_TEST_SAMPLES} reads"),
        Err(e) => warn!("monotonic clock unreadable: {e}"),
    }

    if let Ok(ns) = wall_clock_ns(&wall, CLOCK_RETRY_LIMIT) {
        info!("wall clock: {}", Seconds(ns));
    }
}

/// Logs the NUL-terminated text the peer left in its granted page.
fn log_peer_page(page: PhysicalAddress) {
    let ptr = virt_of(page).as_mut_ptr::<u8>().cast_const();
    // SAFETY: the grant mapping replaced this identity mapped page.
    let bytes = unsafe { core::slice::from_raw_parts(ptr, PAGE_BYTES) };
    match CStr::from_bytes_until_nul(bytes).map(CStr::to_str) {
        Ok(Ok(text)) => info!("other side: {text}"),
        Ok(Err(_)) => warn!("other side: text is not UTF-8"),
        Err(_) => warn!("other side: no NUL-terminated text"),
    }
}

/// `ns` formatted as seconds with nine decimals.
struct Seconds(u64);

impl core::fmt::Display for Seconds {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{:09} s", self.0 / NANOS_PER_SECOND, self.0 % NANOS_PER_SECOND)
    }
}

#[inline(always)]
#[allow(clippy::inline_always)]
fn rdtsc() -> u64 {
    let lo: u32;
    let hi: u32;
    unsafe {
        core::arch::asm!(
            "lfence",
            "rdtsc",
            out("eax") lo,
            out("edx") hi,
            options(nomem, nostack, preserves_flags)
        );
    }
    (u64::from(hi) << 32) | u64::from(lo)
}
