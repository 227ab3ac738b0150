//! Grant tables (v1).
//!
//! A grant entry lets another domain map or take over one of our frames.
//! The table itself lives in frames the hypervisor shares with us, so both
//! sides update entries concurrently:
//!
//! * we publish `frame`/`domid` before the permit flag becomes visible,
//! * the remote side sets `GTF_reading`/`GTF_writing` while it uses a
//!   frame, and we must not recycle the entry until they are clear,
//! * for transfers the remote side sets `GTF_transfer_committed` and later
//!   `GTF_transfer_completed`, after which `frame` holds the new frame.
//!
//! Free entries are chained through [`FreeList`]; entry `0` is the list
//! head and references below [`NR_RESERVED_ENTRIES`] are never handed out.

use crate::hypercall::{Hypercall, HypercallOp, PhysmapSpace, add_to_physmap};
use crate::{DOMID_SELF, XenError};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicU16, AtomicU32, Ordering, fence};
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE, PhysicalAddress};
use log::{error, info, warn};

/// Frames backing the grant table.
pub const NR_GRANT_FRAMES: usize = 1;

/// Entries in the table.
pub const NR_GRANT_ENTRIES: usize = NR_GRANT_FRAMES * PAGE_SIZE as usize / size_of::<GrantEntry>();

/// References reserved for the toolstack.
pub const NR_RESERVED_ENTRIES: u32 = 8;

/// `GTF_*` entry flags.
pub mod gtf {
    pub const PERMIT_ACCESS: u16 = 1;
    pub const ACCEPT_TRANSFER: u16 = 2;
    pub const READONLY: u16 = 1 << 2;
    pub const READING: u16 = 1 << 3;
    pub const WRITING: u16 = 1 << 4;
    pub const TRANSFER_COMMITTED: u16 = 1 << 2;
    pub const TRANSFER_COMPLETED: u16 = 1 << 3;
}

/// `GNTMAP_host_map`.
pub const GNTMAP_HOST_MAP: u32 = 1 << 1;

/// `GNTTABOP_map_grant_ref`.
pub const GNTTABOP_MAP_GRANT_REF: u64 = 0;

/// `GNTTABOP_setup_table`.
pub const GNTTABOP_SETUP_TABLE: u64 = 2;

/// `struct grant_entry_v1`.
#[derive(Debug, Default)]
#[repr(C)]
pub struct GrantEntry {
    pub flags: AtomicU16,
    pub domid: AtomicU16,
    pub frame: AtomicU32,
}

impl GrantEntry {
    /// An unused entry, usable in `static` initializers.
    pub const EMPTY: Self = Self {
        flags: AtomicU16::new(0),
        domid: AtomicU16::new(0),
        frame: AtomicU32::new(0),
    };
}

const _: () = {
    assert!(size_of::<GrantEntry>() == 8);
    assert!(NR_GRANT_ENTRIES == 512);
};

/// Index into the grant table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct GrantRef(pub u32);

impl GrantRef {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum GrantError {
    #[error("no free grant references")]
    Exhausted,
    #[error("{0:?} is reserved")]
    Reserved(GrantRef),
    #[error("{0:?} is outside the grant table")]
    OutOfRange(GrantRef),
    #[error("{0:?} is not granted")]
    NotGranted(GrantRef),
    #[error("{0:?} does not fit a v1 grant entry")]
    FrameTooLarge(FrameNumber),
    #[error("remote domain still uses the grant (flags {flags:#06X})")]
    InUse { flags: u16 },
    #[error("remote domain did not settle the grant within {0} spins")]
    TimedOut(u32),
}

/// Result of [`GrantTable::end_transfer`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TransferOutcome {
    /// Nobody committed to the transfer; the reference was reclaimed.
    Released,
    /// The transfer finished and handed us this frame.
    Completed(FrameNumber),
}

/// Free references chained through their own slots, head in slot `0`.
/// A link of `0` ends the chain.
#[derive(Debug, Clone)]
pub struct FreeList {
    next: [u32; NR_GRANT_ENTRIES],
    granted: [bool; NR_GRANT_ENTRIES],
}

impl FreeList {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn new() -> Self {
        let mut list = Self {
            next: [0; NR_GRANT_ENTRIES],
            granted: [false; NR_GRANT_ENTRIES],
        };
        for r in NR_RESERVED_ENTRIES..NR_GRANT_ENTRIES as u32 {
            list.put(GrantRef(r));
        }
        list
    }

    fn put(&mut self, r: GrantRef) {
        self.next[r.index()] = self.next[0];
        self.next[0] = r.0;
        self.granted[r.index()] = false;
    }

    fn get(&mut self) -> Option<GrantRef> {
        let head = self.next[0];
        if head == 0 {
            return None;
        }
        self.next[0] = self.next[head as usize];
        self.granted[head as usize] = true;
        Some(GrantRef(head))
    }

    #[must_use]
    pub fn is_granted(&self, r: GrantRef) -> bool {
        self.granted.get(r.index()).copied().unwrap_or(false)
    }

    /// Number of references available.
    #[must_use]
    pub fn available(&self) -> usize {
        let mut n = 0;
        let mut cur = self.next[0];
        while cur != 0 {
            n += 1;
            cur = self.next[cur as usize];
        }
        n
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

/// The grant table as seen from our side.
pub struct GrantTable<'t> {
    entries: &'t [GrantEntry; NR_GRANT_ENTRIES],
    free: FreeList,
    spin_limit: u32,
}

impl<'t> GrantTable<'t> {
    /// `spin_limit` bounds every wait on the remote domain.
    #[must_use]
    pub fn new(entries: &'t [GrantEntry; NR_GRANT_ENTRIES], spin_limit: u32) -> Self {
        Self {
            entries,
            free: FreeList::new(),
            spin_limit,
        }
    }

    #[must_use]
    pub const fn free_list(&self) -> &FreeList {
        &self.free
    }

    #[must_use]
    pub fn entry(&self, r: GrantRef) -> Option<&GrantEntry> {
        self.entries.get(r.index())
    }

    /// Lets `domid` access `frame`.
    ///
    /// # Errors
    /// [`GrantError::Exhausted`] when no reference is free,
    /// [`GrantError::FrameTooLarge`] if `frame` needs more than 32 bits.
    pub fn grant_access(
        &mut self,
        domid: u16,
        frame: FrameNumber,
        readonly: bool,
    ) -> Result<GrantRef, GrantError> {
        let frame32 = u32::try_from(frame.as_u64()).map_err(|_| GrantError::FrameTooLarge(frame))?;
        let r = self.free.get().ok_or(GrantError::Exhausted)?;
        let entry = &self.entries[r.index()];

        entry.frame.store(frame32, Ordering::Relaxed);
        entry.domid.store(domid, Ordering::Relaxed);
        fence(Ordering::Release);

        let flags = gtf::PERMIT_ACCESS | if readonly { gtf::READONLY } else { 0 };
        entry.flags.store(flags, Ordering::Release);
        Ok(r)
    }

    /// Lets `domid` transfer a frame to us through a fresh reference,
    /// publishing `frame` as the one we give up in exchange.
    ///
    /// # Errors
    /// [`GrantError::Exhausted`] when no reference is free,
    /// [`GrantError::FrameTooLarge`] if `frame` needs more than 32 bits.
    pub fn grant_transfer(
        &mut self,
        domid: u16,
        frame: FrameNumber,
    ) -> Result<GrantRef, GrantError> {
        let frame32 = u32::try_from(frame.as_u64()).map_err(|_| GrantError::FrameTooLarge(frame))?;
        let r = self.free.get().ok_or(GrantError::Exhausted)?;
        let entry = &self.entries[r.index()];

        entry.frame.store(frame32, Ordering::Relaxed);
        entry.domid.store(domid, Ordering::Relaxed);
        fence(Ordering::Release);
        entry.flags.store(gtf::ACCEPT_TRANSFER, Ordering::Release);
        Ok(r)
    }

    /// Revokes an access grant and recycles the reference.
    ///
    /// # Errors
    /// [`GrantError::InUse`] if the remote domain still has the frame
    /// mapped; the reference stays granted. [`GrantError::TimedOut`] if the
    /// flags kept changing under us.
    pub fn end_access(&mut self, r: GrantRef) -> Result<(), GrantError> {
        self.check_granted(r)?;
        let entries = self.entries;
        let entry = &entries[r.index()];

        let mut flags = entry.flags.load(Ordering::Acquire);
        for _ in 0..self.spin_limit {
            if flags & (gtf::READING | gtf::WRITING) != 0 {
                warn!("{r:?} still in use (flags {flags:#06X})");
                return Err(GrantError::InUse { flags });
            }
            match entry
                .flags
                .compare_exchange(flags, 0, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.free.put(r);
                    return Ok(());
                }
                Err(seen) => {
                    flags = seen;
                    spin_loop();
                }
            }
        }
        Err(GrantError::TimedOut(self.spin_limit))
    }

    /// Finishes a transfer grant.
    ///
    /// An uncommitted grant is reclaimed immediately. A committed one is
    /// polled until the remote side marks it completed.
    ///
    /// # Errors
    /// [`GrantError::TimedOut`] if the transfer neither got reclaimed nor
    /// completed within the spin limit. The reference stays granted.
    pub fn end_transfer(&mut self, r: GrantRef) -> Result<TransferOutcome, GrantError> {
        self.check_granted(r)?;
        let entries = self.entries;
        let entry = &entries[r.index()];

        let mut flags = entry.flags.load(Ordering::Acquire);
        let mut spins = 0;
        while flags & gtf::TRANSFER_COMMITTED == 0 {
            if spins == self.spin_limit {
                return Err(GrantError::TimedOut(self.spin_limit));
            }
            spins += 1;
            match entry
                .flags
                .compare_exchange(flags, 0, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    info!("Release unused transfer grant {r:?}");
                    self.free.put(r);
                    return Ok(TransferOutcome::Released);
                }
                Err(seen) => {
                    flags = seen;
                    spin_loop();
                }
            }
        }

        while flags & gtf::TRANSFER_COMPLETED == 0 {
            if spins == self.spin_limit {
                return Err(GrantError::TimedOut(self.spin_limit));
            }
            spins += 1;
            spin_loop();
            flags = entry.flags.load(Ordering::Acquire);
        }

        fence(Ordering::Acquire);
        let frame = FrameNumber::new(u64::from(entry.frame.load(Ordering::Relaxed)));
        self.free.put(r);
        Ok(TransferOutcome::Completed(frame))
    }

    fn check_granted(&self, r: GrantRef) -> Result<(), GrantError> {
        if r.index() >= NR_GRANT_ENTRIES {
            return Err(GrantError::OutOfRange(r));
        }
        if r.0 < NR_RESERVED_ENTRIES {
            return Err(GrantError::Reserved(r));
        }
        if !self.free.is_granted(r) {
            return Err(GrantError::NotGranted(r));
        }
        Ok(())
    }
}

/// Installs the grant table frames, highest index first.
///
/// `frames[i]` receives grant table frame `i`.
///
/// # Safety
/// The frames are replaced by hypervisor pages and must be reserved for the
/// grant table.
///
/// # Errors
/// The first failing `add_to_physmap`.
pub unsafe fn map_grant_frames(
    hv: &impl Hypercall,
    frames: &[PhysicalAddress; NR_GRANT_FRAMES],
) -> Result<(), XenError> {
    for (idx, frame) in frames.iter().enumerate().rev() {
        let res = unsafe { add_to_physmap(hv, PhysmapSpace::GrantTable, idx as u64, frame.frame()) };
        if let Err(e) = res {
            error!("cannot map gnttab_table: {e}");
            return Err(e);
        }
    }
    Ok(())
}

/// `struct gnttab_setup_table`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
pub struct SetupTable {
    pub dom: u16,
    pub nr_frames: u32,
    pub status: i16,
    pub frame_list: u64,
}

/// `struct gnttab_map_grant_ref`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
pub struct MapGrantRef {
    pub host_addr: u64,
    pub flags: u32,
    pub ref_: u32,
    pub dom: u16,
    pub status: i16,
    pub handle: u32,
    pub dev_bus_addr: u64,
}

const _: () = {
    use core::mem::offset_of;
    assert!(size_of::<SetupTable>() == 24);
    assert!(offset_of!(SetupTable, status) == 8);
    assert!(offset_of!(SetupTable, frame_list) == 16);
    assert!(size_of::<MapGrantRef>() == 32);
    assert!(offset_of!(MapGrantRef, dom) == 16);
    assert!(offset_of!(MapGrantRef, handle) == 20);
    assert!(offset_of!(MapGrantRef, dev_bus_addr) == 24);
};

/// Handle of a successful grant mapping, needed to unmap it again.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GrantHandle(pub u32);

fn grant_table_op<T>(hv: &impl Hypercall, cmd: u64, record: &mut T) -> Result<(), XenError> {
    let op = HypercallOp::GrantTableOp;
    // One record, owned by the caller for the whole call.
    let code = unsafe { hv.hypercall3(op, cmd, core::ptr::from_mut(record) as u64, 1) };
    if code < 0 {
        return Err(XenError::Hypercall { op, code });
    }
    Ok(())
}

/// Hands the grant table frames back to the hypervisor
/// (`setup_table` with zero frames).
///
/// # Errors
/// The failed hypercall or a non-zero table status.
pub fn release_grant_frames(hv: &impl Hypercall) -> Result<(), XenError> {
    let mut setup = SetupTable {
        dom: DOMID_SELF,
        nr_frames: 0,
        status: 0,
        frame_list: 0,
    };
    grant_table_op(hv, GNTTABOP_SETUP_TABLE, &mut setup)?;
    if setup.status != 0 {
        return Err(XenError::GrantStatus(setup.status));
    }
    Ok(())
}

/// Maps grant `r` offered by domain `dom` at `host_addr`.
///
/// # Safety
/// On success the page at `host_addr` is replaced by the foreign frame.
///
/// # Errors
/// The failed hypercall or the grant status the hypervisor reported.
pub unsafe fn map_grant_ref(
    hv: &impl Hypercall,
    host_addr: PhysicalAddress,
    dom: u16,
    r: GrantRef,
) -> Result<GrantHandle, XenError> {
    let mut map = MapGrantRef {
        host_addr: host_addr.as_u64(),
        flags: GNTMAP_HOST_MAP,
        ref_: r.0,
        dom,
        status: 0,
        handle: 0,
        dev_bus_addr: 0,
    };
    grant_table_op(hv, GNTTABOP_MAP_GRANT_REF, &mut map)?;

    if map.status != 0 {
        error!("map_grant_ref of {r:?} from domain {dom} failed with status {}", map.status);
        return Err(XenError::GrantStatus(map.status));
    }
    info!("map_grant_ref of {r:?} from domain {dom} worked, handle {}", map.handle);
    Ok(GrantHandle(map.handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingHypervisor;

    const SPINS: u32 = 64;

    fn entries() -> Box<[GrantEntry; NR_GRANT_ENTRIES]> {
        Box::new(core::array::from_fn(|_| GrantEntry::default()))
    }

    #[test]
    fn free_list_skips_reserved() {
        let list = FreeList::new();
        assert_eq!(list.available(), NR_GRANT_ENTRIES - NR_RESERVED_ENTRIES as usize);
    }

    #[test]
    fn grant_publishes_frame_then_flags() {
        let e = entries();
        let mut gt = GrantTable::new(&e, SPINS);
        let r = gt.grant_access(7, FrameNumber::new(0x1234), true).expect("free ref");

        assert!(r.0 >= NR_RESERVED_ENTRIES);
        let entry = gt.entry(r).expect("in range");
        assert_eq!(entry.frame.load(Ordering::Relaxed), 0x1234);
        assert_eq!(entry.domid.load(Ordering::Relaxed), 7);
        assert_eq!(
            entry.flags.load(Ordering::Relaxed),
            gtf::PERMIT_ACCESS | gtf::READONLY
        );
    }

    #[test]
    fn access_lifecycle_returns_ref() {
        let e = entries();
        let mut gt = GrantTable::new(&e, SPINS);
        let before = gt.free_list().available();

        let r = gt.grant_access(1, FrameNumber::new(5), false).expect("free ref");
        assert_eq!(gt.free_list().available(), before - 1);

        assert_eq!(gt.end_access(r), Ok(()));
        assert_eq!(gt.free_list().available(), before);
        assert_eq!(e[r.index()].flags.load(Ordering::Relaxed), 0);
        assert_eq!(gt.end_access(r), Err(GrantError::NotGranted(r)));
    }

    #[test]
    fn end_access_refuses_while_remote_reads() {
        let e = entries();
        let mut gt = GrantTable::new(&e, SPINS);
        let r = gt.grant_access(1, FrameNumber::new(5), false).expect("free ref");
        let before = gt.free_list().available();

        e[r.index()]
            .flags
            .store(gtf::PERMIT_ACCESS | gtf::READING, Ordering::Relaxed);
        assert_eq!(
            gt.end_access(r),
            Err(GrantError::InUse {
                flags: gtf::PERMIT_ACCESS | gtf::READING
            })
        );
        assert_eq!(gt.free_list().available(), before);
        assert!(gt.free_list().is_granted(r));

        e[r.index()].flags.store(gtf::PERMIT_ACCESS, Ordering::Relaxed);
        assert_eq!(gt.end_access(r), Ok(()));
    }

    #[test]
    fn exhaustion_is_an_error() {
        let e = entries();
        let mut gt = GrantTable::new(&e, SPINS);
        let usable = NR_GRANT_ENTRIES - NR_RESERVED_ENTRIES as usize;
        for _ in 0..usable {
            gt.grant_access(1, FrameNumber::new(1), false).expect("free ref");
        }
        assert_eq!(
            gt.grant_access(1, FrameNumber::new(1), false),
            Err(GrantError::Exhausted)
        );
        assert_eq!(gt.grant_transfer(1, FrameNumber::new(1)), Err(GrantError::Exhausted));
    }

    #[test]
    fn reserved_and_out_of_range_refs() {
        let e = entries();
        let mut gt = GrantTable::new(&e, SPINS);
        assert_eq!(gt.end_access(GrantRef(3)), Err(GrantError::Reserved(GrantRef(3))));
        assert_eq!(
            gt.end_access(GrantRef(512)),
            Err(GrantError::OutOfRange(GrantRef(512)))
        );
    }

    #[test]
    fn oversized_frame_is_rejected_without_allocating() {
        let e = entries();
        let mut gt = GrantTable::new(&e, SPINS);
        let before = gt.free_list().available();
        let frame = FrameNumber::new(1 << 32);
        assert_eq!(
            gt.grant_access(1, frame, false),
            Err(GrantError::FrameTooLarge(frame))
        );
        assert_eq!(gt.grant_transfer(1, frame), Err(GrantError::FrameTooLarge(frame)));
        assert_eq!(gt.free_list().available(), before);
    }

    #[test]
    fn uncommitted_transfer_is_released() {
        let e = entries();
        let mut gt = GrantTable::new(&e, SPINS);
        let r = gt.grant_transfer(3, FrameNumber::new(0x77)).expect("free ref");
        assert_eq!(e[r.index()].flags.load(Ordering::Relaxed), gtf::ACCEPT_TRANSFER);
        assert_eq!(e[r.index()].frame.load(Ordering::Relaxed), 0x77);
        assert_eq!(e[r.index()].domid.load(Ordering::Relaxed), 3);

        assert_eq!(gt.end_transfer(r), Ok(TransferOutcome::Released));
        assert!(!gt.free_list().is_granted(r));
    }

    #[test]
    fn completed_transfer_yields_frame() {
        let e = entries();
        let mut gt = GrantTable::new(&e, SPINS);
        let r = gt.grant_transfer(3, FrameNumber::new(0x77)).expect("free ref");

        e[r.index()].frame.store(0xBEEF, Ordering::Relaxed);
        e[r.index()].flags.store(
            gtf::ACCEPT_TRANSFER | gtf::TRANSFER_COMMITTED | gtf::TRANSFER_COMPLETED,
            Ordering::Release,
        );
        assert_eq!(
            gt.end_transfer(r),
            Ok(TransferOutcome::Completed(FrameNumber::new(0xBEEF)))
        );
        assert!(!gt.free_list().is_granted(r));
    }

    #[test]
    fn stalled_transfer_times_out() {
        let e = entries();
        let mut gt = GrantTable::new(&e, SPINS);
        let r = gt.grant_transfer(3, FrameNumber::new(0x77)).expect("free ref");
        e[r.index()]
            .flags
            .store(gtf::ACCEPT_TRANSFER | gtf::TRANSFER_COMMITTED, Ordering::Release);

        assert_eq!(gt.end_transfer(r), Err(GrantError::TimedOut(SPINS)));
        assert!(gt.free_list().is_granted(r));
    }

    #[test]
    fn grant_frames_are_installed_highest_first() {
        let hv = RecordingHypervisor::new(|_, args| {
            let xatp = unsafe { *(args[1] as *const crate::hypercall::AddToPhysmap) };
            assert_eq!(xatp.space, PhysmapSpace::GrantTable as u32);
            assert_eq!(xatp.gpfn, 0x42);
            0
        });
        let frames = [PhysicalAddress::new(0x42_000)];
        assert_eq!(unsafe { map_grant_frames(&hv, &frames) }, Ok(()));
        assert_eq!(hv.calls.borrow().len(), NR_GRANT_FRAMES);
    }

    #[test]
    fn release_sends_zero_frames() {
        let hv = RecordingHypervisor::new(|op, args| {
            assert_eq!(op, HypercallOp::GrantTableOp);
            assert_eq!(args[0], GNTTABOP_SETUP_TABLE);
            assert_eq!(args[2], 1);
            let setup = unsafe { *(args[1] as *const SetupTable) };
            assert_eq!(setup.nr_frames, 0);
            assert_eq!(setup.dom, DOMID_SELF);
            0
        });
        assert_eq!(release_grant_frames(&hv), Ok(()));
    }

    #[test]
    fn map_grant_ref_reports_status() {
        let ok = RecordingHypervisor::new(|_, args| {
            let map = unsafe { &mut *(args[1] as *mut MapGrantRef) };
            assert_eq!(map.flags, GNTMAP_HOST_MAP);
            assert_eq!(map.ref_, 511);
            assert_eq!(map.dom, 76);
            assert_eq!(map.host_addr, 0xA000);
            map.handle = 9;
            0
        });
        let handle = unsafe { map_grant_ref(&ok, PhysicalAddress::new(0xA000), 76, GrantRef(511)) };
        assert_eq!(handle, Ok(GrantHandle(9)));

        let denied = RecordingHypervisor::new(|_, args| {
            let map = unsafe { &mut *(args[1] as *mut MapGrantRef) };
            map.status = -4;
            0
        });
        let res = unsafe { map_grant_ref(&denied, PhysicalAddress::new(0xA000), 76, GrantRef(511)) };
        assert_eq!(res, Err(XenError::GrantStatus(-4)));
    }
}
