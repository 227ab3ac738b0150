//! # Global Descriptor Table & Task State Segment
//!
//! Segment selectors still matter in long mode: they tell code from data,
//! carry the privilege level checked on every transition, and locate the
//! TSS through a 16-byte system descriptor.
//!
//! ## GDT layout
//! Index | Selector | Meaning
//! ------|----------|--------
//! 0     | 0x00     | Null
//! 1     | 0x08     | Kernel code (64-bit, DPL=0; [`KERNEL_CS`])
//! 2     | 0x10     | Kernel data (DPL=0; [`KERNEL_DS`])
//! 3     | 0x18     | User data (DPL=3) → with RPL=3: **0x1b** ([`USER_DS`])
//! 4     | 0x20     | User code (64-bit, DPL=3) → with RPL=3: **0x23** ([`USER_CS`])
//! 5/6   | 0x28     | TSS ([`TSS_SEL`])
//!
//! User data sits directly below user code because `sysretq` derives both
//! from one STAR base: `SS = base + 8`, `CS = base + 16`.

pub mod descriptors;
pub mod tss_desc;

use crate::gdt::descriptors::{Desc64, Dpl};
use crate::gdt::tss_desc::TssDesc64;
use crate::tss::Tss64;
use core::cell::UnsafeCell;
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::BootCell;

const fn selector(index: u16, rpl: u16) -> u16 {
    (index << 3) | rpl
}

pub const KERNEL_CS: u16 = selector(1, 0);
pub const KERNEL_DS: u16 = selector(2, 0);
pub const USER_DS: u16 = selector(3, 3);
pub const USER_CS: u16 = selector(4, 3);
pub const TSS_SEL: u16 = selector(5, 0);

const _: () = {
    assert!(KERNEL_CS == 0x08);
    assert!(KERNEL_DS == 0x10);
    assert!(USER_DS == 0x1B);
    assert!(USER_CS == 0x23);
    assert!(TSS_SEL == 0x28);
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DescriptorError {
    #[error("descriptor tables are already loaded")]
    AlreadyLoaded,
}

/// Pointer format required by `lgdt` and `lidt`.
#[repr(C, packed)]
pub struct DescTablePtr {
    /// Size of the table minus one.
    pub limit: u16,
    pub base: VirtualAddress,
}

/// Read by the CPU only.
#[allow(dead_code)]
#[repr(C, align(16))]
pub struct Gdt {
    null: Desc64,
    kcode: Desc64,
    /// Must follow `kcode` for `syscall`.
    kdata: Desc64,
    /// Must precede `ucode` for `sysretq`.
    udata: Desc64,
    ucode: Desc64,
    tss: TssDesc64,
}

impl Gdt {
    const fn with_tss(tss: TssDesc64) -> Self {
        Self {
            null: Desc64::NULL,
            kcode: Desc64::code(Dpl::Kernel),
            kdata: Desc64::data(Dpl::Kernel),
            udata: Desc64::data(Dpl::User),
            ucode: Desc64::code(Dpl::User),
            tss,
        }
    }
}

/// GDT and TSS, both referenced by the CPU for the rest of the boot.
///
/// `ltr` sets the busy bit inside the GDT's TSS descriptor, and the TSS
/// is read on every elevation, so both live behind `UnsafeCell`.
struct CpuTables {
    gdt: UnsafeCell<Gdt>,
    tss: UnsafeCell<Tss64>,
}

// Written once before `lgdt`; afterwards only the CPU touches them.
unsafe impl Sync for CpuTables {}

static TABLES: BootCell<CpuTables> = BootCell::new();

/// Builds and loads the GDT and TSS, reloads every segment register and
/// loads the task register.
///
/// # Safety
/// CPL0 with interrupts masked. `rsp0` must be the top of a mapped,
/// writable stack that stays reserved for traps from ring 3.
///
/// # Errors
/// [`DescriptorError::AlreadyLoaded`] on a second call.
#[allow(clippy::cast_possible_truncation)]
pub unsafe fn init_gdt_and_tss(rsp0: VirtualAddress) -> Result<(), DescriptorError> {
    let tables = TABLES
        .set(CpuTables {
            gdt: UnsafeCell::new(Gdt::with_tss(TssDesc64::new(VirtualAddress::new(0), 0))),
            tss: UnsafeCell::new(Tss64::with_rsp0(rsp0)),
        })
        .map_err(|_| DescriptorError::AlreadyLoaded)?;

    // The TSS address is only known once the tables are pinned.
    let tss_base = VirtualAddress::from_ptr(tables.tss.get());
    let gdt = tables.gdt.get();
    unsafe { (*gdt).tss = TssDesc64::new(tss_base, Tss64::LIMIT) };

    let ptr = DescTablePtr {
        limit: (size_of::<Gdt>() - 1) as u16,
        base: VirtualAddress::from_ptr(gdt),
    };

    unsafe {
        core::arch::asm!(
            "lgdt [{}]",
            in(reg) &raw const ptr,
            options(readonly, nostack, preserves_flags)
        );

        core::arch::asm!(
            "mov ds, {0:x}",
            "mov es, {0:x}",
            "mov ss, {0:x}",
            in(reg) KERNEL_DS,
            options(nostack, preserves_flags)
        );

        // Far return to reload CS.
        core::arch::asm!(
            "push {cs}",
            "lea rax, [rip + 2f]",
            "push rax",
            "retfq",
            "2:",
            cs = in(reg) u64::from(KERNEL_CS),
            out("rax") _,
        );

        core::arch::asm!(
            "ltr {0:x}",
            in(reg) TSS_SEL,
            options(nostack, preserves_flags)
        );
    }

    log::info!("GDT loaded, TSS at {tss_base} with rsp0 = {rsp0}");
    Ok(())
}
