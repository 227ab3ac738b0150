//! # `syscall`/`sysretq` setup
//!
//! Four MSRs make the fast system call path work:
//!
//! * `IA32_EFER.SCE` enables the instructions.
//! * `IA32_STAR` holds the kernel CS (SS is CS + 8) and the base from which
//!   `sysretq` derives the user SS (base + 8) and CS (base + 16).
//! * `IA32_LSTAR` is the entry RIP, [`entry::syscall_entry_stub`].
//! * `IA32_FMASK` clears IF on entry so the stub runs with interrupts off.

pub mod entry;

use crate::gdt::{KERNEL_CS, USER_CS, USER_DS};
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::efer::Efer;
use kernel_registers::msr::{Ia32Fmask, Ia32LStar, Ia32Star};
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use kernel_syscall::SyscallHost;
use log::info;

const STAR: Ia32Star = match Ia32Star::for_selectors(KERNEL_CS, USER_CS) {
    Some(star) => star,
    None => panic!("user CS does not follow the sysretq layout"),
};

const _: () = {
    assert!(STAR.sysret_cs() == USER_CS);
    assert!(STAR.sysret_ss() == USER_DS);
};

/// Programs EFER.SCE, STAR, LSTAR and FMASK.
///
/// # Safety
/// CPL0. The GDT must follow the layout in [`crate::gdt`] before the first
/// `syscall` executes.
pub unsafe fn init_syscalls() {
    let entry = VirtualAddress::new(entry::syscall_entry_stub as usize as u64);

    unsafe {
        let efer = Efer::load_unsafe().with_sce(true);
        efer.store_unsafe();
        STAR.store_unsafe();
        Ia32LStar::entry(entry).store_unsafe();
        Ia32Fmask::interrupts_masked().store_unsafe();
    }

    info!("syscall entry at {entry}, STAR = {:#018x}", STAR.into_bits());
}

/// Routes user output to the kernel log.
#[derive(Debug, Default)]
pub struct LogHost;

impl SyscallHost for LogHost {
    fn print(&mut self, text: &str) {
        info!(target: "user", "{text}");
    }
}
