//! # Kernel Entry Point
//!
//! The loader jumps to [`init::_start_kernel`] with paging on, interrupts
//! off and an identity map covering everything named in the boot record.
//! From there the kernel walks its boot stages (see
//! [`kernel_info::stage`]) and either enters ring 3, idles, or halts.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
#![allow(unsafe_code)]

mod apic;
mod boot_context;
mod driver;
mod gdt;
mod init;
mod interrupts;
mod memory;
mod syscall;
mod tls;
mod tss;
mod userland;
mod xen;

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    // The logger may not be installed yet; write straight to the port.
    kernel_debugcon::debugcon_trace!("kernel panic: {info}\n");
    init::halt()
}
