//! Shared handler for every CPU exception except `#PF`.
//!
//! Some exceptions push an error code and some do not, so the stub never
//! returns: it reports the stack pointer at entry and halts.

use crate::init::halt;
use core::arch::naked_asm;

#[unsafe(naked)]
pub extern "sysv64" fn generic_fault_stub() {
    naked_asm!(
        "cld",
        "mov rdi, rsp",
        "and rsp, -16",
        "call {rust}",
        "2: hlt",
        "jmp 2b",
        rust = sym generic_fault_rust,
    )
}

extern "sysv64" fn generic_fault_rust(rsp: u64) -> ! {
    log::error!("fault, rsp = {rsp:#x}");
    halt()
}
