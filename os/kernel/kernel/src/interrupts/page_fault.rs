//! # `#PF` handler
//!
//! The user window's last slot starts out as a non-present sentinel. The
//! first touch of that page faults here; the handler points the slot at
//! the lazy backing page, reloads CR3 and returns so the faulting
//! instruction retries. The rewrite depends only on the boot layout, so a
//! second fault on the same page repeats it verbatim.
//!
//! Faults anywhere else cannot be resolved and halt the machine.

use crate::boot_context;
use crate::init::halt;
use bitfield_struct::bitfield;
use core::arch::naked_asm;
use kernel_info::memory::LAZY_VIRT;
use kernel_memory_addresses::PAGE_SIZE;
use kernel_vmem::{Cr3Root, SlotRemap};
use log::{debug, error};

/// Entry stub.
///
/// On entry the CPU has pushed SS, RSP, RFLAGS, CS, RIP and the error
/// code onto a 16-byte aligned stack, so after saving the nine
/// caller-saved registers one more 8-byte pad aligns the call.
#[unsafe(naked)]
pub extern "sysv64" fn page_fault_stub() {
    naked_asm!(
        "cld",
        "push rax", "push rcx", "push rdx", "push rsi", "push rdi",
        "push r8", "push r9", "push r10", "push r11",

        "mov rdi, cr2",
        // Error code sits above the nine saved registers.
        "mov rsi, [rsp + 72]",
        "sub rsp, 8",
        "call {rust}",
        "add rsp, 8",

        "pop r11", "pop r10", "pop r9", "pop r8",
        "pop rdi", "pop rsi", "pop rdx", "pop rcx", "pop rax",
        // Drop the error code.
        "add rsp, 8",
        "iretq",
        rust = sym page_fault_rust,
    )
}

extern "sysv64" fn page_fault_rust(cr2: u64, error_code: u64) {
    let err = PageFaultError::from_bits(error_code);

    if !is_lazy_page(cr2) {
        error!("unresolvable page fault at {cr2:#x}: {}", err.explain());
        error!("{err:?}");
        halt();
    }

    let Some(ctx) = boot_context::get() else {
        error!("page fault at {cr2:#x} before the address spaces were built");
        halt();
    };

    // SAFETY: the published user space is the one loaded in CR3 whenever
    // the lazy slot can be touched.
    match unsafe { ctx.user.remap(&ctx.arena, SlotRemap::LazyPage, &mut Cr3Root) } {
        Ok(entry) => debug!(
            "page fault at {cr2:#x} ({}), lazy slot now {:#x}",
            err.explain(),
            entry.into_bits()
        ),
        Err(e) => {
            error!("lazy remap failed: {e}");
            halt();
        }
    }
}

/// Whether `addr` falls inside the lazily mapped page.
const fn is_lazy_page(addr: u64) -> bool {
    addr >= LAZY_VIRT && addr - LAZY_VIRT < PAGE_SIZE
}

/// Page-fault error code layout (Intel SDM Vol. 3A, §6.15).
#[bitfield(u64)]
pub struct PageFaultError {
    /// 0 = non-present page, 1 = protection violation.
    pub present: bool,
    /// 1 = write access.
    pub write: bool,
    /// 1 = access from CPL 3.
    pub user: bool,
    /// 1 = reserved bit set in a paging structure.
    pub reserved_bit: bool,
    /// 1 = instruction fetch.
    pub instruction_fetch: bool,
    #[bits(59)]
    __: u64,
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "non-present page"
        } else if self.reserved_bit() {
            "reserved bit set in a paging structure"
        } else if self.instruction_fetch() {
            "instruction fetch on protected page"
        } else if self.write() {
            "write to protected page"
        } else {
            "read from protected page"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_lazy_page_is_resolvable() {
        assert!(is_lazy_page(LAZY_VIRT));
        assert!(is_lazy_page(LAZY_VIRT + PAGE_SIZE - 1));
        assert!(!is_lazy_page(LAZY_VIRT - 1));
        assert!(!is_lazy_page(0));
    }

    #[test]
    fn error_code_decoding() {
        let user_read_missing = PageFaultError::from_bits(0b100);
        assert!(user_read_missing.user());
        assert_eq!(user_read_missing.explain(), "non-present page");

        let write_protected = PageFaultError::from_bits(0b011);
        assert_eq!(write_protected.explain(), "write to protected page");
    }
}
