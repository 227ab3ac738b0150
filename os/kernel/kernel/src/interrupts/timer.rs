use crate::apic;
use core::arch::naked_asm;

/// Local APIC timer entry stub.
///
/// The CPU pushes five qwords onto a 16-byte aligned stack; with the nine
/// caller-saved registers on top the call site is aligned again.
#[unsafe(naked)]
pub extern "sysv64" fn timer_stub() {
    naked_asm!(
        "cld",
        "push rax", "push rcx", "push rdx", "push rsi", "push rdi",
        "push r8", "push r9", "push r10", "push r11",
        "call {rust}",
        "pop r11", "pop r10", "pop r9", "pop r8",
        "pop rdi", "pop rsi", "pop rdx", "pop rcx", "pop rax",
        "iretq",
        rust = sym timer_rust,
    )
}

extern "sysv64" fn timer_rust() {
    // SAFETY: only reachable once the x2APIC timer is armed.
    unsafe { apic::eoi() };
}
