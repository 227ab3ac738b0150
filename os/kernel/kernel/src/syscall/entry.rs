use crate::init::Aligned16;
use crate::syscall::LogHost;
use kernel_info::memory::SYSCALL_STACK_SIZE;
use kernel_syscall::{SyscallArgs, dispatch};

/// Stack the entry stub switches to.
///
/// FMASK clears IF on entry and there is a single CPU, so one stack and
/// one scratch slot for the user RSP are enough.
static mut SYSCALL_STACK: Aligned16<SYSCALL_STACK_SIZE> = Aligned16([0; SYSCALL_STACK_SIZE]);
static mut USER_RSP: u64 = 0;

/// Register state saved by [`syscall_entry_stub`].
///
/// Layout must match the push order in the stub:
///
/// ```text
///   +0  rax     return value
///   +8  rdi     call number
///   +16 rsi     arg 1
///   +24 rdx     arg 2
///   +32 r10     arg 3 (rcx is taken by syscall)
///   +40 r8      arg 4
///   +48 r9      arg 5
///   +56 rip     user RIP (from rcx)
///   +64 rflags  user RFLAGS (from r11)
///   +72 rsp     user RSP
/// ```
#[derive(Debug)]
#[repr(C)]
pub struct SyscallFrame {
    pub rax: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub r10: u64,
    pub r8: u64,
    pub r9: u64,
    pub rip: u64,
    pub rflags: u64,
    pub rsp: u64,
}

const _: () = {
    use core::mem::offset_of;
    assert!(size_of::<SyscallFrame>() == 80);
    assert!(offset_of!(SyscallFrame, rip) == 56);
    assert!(offset_of!(SyscallFrame, rsp) == 72);
};

#[unsafe(naked)]
pub extern "sysv64" fn syscall_entry_stub() {
    core::arch::naked_asm!(
        // RCX = user RIP, R11 = user RFLAGS, RSP = user stack.
        "mov qword ptr [rip + {user_rsp}], rsp",
        "lea rsp, [rip + {stack}]",
        "add rsp, {stack_size}",

        // Ten pushes from a 16-byte aligned top keep the call aligned.
        "push qword ptr [rip + {user_rsp}]",
        "push r11",
        "push rcx",
        "push r9",
        "push r8",
        "push r10",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rax",

        "mov rdi, rsp",
        "call {rust}",

        // Callee-saved registers survive the call; the rest come back
        // from the frame, with rax carrying the result.
        "mov rax, [rsp + 0]",
        "mov rdi, [rsp + 8]",
        "mov rsi, [rsp + 16]",
        "mov rdx, [rsp + 24]",
        "mov r10, [rsp + 32]",
        "mov r8,  [rsp + 40]",
        "mov r9,  [rsp + 48]",
        "mov rcx, [rsp + 56]",
        "mov r11, [rsp + 64]",
        "mov rsp, [rsp + 72]",
        "sysretq",

        user_rsp = sym USER_RSP,
        stack = sym SYSCALL_STACK,
        stack_size = const SYSCALL_STACK_SIZE,
        rust = sym syscall_rust,
    );
}

#[allow(clippy::cast_sign_loss)]
extern "sysv64" fn syscall_rust(tf: &mut SyscallFrame) {
    let args = SyscallArgs([tf.rsi, tf.rdx, tf.r10, tf.r8, tf.r9]);
    // SAFETY: the user window is mapped in the active address space, so a
    // string pointer from ring 3 is readable here.
    let ret = unsafe { dispatch(&mut LogHost, tf.rdi, args) };
    tf.rax = ret as u64;
}
