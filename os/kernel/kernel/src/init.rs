use crate::driver::KernelBoot;
use crate::userland::enter_user_mode;
use kernel_debugcon::{DebugconLogger, debugcon_trace};
use kernel_info::KERNEL_LOG_LEVEL;
use kernel_info::boot::KernelBootInfo;
use kernel_info::memory::KERNEL_STACK_SIZE;
use kernel_info::stage::{BootStage, run_to_terminal};
use log::{error, info};

/// A byte buffer with a guaranteed 16-byte alignment, used to back stacks.
#[repr(align(16))]
pub struct Aligned16<const N: usize>(pub [u8; N]);

/// Boot stack of the bootstrap processor.
///
/// Lives in `.bss.boot` and is the only kernel stack apart from the one
/// the `syscall` stub switches to; traps from ring 3 land on the privileged
/// stack inside the user region.
#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_STACK: Aligned16<KERNEL_STACK_SIZE> = Aligned16([0; KERNEL_STACK_SIZE]);

/// The kernel entry point.
///
/// # ABI
/// `sysv64`, so the loader passes the boot record pointer in `RDI`.
///
/// # Naked function & Stack
/// The loader's stack is not ours to keep. This function switches to
/// [`BOOT_STACK`] before any Rust code runs, builds a fake return address
/// so the callee sees a SysV-aligned stack, and jumps into
/// [`kernel_entry_on_boot_stack`].
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub extern "sysv64" fn _start_kernel(_boot_info: *const KernelBootInfo) -> ! {
    core::arch::naked_asm!(
        "cli",
        "mov r12, rdi",
        "lea rax, [rip + {stack_sym}]",
        "add rax, {stack_size}",
        "and rax, -16",
        "mov rsp, rax",
        // RSP % 16 == 8 at the callee's first instruction.
        "push 0",
        "xor rbp, rbp",
        "mov rdi, r12",
        "jmp {rust_entry}",
        stack_sym = sym BOOT_STACK,
        stack_size = const KERNEL_STACK_SIZE,
        rust_entry = sym kernel_entry_on_boot_stack,
    );
}

/// Kernel entry running on [`BOOT_STACK`].
#[unsafe(no_mangle)]
extern "sysv64" fn kernel_entry_on_boot_stack(boot_info: *const KernelBootInfo) -> ! {
    if DebugconLogger::install(KERNEL_LOG_LEVEL).is_err() {
        debugcon_trace!("logger was already installed\n");
    }
    info!("Kernel core starting");

    // SAFETY: the loader passes either null or a record that outlives the kernel.
    let Some(boot_info) = (unsafe { boot_info.as_ref() }) else {
        error!("No boot information passed to the kernel");
        halt();
    };
    info!(
        "Kernel tables at {}, user region at {}, user image of {} pages at {}",
        boot_info.kernel_tables(),
        boot_info.user_region(),
        boot_info.user_image_pages,
        boot_info.user_image()
    );

    let mut boot = KernelBoot::new(boot_info.clone());
    let terminal = run_to_terminal(&mut boot);
    if let Some(bridge) = boot.xen() {
        info!(
            "Xen bridge {} (version {:?}), {} grant references free",
            if bridge.is_complete() { "complete" } else { "partial" },
            bridge.version(),
            bridge.free_grants()
        );
    }

    match terminal {
        BootStage::Idle => match boot.handoff() {
            Some(handoff) => unsafe { enter_user_mode(handoff) },
            None => {
                info!("Nothing to run in user mode, idling");
                idle()
            }
        },
        stage => {
            error!("Boot ended in stage {stage}");
            halt()
        }
    }
}

/// Terminal state for a machine with nothing left to do: interrupts stay
/// enabled so the timer keeps ticking.
pub fn idle() -> ! {
    loop {
        unsafe { core::arch::asm!("sti", "hlt", options(nomem, nostack)) };
    }
}

/// Terminal state after an unrecoverable error.
pub fn halt() -> ! {
    loop {
        unsafe { core::arch::asm!("cli", "hlt", options(nomem, nostack)) };
    }
}
