//! # Thread-local block
//!
//! `fs:`-relative code expects the word at `fs:[0]` to hold the block's own
//! address. The block lives in the user region's TLS page, mapped into the
//! reserved slot of the user window, and FS base points at it.

use crate::boot_context::BootContext;
use kernel_info::memory::TLS_VIRT;
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::StoreRegisterUnsafe;
use kernel_registers::msr::Ia32FsBase;
use kernel_vmem::{Cr3Root, SlotRemap, VmemError};
use log::info;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TlsError {
    #[error("mapping the thread-local page failed: {0}")]
    Remap(#[from] VmemError),
    #[error("{0} is not canonical")]
    NonCanonical(VirtualAddress),
    #[error("fs:[0] reads {found:#x} instead of {expected:#x}")]
    SelfPointerMismatch { expected: u64, found: u64 },
}

/// Head of the thread-local page.
#[repr(C)]
#[allow(dead_code)] // read through `fs:[0]`
pub struct TlsBlock {
    /// Address of this block.
    myself: *mut TlsBlock,
}

/// Maps the TLS page, writes the self pointer and loads FS base.
///
/// # Safety
/// CPL0. `ctx.user` must be the active address space.
///
/// # Errors
/// See [`TlsError`].
pub unsafe fn install(ctx: &BootContext) -> Result<VirtualAddress, TlsError> {
    let block = VirtualAddress::new(TLS_VIRT);
    let fs = Ia32FsBase::for_block(block).ok_or(TlsError::NonCanonical(block))?;

    unsafe { ctx.user.remap(&ctx.arena, SlotRemap::ThreadLocal, &mut Cr3Root)? };

    let ptr = block.as_mut_ptr::<TlsBlock>();
    unsafe {
        (&raw mut (*ptr).myself).write(ptr);
        fs.store_unsafe();
    }

    let found = unsafe { read_fs_self() };
    if found != block.as_u64() {
        return Err(TlsError::SelfPointerMismatch {
            expected: block.as_u64(),
            found,
        });
    }

    info!("FS base set to thread-local block at {block}");
    Ok(block)
}

/// Reads the first word of the FS segment.
unsafe fn read_fs_self() -> u64 {
    let value: u64;
    unsafe {
        core::arch::asm!(
            "mov {}, qword ptr fs:[0]",
            out(reg) value,
            options(nostack, readonly, preserves_flags)
        );
    }
    value
}
