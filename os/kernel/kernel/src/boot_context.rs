//! The boot context: everything trap handlers need to know about the
//! address spaces, built once by the paging stage and immutable afterwards.

use crate::memory::IdentityMapper;
use kernel_sync::BootCell;
use kernel_vmem::{KernelSpace, TableArena, UserSpace};

pub struct BootContext {
    pub arena: TableArena<'static, IdentityMapper>,
    pub kernel: KernelSpace,
    pub user: UserSpace,
}

static BOOT: BootCell<BootContext> = BootCell::new();

/// Publishes the context. Only the first call wins.
pub fn publish(ctx: BootContext) -> Result<&'static BootContext, BootContext> {
    BOOT.set(ctx)
}

/// The published context, or `None` while paging is still being built.
#[inline]
pub fn get() -> Option<&'static BootContext> {
    BOOT.get()
}
