use crate::gdt::{USER_CS, USER_DS};
use kernel_info::memory::{USER_IMAGE_BASE, USER_STACK_TOP};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use log::info;

/// RFLAGS for ring 3: IF plus the always-one bit 1.
const USER_RFLAGS: u64 = 0x202;

/// Where ring 3 starts.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UserHandoff {
    pub entry: VirtualAddress,
    pub stack_top: VirtualAddress,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("entry offset {offset:#x} lies outside the {pages}-page user image")]
pub struct EntryOutOfImage {
    pub offset: u64,
    pub pages: u64,
}

impl UserHandoff {
    /// Entry point `entry_offset` bytes into the image mapped at
    /// [`USER_IMAGE_BASE`], with the stack at [`USER_STACK_TOP`].
    ///
    /// # Errors
    /// [`EntryOutOfImage`] if the offset is past the mapped image.
    pub const fn for_image(entry_offset: u64, pages: u64) -> Result<Self, EntryOutOfImage> {
        if entry_offset >= pages.saturating_mul(PAGE_SIZE) {
            return Err(EntryOutOfImage {
                offset: entry_offset,
                pages,
            });
        }
        Ok(Self {
            entry: VirtualAddress::new(USER_IMAGE_BASE + entry_offset),
            stack_top: VirtualAddress::new(USER_STACK_TOP),
        })
    }
}

/// Drops to ring 3 with `iretq`.
///
/// # Safety
/// The user address space must be active, the GDT and TSS loaded, and
/// `handoff` must point into mapped user pages.
pub unsafe fn enter_user_mode(handoff: UserHandoff) -> ! {
    let rip = handoff.entry.as_u64();
    let rsp = handoff.stack_top.as_u64();
    let cs = u64::from(USER_CS);
    let ss = u64::from(USER_DS);

    info!("Entering user mode at {} with stack {}", handoff.entry, handoff.stack_top);

    unsafe {
        core::arch::asm!(
            "push {ss}",
            "push {rsp}",
            "push {rflags}",
            "push {cs}",
            "push {rip}",
            "iretq",
            ss = in(reg) ss, rsp = in(reg) rsp, rflags = in(reg) USER_RFLAGS,
            cs = in(reg) cs, rip = in(reg) rip,
            options(noreturn)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_must_lie_inside_the_image() {
        let ok = UserHandoff::for_image(0x10, 1).unwrap();
        assert_eq!(ok.entry.as_u64(), USER_IMAGE_BASE + 0x10);
        assert_eq!(ok.stack_top.as_u64(), USER_STACK_TOP);

        assert_eq!(
            UserHandoff::for_image(PAGE_SIZE, 1),
            Err(EntryOutOfImage {
                offset: PAGE_SIZE,
                pages: 1
            })
        );
    }
}
