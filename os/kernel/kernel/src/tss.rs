//! # 64-bit Task State Segment
//!
//! Long mode has no hardware task switching, but the CPU still reads the
//! TSS on every interrupt that raises the privilege level: `rsp0` is the
//! stack it switches to when a trap arrives from ring 3. Without a valid
//! `rsp0` the first user-mode fault escalates to a double fault.
//!
//! `syscall` does not consult the TSS; the entry stub switches stacks
//! itself.

use kernel_memory_addresses::VirtualAddress;

#[allow(dead_code)]
#[repr(C, packed)]
pub struct Tss64 {
    _reserved0: u32,
    /// Ring-0 stack used on privilege elevation.
    pub rsp0: VirtualAddress,
    pub rsp1: VirtualAddress,
    pub rsp2: VirtualAddress,
    _reserved1: u64,
    /// Interrupt stack table, unused: no gate selects an IST slot.
    pub ist: [VirtualAddress; 7],
    _reserved2: u64,
    _reserved3: u16,
    /// Pointing past the end of the segment disables the I/O bitmap.
    pub iopb_offset: u16,
}

impl Tss64 {
    /// A TSS whose only live field is `rsp0`.
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn with_rsp0(rsp0: VirtualAddress) -> Self {
        const NONE: VirtualAddress = VirtualAddress::new(0);
        Self {
            _reserved0: 0,
            rsp0,
            rsp1: NONE,
            rsp2: NONE,
            _reserved1: 0,
            ist: [NONE; 7],
            _reserved2: 0,
            _reserved3: 0,
            iopb_offset: size_of::<Self>() as u16,
        }
    }

    /// Segment limit for the TSS descriptor.
    #[allow(clippy::cast_possible_truncation)]
    pub const LIMIT: u32 = (size_of::<Self>() - 1) as u32;
}

const _: () = {
    use core::mem::offset_of;
    assert!(size_of::<Tss64>() == 104);
    assert!(offset_of!(Tss64, rsp0) == 4);
    assert!(offset_of!(Tss64, ist) == 36);
    assert!(offset_of!(Tss64, iopb_offset) == 102);
};
