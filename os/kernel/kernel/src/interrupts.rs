//! # x86-64 Interrupt Descriptor Table
//!
//! All 256 gates start out non-present. [`init_idt`] fills in the ones
//! [`VectorClass::of`] routes somewhere and loads the table once; nothing
//! is re-registered afterwards.
//!
//! ```ignore
//! idt[14]
//!     .set_handler(page_fault_stub)
//!     .selector(KERNEL_CS)
//!     .dpl(Dpl::Kernel)
//!     .present(true)
//!     .gate_interrupt();
//! ```
//!
//! Handlers:
//! * [`generic`]: CPU exceptions other than `#PF`. Reports and halts.
//! * [`page_fault`]: resolves the lazily mapped slot and returns.
//! * [`timer`]: acknowledges the local APIC and returns.

pub mod generic;
pub mod page_fault;
pub mod timer;

use crate::gdt::descriptors::Dpl;
use crate::gdt::{DescTablePtr, DescriptorError, KERNEL_CS};
use bitfield_struct::bitfield;
use core::ops::{Index, IndexMut};
use kernel_info::vectors::{VECTOR_COUNT, VectorClass};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::BootCell;

const _: () = assert!(size_of::<IdtEntry>() == 16);
const _: () = assert!(align_of::<Idt>() == 16);

/// The middle two bytes of a gate: IST index and type/attributes.
#[bitfield(u16)]
pub struct IdtGateAttr {
    /// Interrupt stack table slot, 0 for none.
    #[bits(3)]
    pub ist: u8,
    #[bits(5)]
    __zero0: u8,
    /// `0xE` interrupt gate, `0xF` trap gate.
    #[bits(4)]
    pub typ: u8,
    pub s: bool,
    #[bits(2)]
    pub dpl: u8,
    pub present: bool,
}

/// A 256-entry IDT.
#[repr(C, align(16))]
pub struct Idt {
    entries: [IdtEntry; VECTOR_COUNT],
}

impl Idt {
    /// All gates not present.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [IdtEntry::MISSING; VECTOR_COUNT],
        }
    }

    /// Loads the table with `lidt`.
    ///
    /// # Safety
    /// CPL0. Every present gate must point at a valid handler in the kernel
    /// code segment.
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn load(&'static self) {
        let idtr = DescTablePtr {
            limit: (size_of::<Self>() - 1) as u16,
            base: VirtualAddress::from_ptr(core::ptr::from_ref(self)),
        };
        unsafe {
            core::arch::asm!(
                "lidt [{}]",
                in(reg) &raw const idtr,
                options(readonly, nostack, preserves_flags)
            );
        }
    }
}

impl Index<u8> for Idt {
    type Output = IdtEntry;
    fn index(&self, v: u8) -> &Self::Output {
        &self.entries[usize::from(v)]
    }
}

impl IndexMut<u8> for Idt {
    fn index_mut(&mut self, v: u8) -> &mut Self::Output {
        &mut self.entries[usize::from(v)]
    }
}

/// One 16-byte gate descriptor.
///
/// ```text
/// 127            96 95             64
/// +----------------+----------------+
/// |      zero      | offset[63:32]  |
/// +----------------+----------------+
/// 63    48 47    32 31    16 15     0
/// +-------+--------+--------+-------+
/// |off mid| attr   |selector|off lo |
/// +-------+--------+--------+-------+
/// ```
#[repr(C)]
#[derive(Copy, Clone)]
pub struct IdtEntry {
    offset_lo: u16,
    selector: u16,
    ist_type: u16,
    offset_mid: u16,
    offset_hi: u32,
    _reserved: u32,
}

impl IdtEntry {
    pub const MISSING: Self = Self {
        offset_lo: 0,
        selector: 0,
        ist_type: IdtGateAttr::new().into_bits(),
        offset_mid: 0,
        offset_hi: 0,
        _reserved: 0,
    };

    /// Stores the handler address and returns a builder. The gate stays
    /// non-present until [`IdtEntryBuilder::present`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_handler(&mut self, handler: extern "sysv64" fn()) -> IdtEntryBuilder<'_> {
        let addr = handler as usize as u64;
        self.offset_lo = (addr & 0xFFFF) as u16;
        self.offset_mid = ((addr >> 16) & 0xFFFF) as u16;
        self.offset_hi = (addr >> 32) as u32;
        self.selector = KERNEL_CS;
        self.ist_type = IdtGateAttr::new().with_present(false).into_bits();
        IdtEntryBuilder { entry: self }
    }

    #[must_use]
    pub const fn is_present(&self) -> bool {
        IdtGateAttr::from_bits(self.ist_type).present()
    }

    #[must_use]
    pub const fn handler(&self) -> u64 {
        ((self.offset_hi as u64) << 32) | ((self.offset_mid as u64) << 16) | self.offset_lo as u64
    }
}

pub struct IdtEntryBuilder<'a> {
    entry: &'a mut IdtEntry,
}

impl IdtEntryBuilder<'_> {
    #[inline]
    pub const fn present(self, p: bool) -> Self {
        let bf = IdtGateAttr::from_bits(self.entry.ist_type).with_present(p);
        self.entry.ist_type = bf.into_bits();
        self
    }

    /// Lowest privilege allowed to raise the vector with `int n`.
    #[inline]
    pub const fn dpl(self, dpl: Dpl) -> Self {
        let bf = IdtGateAttr::from_bits(self.entry.ist_type).with_dpl(dpl as u8);
        self.entry.ist_type = bf.into_bits();
        self
    }

    /// Interrupt gate: IF is cleared on entry.
    #[inline]
    pub const fn gate_interrupt(self) -> Self {
        let bf = IdtGateAttr::from_bits(self.entry.ist_type)
            .with_typ(0xE)
            .with_s(false);
        self.entry.ist_type = bf.into_bits();
        self
    }

    #[inline]
    pub const fn selector(self, sel: u16) -> Self {
        self.entry.selector = sel;
        self
    }
}

/// Entry stub for each vector class, `None` for null gates.
fn stub_for(class: VectorClass) -> Option<extern "sysv64" fn()> {
    match class {
        VectorClass::Unhandled => None,
        VectorClass::Generic => Some(generic::generic_fault_stub),
        VectorClass::PageFault => Some(page_fault::page_fault_stub),
        VectorClass::Timer => Some(timer::timer_stub),
    }
}

/// Routes every vector to its class handler.
#[must_use]
pub fn build_idt() -> Idt {
    let mut idt = Idt::new();
    for vector in 0..=u8::MAX {
        if let Some(stub) = stub_for(VectorClass::of(vector)) {
            idt[vector]
                .set_handler(stub)
                .selector(KERNEL_CS)
                .dpl(Dpl::Kernel)
                .present(true)
                .gate_interrupt();
        }
    }
    idt
}

static IDT: BootCell<Idt> = BootCell::new();

/// Builds and loads the IDT.
///
/// # Safety
/// CPL0, after the GDT is loaded.
///
/// # Errors
/// [`DescriptorError::AlreadyLoaded`] on a second call.
pub unsafe fn init_idt() -> Result<(), DescriptorError> {
    let idt = IDT
        .set(build_idt())
        .map_err(|_| DescriptorError::AlreadyLoaded)?;

    let installed = idt.entries.iter().filter(|e| e.is_present()).count();
    debug_assert!(idt[kernel_info::vectors::PAGE_FAULT_VECTOR].handler() != 0);
    unsafe { idt.load() };
    log::info!("IDT loaded with {installed} gates");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_exceptions_page_fault_and_timer() {
        let idt = build_idt();
        for v in 0..32u8 {
            assert!(idt[v].is_present(), "exception {v} has no gate");
        }
        assert!(!idt[32].is_present());
        assert!(idt[40].is_present());
        assert!(!idt[255].is_present());

        assert_eq!(
            idt[14].handler(),
            page_fault::page_fault_stub as usize as u64
        );
        assert_eq!(idt[40].handler(), timer::timer_stub as usize as u64);
        assert_eq!(idt[0].handler(), generic::generic_fault_stub as usize as u64);
    }

    #[test]
    fn gates_are_kernel_interrupt_gates() {
        let idt = build_idt();
        let attr = IdtGateAttr::from_bits(idt[40].ist_type);
        assert_eq!(attr.typ(), 0xE);
        assert_eq!(attr.dpl(), 0);
        assert_eq!(attr.ist(), 0);
        assert_eq!(idt[40].selector, KERNEL_CS);
        assert_eq!(idt[40].ist_type, 0x8E00);
    }
}
