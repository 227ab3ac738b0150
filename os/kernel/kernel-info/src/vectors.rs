//! # Trap Vector Routing
//!
//! The IDT has a fixed 256-entry extent. Each vector belongs to exactly one
//! [`VectorClass`]; the class never changes after the table is loaded.

/// Number of IDT entries.
pub const VECTOR_COUNT: usize = 256;

/// Vectors below this value are CPU exceptions.
pub const EXCEPTION_VECTORS: u8 = 32;

/// `#PF`.
pub const PAGE_FAULT_VECTOR: u8 = 14;

/// Local APIC timer.
pub const TIMER_VECTOR: u8 = 40;

/// LAPIC timer initial count in periodic mode.
pub const TIMER_INITIAL_COUNT: u32 = 0x40_0000;

/// How a vector is dispatched.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VectorClass {
    /// Null gate. A trap here is fatal.
    Unhandled,
    /// Reports the faulting stack pointer; no recovery.
    Generic,
    /// One-shot remap of the lazy slot.
    PageFault,
    /// Acknowledges the interrupt controller.
    Timer,
}

impl VectorClass {
    /// Routing for `vector`.
    #[must_use]
    pub const fn of(vector: u8) -> Self {
        match vector {
            PAGE_FAULT_VECTOR => Self::PageFault,
            TIMER_VECTOR => Self::Timer,
            v if v < EXCEPTION_VECTORS => Self::Generic,
            _ => Self::Unhandled,
        }
    }

    #[must_use]
    pub const fn is_installed(self) -> bool {
        !matches!(self, Self::Unhandled)
    }
}

const _: () = {
    assert!(TIMER_VECTOR >= EXCEPTION_VECTORS);
    assert!(PAGE_FAULT_VECTOR < EXCEPTION_VECTORS);
};
