//! # 64-bit code/data segment descriptors
//!
//! In long mode the base and limit of code and data descriptors are
//! ignored; paging does the protection. What still matters is the type,
//! the descriptor privilege level, the present bit and, for code, `L=1`
//! with `DB=0`.

use bitfield_struct::bitfield;

/// Descriptor privilege level.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum Dpl {
    Kernel = 0,
    User = 3,
}

/// Shared layout of code and data descriptors.
#[bitfield(u64)]
pub struct SegmentDescBits {
    /// Ignored in long mode.
    pub limit_lo: u16,
    /// Ignored in long mode.
    pub base_lo: u16,
    pub base_mid: u8,
    /// `0b1010` execute+read code, `0b0010` read/write data.
    #[bits(4)]
    pub typ: u8,
    /// 1 for code/data, 0 for system descriptors.
    pub s: bool,
    #[bits(2)]
    pub dpl: u8,
    pub p: bool,
    #[bits(4)]
    pub limit_hi: u8,
    pub avl: bool,
    /// 64-bit code.
    pub l: bool,
    /// Must be 0 when `l` is set.
    pub db: bool,
    pub g: bool,
    pub base_hi: u8,
}

const CODE_EXEC_READ: u8 = 0b1010;
const DATA_READ_WRITE: u8 = 0b0010;

/// A single 8-byte GDT entry.
#[repr(transparent)]
#[derive(Copy, Clone)]
pub struct Desc64(SegmentDescBits);

impl Desc64 {
    pub const NULL: Self = Self(SegmentDescBits::new());

    /// 64-bit code segment.
    #[must_use]
    pub const fn code(dpl: Dpl) -> Self {
        Self(
            SegmentDescBits::new()
                .with_typ(CODE_EXEC_READ)
                .with_s(true)
                .with_dpl(dpl as u8)
                .with_p(true)
                .with_l(true)
                .with_db(false),
        )
    }

    /// Data/stack segment.
    #[must_use]
    pub const fn data(dpl: Dpl) -> Self {
        Self(
            SegmentDescBits::new()
                .with_typ(DATA_READ_WRITE)
                .with_s(true)
                .with_dpl(dpl as u8)
                .with_p(true),
        )
    }

    #[inline]
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        self.0.into_bits()
    }
}

const _: () = {
    assert!(size_of::<Desc64>() == 8);
    // The classic flat encodings with base/limit zeroed.
    assert!(Desc64::code(Dpl::Kernel).to_u64() == 0x0020_9A00_0000_0000);
    assert!(Desc64::data(Dpl::Kernel).to_u64() == 0x0000_9200_0000_0000);
    assert!(Desc64::code(Dpl::User).to_u64() == 0x0020_FA00_0000_0000);
    assert!(Desc64::data(Dpl::User).to_u64() == 0x0000_F200_0000_0000);
};
