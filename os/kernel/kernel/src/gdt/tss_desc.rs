use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;

/// Low 8 bytes of a 64-bit *Available TSS* descriptor.
#[bitfield(u64)]
pub struct TssDescLow {
    pub limit_lo: u16,
    pub base_lo: u16,
    pub base_mid: u8,
    /// `0x9`: available 64-bit TSS.
    #[bits(4)]
    pub typ: u8,
    /// 0: system descriptor.
    pub s: bool,
    #[bits(2)]
    pub dpl: u8,
    pub p: bool,
    #[bits(4)]
    pub limit_hi: u8,
    pub avl: bool,
    #[bits(2)]
    __: u8,
    /// Byte granularity when clear.
    pub g: bool,
    pub base_hi: u8,
}

/// High 8 bytes: `base[63:32]`, the rest reserved.
#[bitfield(u64)]
pub struct TssDescHigh {
    pub base_upper: u32,
    __: u32,
}

/// 16-byte TSS system descriptor, occupying two GDT slots.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct TssDesc64 {
    pub low: TssDescLow,
    pub high: TssDescHigh,
}

impl TssDesc64 {
    const AVAILABLE_TSS: u8 = 0x9;

    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn new(base: VirtualAddress, limit: u32) -> Self {
        let base = base.as_u64();
        let low = TssDescLow::new()
            .with_limit_lo((limit & 0xFFFF) as u16)
            .with_limit_hi(((limit >> 16) & 0xF) as u8)
            .with_base_lo((base & 0xFFFF) as u16)
            .with_base_mid(((base >> 16) & 0xFF) as u8)
            .with_base_hi(((base >> 24) & 0xFF) as u8)
            .with_typ(Self::AVAILABLE_TSS)
            .with_s(false)
            .with_dpl(0)
            .with_p(true);
        let high = TssDescHigh::new().with_base_upper((base >> 32) as u32);
        Self { low, high }
    }

    /// Reassembles the base address.
    #[allow(clippy::cast_lossless)]
    #[must_use]
    pub const fn base(&self) -> u64 {
        (self.high.base_upper() as u64) << 32
            | (self.low.base_hi() as u64) << 24
            | (self.low.base_mid() as u64) << 16
            | self.low.base_lo() as u64
    }
}

const _: () = {
    assert!(size_of::<TssDesc64>() == 16);
    let desc = TssDesc64::new(VirtualAddress::new(0xFFFF_8000_1234_5678), 0x67);
    assert!(desc.base() == 0xFFFF_8000_1234_5678);
    assert!(desc.low.limit_lo() == 0x67);
    assert!(desc.low.typ() == 0x9);
};
