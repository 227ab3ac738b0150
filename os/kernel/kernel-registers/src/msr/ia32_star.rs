use crate::msr::Msr;
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};
use bitfield_struct::bitfield;

/// `IA32_STAR`: system call segment selectors (MSR `0xC000_0081`).
///
/// - `syscall` loads `CS = STAR[47:32]` and `SS = STAR[47:32] + 8`.
/// - `sysretq` loads `CS = STAR[63:48] + 16 | 3` and `SS = STAR[63:48] + 8 | 3`.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct Ia32Star {
    /// Bits 0–31: compatibility-mode `syscall` EIP, unused.
    #[bits(32)]
    compat_syscall_eip: u32,

    /// Bits 32–47: kernel CS selector.
    #[bits(16)]
    pub syscall_cs_selector: u16,

    /// Bits 48–63: base selector for `sysretq`.
    #[bits(16)]
    pub sysret_cs_selector: u16,
}

impl Ia32Star {
    pub const IA32_STAR: u32 = 0xC000_0081;
    pub const MSR: Msr = Msr::new(Self::IA32_STAR);

    /// STAR value for a 64-bit kernel whose GDT is laid out as
    /// `kernel code, kernel data, user data, user code`.
    ///
    /// `kernel_cs` and `user_cs` are full selectors (e.g. `0x08` and `0x23`).
    /// Returns `None` when the layout cannot satisfy `sysretq`: the user
    /// data descriptor must sit directly below user code.
    #[must_use]
    pub const fn for_selectors(kernel_cs: u16, user_cs: u16) -> Option<Self> {
        let kidx = kernel_cs >> 3;
        let uidx = user_cs >> 3;
        if kidx == 0 || kernel_cs & 0b11 != 0 || uidx < 2 {
            return None;
        }

        // SS = base + 8 must land on the user data slot (uidx - 1).
        let base = ((uidx - 1) << 3) - 8;
        Some(
            Self::new()
                .with_syscall_cs_selector(kernel_cs)
                .with_sysret_cs_selector(base),
        )
    }

    #[must_use]
    pub const fn sysret_cs(&self) -> u16 {
        (self.sysret_cs_selector() + 16) | 3
    }

    #[must_use]
    pub const fn sysret_ss(&self) -> u16 {
        (self.sysret_cs_selector() + 8) | 3
    }
}

#[cfg(feature = "asm")]
impl LoadRegisterUnsafe for Ia32Star {
    #[inline(always)]
    #[allow(clippy::inline_always)]
    unsafe fn load_unsafe() -> Self {
        let msr = unsafe { Self::MSR.load_raw() };
        Self::from_bits(msr)
    }
}

#[cfg(feature = "asm")]
impl StoreRegisterUnsafe for Ia32Star {
    #[inline(always)]
    #[allow(clippy::inline_always)]
    unsafe fn store_unsafe(self) {
        unsafe { Self::MSR.store_raw(self.into_bits()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysret_lands_on_user_segments() {
        let star = Ia32Star::for_selectors(0x08, 0x23).expect("valid layout");
        assert_eq!(star.syscall_cs_selector(), 0x08);
        assert_eq!(star.sysret_cs_selector(), 0x10);
        assert_eq!(star.sysret_cs(), 0x23);
        assert_eq!(star.sysret_ss(), 0x1B);
        assert_eq!(star.into_bits(), (0x10 << 48) | (0x08 << 32));
    }

    #[test]
    fn rejects_unusable_layouts() {
        assert!(Ia32Star::for_selectors(0x00, 0x23).is_none());
        assert!(Ia32Star::for_selectors(0x0B, 0x23).is_none());
        assert!(Ia32Star::for_selectors(0x08, 0x08).is_none());
    }
}
