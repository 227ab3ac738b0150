//! # Local APIC in x2APIC mode
//!
//! Only what the periodic tick needs: enable x2APIC, software-enable the
//! APIC through the spurious vector register, program the timer and
//! acknowledge interrupts.

use kernel_info::vectors::{TIMER_INITIAL_COUNT, TIMER_VECTOR};
use kernel_registers::msr::Msr;
use kernel_xen::cpuid::{CpuidSource, NativeCpuid};
use log::info;

const IA32_APIC_BASE: Msr = Msr::new(0x1B);
/// APIC global enable.
const APIC_EN: u64 = 1 << 11;
/// x2APIC mode.
const APIC_EXTD: u64 = 1 << 10;

const X2APIC_ID: Msr = Msr::new(0x802);
const X2APIC_EOI: Msr = Msr::new(0x80B);
const X2APIC_SVR: Msr = Msr::new(0x80F);
const X2APIC_LVT_TIMER: Msr = Msr::new(0x832);
const X2APIC_INITCNT: Msr = Msr::new(0x838);
const X2APIC_DIVCONF: Msr = Msr::new(0x83E);

/// Spurious vector; its gate stays null.
const SPURIOUS_VECTOR: u8 = 0xFF;

const LVT_MASKED: u64 = 1 << 16;
const LVT_PERIODIC: u64 = 1 << 17;

/// Divide configuration encodings.
pub mod lapic_div {
    pub const DIV_1: u32 = 0b1011;
}

/// CPUID.01h:ECX bit 21.
fn has_x2apic<C: CpuidSource>(cpu: &C) -> bool {
    cpu.cpuid(1, 0).ecx & (1 << 21) != 0
}

/// LVT timer value for periodic delivery on `vector`.
fn lvt_periodic(vector: u8, masked: bool) -> u64 {
    let lvt = u64::from(vector) | LVT_PERIODIC;
    if masked { lvt | LVT_MASKED } else { lvt }
}

/// Switches the local APIC to x2APIC mode and starts the periodic timer.
///
/// Returns `false` when the CPU has no x2APIC; the timer then stays off.
///
/// # Safety
/// CPL0, after the IDT carries a gate for [`TIMER_VECTOR`].
#[allow(clippy::cast_possible_truncation)]
pub unsafe fn start_periodic_timer() -> bool {
    if !has_x2apic(&NativeCpuid) {
        return false;
    }

    unsafe {
        let base = IA32_APIC_BASE.load_raw();
        IA32_APIC_BASE.store_raw(base | APIC_EN | APIC_EXTD);
        X2APIC_SVR.store_raw((1 << 8) | u64::from(SPURIOUS_VECTOR));

        // Program masked, then unmask once the count is in place.
        X2APIC_LVT_TIMER.store_raw(lvt_periodic(TIMER_VECTOR, true));
        X2APIC_DIVCONF.store_raw(u64::from(lapic_div::DIV_1));
        X2APIC_INITCNT.store_raw(u64::from(TIMER_INITIAL_COUNT));
        X2APIC_LVT_TIMER.store_raw(lvt_periodic(TIMER_VECTOR, false));
    }

    let id = unsafe { X2APIC_ID.load_raw() } as u32;
    info!(
        "x2APIC {id:#x}: periodic timer on vector {TIMER_VECTOR}, initial count {TIMER_INITIAL_COUNT:#x}"
    );
    true
}

/// Signals end of interrupt.
///
/// # Safety
/// x2APIC mode must be enabled.
#[inline]
pub unsafe fn eoi() {
    unsafe { X2APIC_EOI.store_raw(0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_lvt_encoding() {
        assert_eq!(lvt_periodic(40, false), 0x2_0028);
        assert_eq!(lvt_periodic(40, true), 0x3_0028);
    }
}
