//! # Xen Paravirtualization Bridge
//!
//! Everything the kernel core needs to talk to a Xen hypervisor from an HVM
//! guest, without any of it being mandatory: when no hypervisor is found the
//! kernel simply skips this stage.
//!
//! * [`detect`]: CPUID-based vendor detection and leaf-base probing.
//! * [`hypercall`]: the hypercall page and the typed `memory_op` /
//!   `xen_version` calls.
//! * [`shared_info`] and [`pvclock`]: the shared status page and the
//!   seqlock-protected clock readers.
//! * [`gnttab`]: grant-table entries, the free-list allocator and the
//!   `grant_table_op` calls.
//!
//! CPUID and hypercalls are reached through the [`cpuid::CpuidSource`] and
//! [`hypercall::Hypercall`] traits. The kernel plugs in the real
//! instructions; tests plug in scripted fakes.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod cpuid;
pub mod detect;
pub mod gnttab;
pub mod hypercall;
pub mod pvclock;
pub mod shared_info;

pub use crate::detect::{Hypervisor, XenLeaves, detect};
pub use crate::gnttab::{GrantError, GrantRef, GrantTable, TransferOutcome};
pub use crate::hypercall::{Hypercall, HypercallOp, HypercallPage, XenVersion};
pub use crate::pvclock::ClockError;

/// Errors reported by the hypervisor bridge.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum XenError {
    #[error("no Xen hypervisor present")]
    NotPresent,
    #[error("hypervisor asks for {0} hypercall pages, only one is supported")]
    UnsupportedHypercallPages(u32),
    #[error("{op:?} failed with {code}")]
    Hypercall { op: HypercallOp, code: i64 },
    #[error("grant operation returned status {0}")]
    GrantStatus(i16),
}

/// Domain id meaning "the calling domain".
pub const DOMID_SELF: u16 = 0x7FF0;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::cpuid::{CpuidResult, CpuidSource};
    use crate::hypercall::{Hypercall, HypercallOp};
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    /// CPUID backed by a leaf table; unknown leaves read as zero.
    #[derive(Default)]
    pub struct FakeCpuid {
        pub leaves: BTreeMap<u32, CpuidResult>,
    }

    impl FakeCpuid {
        pub fn with(mut self, leaf: u32, eax: u32, ebx: u32, ecx: u32, edx: u32) -> Self {
            self.leaves.insert(leaf, CpuidResult { eax, ebx, ecx, edx });
            self
        }

        /// A Xen guest whose leaves start at `base`.
        pub fn xen_at(base: u32) -> Self {
            Self::default()
                .with(0, 0xD, 0, 0, 0)
                .with(1, 0, 0, 1 << 31, 0)
                .with(base, base + 5, 0x566e_6558, 0x6558_4d4d, 0x4d4d_566e)
                .with(base + 2, 1, 0x4000_0000, 0, 0)
        }
    }

    impl CpuidSource for FakeCpuid {
        fn cpuid(&self, leaf: u32, _subleaf: u32) -> CpuidResult {
            self.leaves.get(&leaf).copied().unwrap_or_default()
        }
    }

    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct Call {
        pub op: HypercallOp,
        pub args: [u64; 3],
    }

    /// Records every hypercall and answers from a closure that may also
    /// write into the argument records, the way the hypervisor would.
    pub struct RecordingHypervisor<F> {
        pub calls: RefCell<Vec<Call>>,
        respond: F,
    }

    impl<F: Fn(HypercallOp, [u64; 3]) -> i64> RecordingHypervisor<F> {
        pub fn new(respond: F) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                respond,
            }
        }
    }

    impl<F: Fn(HypercallOp, [u64; 3]) -> i64> Hypercall for RecordingHypervisor<F> {
        unsafe fn hypercall3(&self, op: HypercallOp, a1: u64, a2: u64, a3: u64) -> i64 {
            let args = [a1, a2, a3];
            self.calls.borrow_mut().push(Call { op, args });
            (self.respond)(op, args)
        }
    }
}
