//! Hypervisor detection through the CPUID hypervisor leaves.
//!
//! `CPUID.01H:ECX[31]` says "running under a hypervisor". The vendor then
//! identifies itself with a 12-byte signature in `ebx, ecx, edx` of its base
//! leaf. Xen may publish its leaves at any multiple of `0x100` above
//! `0x4000_0000` (to coexist with Viridian), so the base has to be probed.

use crate::XenError;
use crate::cpuid::CpuidSource;
use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;
use kernel_registers::msr::Msr;
use log::{debug, info, warn};

/// Basic information leaf; `EAX` is the highest basic leaf.
pub const LEAF_BASIC: u32 = 0x00;

/// Feature-information leaf.
pub const LEAF_FEATURES: u32 = 0x01;

/// `CPUID.01H:ECX` bit 31.
pub const HYPERVISOR_PRESENT: u32 = 1 << 31;

/// First leaf of the hypervisor range.
pub const HYPERVISOR_LEAF_FIRST: u32 = 0x4000_0000;

/// One past the last probed base.
pub const HYPERVISOR_LEAF_END: u32 = 0x4001_0000;

/// Distance between candidate bases.
pub const HYPERVISOR_LEAF_STRIDE: u32 = 0x100;

/// Known hypervisor vendors.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Hypervisor {
    Xen,
}

impl Hypervisor {
    pub const ALL: [Self; 1] = [Self::Xen];

    /// `"XenVMMXenVMM"` as read from `ebx, ecx, edx`.
    #[must_use]
    pub const fn signature(self) -> [u32; 3] {
        match self {
            Self::Xen => [0x566e_6558, 0x6558_4d4d, 0x4d4d_566e],
        }
    }

    /// Number of leaves above the base the vendor must at least provide.
    #[must_use]
    pub const fn min_leaves(self) -> u32 {
        match self {
            Self::Xen => 2,
        }
    }

    #[must_use]
    pub fn from_signature(words: [u32; 3]) -> Option<Self> {
        Self::ALL.into_iter().find(|hv| hv.signature() == words)
    }
}

/// Detects a known hypervisor vendor; `None` on bare metal or for vendors
/// we don't speak to.
pub fn detect(cpu: &impl CpuidSource) -> Option<Hypervisor> {
    if cpu.cpuid(LEAF_BASIC, 0).eax < LEAF_FEATURES {
        debug!("CPUID has no feature leaf");
        return None;
    }
    let features = cpu.cpuid(LEAF_FEATURES, 0);
    if features.ecx & HYPERVISOR_PRESENT == 0 {
        return None;
    }

    let first = cpu.cpuid(HYPERVISOR_LEAF_FIRST, 0);
    if first.eax < HYPERVISOR_LEAF_FIRST {
        debug!("hypervisor leaf reports max leaf {:#x}", first.eax);
        return None;
    }

    let hv = Hypervisor::from_signature(first.signature());
    debug!("Hypervisor signature lookup: {hv:?}");
    hv
}

/// The Xen leaf block, located by [`XenLeaves::probe`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct XenLeaves {
    base: u32,
}

/// `CPUID.(base+4):EAX`, the HVM-specific feature flags.
#[bitfield(u32, order = Lsb)]
#[derive(Eq, PartialEq)]
pub struct XenHvmFeatures {
    pub virtualized_apic: bool,
    pub virtualized_x2apic: bool,
    pub iommu_mappings: bool,
    /// EBX carries the VCPU id.
    pub vcpu_id_present: bool,
    pub domid_present: bool,
    #[bits(27)]
    __: u32,
}

impl XenLeaves {
    /// Probes `0x4000_0000..0x4001_0000` in `0x100` steps for the Xen
    /// signature with at least [`Hypervisor::min_leaves`] leaves behind it.
    pub fn probe(cpu: &impl CpuidSource) -> Option<Self> {
        let xen = Hypervisor::Xen;
        (HYPERVISOR_LEAF_FIRST..HYPERVISOR_LEAF_END)
            .step_by(HYPERVISOR_LEAF_STRIDE as usize)
            .find(|&base| {
                let r = cpu.cpuid(base, 0);
                r.signature() == xen.signature() && r.eax.wrapping_sub(base) >= xen.min_leaves()
            })
            .map(|base| Self { base })
    }

    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// `(major, minor)` as advertised by `base+1`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn version(&self, cpu: &impl CpuidSource) -> (u16, u16) {
        let eax = cpu.cpuid(self.base + 1, 0).eax;
        ((eax >> 16) as u16, (eax & 0xFFFF) as u16)
    }

    /// The MSR that receives the hypercall page address (`base+2`).
    ///
    /// # Errors
    /// [`XenError::UnsupportedHypercallPages`] unless exactly one page is
    /// requested.
    pub fn hypercall_msr(&self, cpu: &impl CpuidSource) -> Result<Msr, XenError> {
        let r = cpu.cpuid(self.base + 2, 0);
        if r.eax != 1 {
            return Err(XenError::UnsupportedHypercallPages(r.eax));
        }
        Ok(Msr::new(r.ebx))
    }

    /// Whether the VCPU id leaf (`base+4`) is usable for the boot CPU.
    pub fn vcpu_ids_supported(&self, cpu: &impl CpuidSource) -> bool {
        let r = cpu.cpuid(self.base + 4, 0);
        XenHvmFeatures::from_bits(r.eax).vcpu_id_present() && r.ebx == 0
    }

    /// Points the hypervisor at the hypercall page and reports the VCPU id
    /// support. After this returns the page holds one 32-byte stub per
    /// hypercall.
    ///
    /// # Safety
    /// Must run at CPL0. `page` must be a writable, page-aligned frame that
    /// stays reserved for the hypercall stubs.
    ///
    /// # Errors
    /// See [`XenLeaves::hypercall_msr`].
    pub unsafe fn install_hypercall_page(
        &self,
        cpu: &impl CpuidSource,
        page: PhysicalAddress,
    ) -> Result<(), XenError> {
        let msr = self.hypercall_msr(cpu)?;
        unsafe { msr.store_raw(page.as_u64()) };
        info!("Hypercall page installed at {page} through MSR {:#X}", msr.raw());

        if !self.vcpu_ids_supported(cpu) {
            warn!("VCPU IDs not supported");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeCpuid;

    #[test]
    fn detects_xen_signature() {
        let cpu = FakeCpuid::xen_at(HYPERVISOR_LEAF_FIRST);
        assert_eq!(detect(&cpu), Some(Hypervisor::Xen));
    }

    #[test]
    fn other_vendors_are_none() {
        // "KVMKVMKVM\0\0\0"
        let cpu = FakeCpuid::default()
            .with(LEAF_BASIC, 1, 0, 0, 0)
            .with(1, 0, 0, HYPERVISOR_PRESENT, 0)
            .with(HYPERVISOR_LEAF_FIRST, 0x4000_0001, 0x4b4d_564b, 0x564b_4d56, 0x4d);
        assert_eq!(detect(&cpu), None);
    }

    #[test]
    fn hypervisor_bit_gates_detection() {
        let cpu = FakeCpuid::xen_at(HYPERVISOR_LEAF_FIRST).with(1, 0, 0, 0, 0);
        assert_eq!(detect(&cpu), None);
    }

    #[test]
    fn missing_feature_leaf_is_none() {
        let cpu = FakeCpuid::xen_at(HYPERVISOR_LEAF_FIRST).with(LEAF_BASIC, 0, 0, 0, 0);
        assert_eq!(detect(&cpu), None);
    }

    #[test]
    fn signature_below_the_hypervisor_range_is_none() {
        let base = HYPERVISOR_LEAF_FIRST;
        let cpu =
            FakeCpuid::xen_at(base).with(base, 0x0000_000D, 0x566e_6558, 0x6558_4d4d, 0x4d4d_566e);
        assert_eq!(detect(&cpu), None);
    }

    #[test]
    fn probe_finds_shifted_base() {
        let cpu = FakeCpuid::xen_at(0x4000_0100);
        let leaves = XenLeaves::probe(&cpu).expect("xen leaves");
        assert_eq!(leaves.base(), 0x4000_0100);
    }

    #[test]
    fn probe_requires_min_leaves() {
        let base = HYPERVISOR_LEAF_FIRST;
        let cpu = FakeCpuid::default().with(base, base + 1, 0x566e_6558, 0x6558_4d4d, 0x4d4d_566e);
        assert_eq!(XenLeaves::probe(&cpu), None);
    }

    #[test]
    fn hypercall_msr_requires_one_page() {
        let base = HYPERVISOR_LEAF_FIRST;
        let leaves = XenLeaves { base };

        let one = FakeCpuid::xen_at(base);
        assert_eq!(leaves.hypercall_msr(&one), Ok(Msr::new(0x4000_0000)));

        let two = FakeCpuid::xen_at(base).with(base + 2, 2, 0x4000_0000, 0, 0);
        assert_eq!(
            leaves.hypercall_msr(&two),
            Err(XenError::UnsupportedHypercallPages(2))
        );
    }

    #[test]
    fn version_and_vcpu_leaf() {
        let base = HYPERVISOR_LEAF_FIRST;
        let leaves = XenLeaves { base };
        let cpu = FakeCpuid::xen_at(base)
            .with(base + 1, (4 << 16) | 17, 0, 0, 0)
            .with(base + 4, 1 << 3, 0, 0, 0);
        assert_eq!(leaves.version(&cpu), (4, 17));
        assert!(leaves.vcpu_ids_supported(&cpu));

        let no_ids = FakeCpuid::xen_at(base).with(base + 4, 1 << 3, 1, 0, 0);
        assert!(!leaves.vcpu_ids_supported(&no_ids));
    }
}
