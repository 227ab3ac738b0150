//! CPUID access behind a trait so detection can run against scripted leaves.

/// Raw register output of one `cpuid` invocation.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
#[repr(C)]
pub struct CpuidResult {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
}

impl CpuidResult {
    /// The vendor signature words, in `ebx, ecx, edx` order.
    #[inline]
    #[must_use]
    pub const fn signature(&self) -> [u32; 3] {
        [self.ebx, self.ecx, self.edx]
    }
}

pub trait CpuidSource {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult;
}

/// The `cpuid` instruction of the executing CPU.
#[derive(Debug, Copy, Clone, Default)]
pub struct NativeCpuid;

impl CpuidSource for NativeCpuid {
    #[inline(always)]
    #[allow(unused_assignments)]
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuidResult {
        let (mut eax, mut ebx, mut ecx, mut edx) = (leaf, 0u32, subleaf, 0u32);
        // CPUID is unprivileged and always present in long mode.
        unsafe {
            core::arch::asm!(
                "push rbx",
                "cpuid",
                "mov {ebx_out:e}, ebx", // rbx is reserved by LLVM
                "pop rbx",
                ebx_out = lateout(reg) ebx,
                inlateout("eax") eax,
                inlateout("ecx") ecx,
                lateout("edx") edx,
                options(nomem, preserves_flags),
            );
        }
        CpuidResult { eax, ebx, ecx, edx }
    }
}
