//! # Boot Sequence
//!
//! The kernel walks a fixed sequence of stages. Each stage either completes,
//! completes in a degraded form (an optional feature is missing), or fails.
//! A failure anywhere ends in [`BootStage::Halted`]. Running out of stages
//! ends in [`BootStage::Idle`]. Both are terminal, so a driver loop always
//! stops, which is what lets the sequence run under test.

use core::fmt;

/// One step of the boot sequence.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BootStage {
    /// Build and activate the kernel-only, then the kernel+user, address space.
    Paging,
    /// SYSCALL MSRs.
    Transitions,
    /// GDT/TSS, IDT and the timer.
    Traps,
    /// Thread-local block and FS base.
    ThreadLocal,
    /// Hypervisor detection and the grant-table bridge.
    Hypervisor,
    /// One-way transfer to ring 3.
    UserHandoff,
    /// Nothing left to do. Terminal.
    Idle,
    /// An unrecoverable error was reported. Terminal.
    Halted,
}

/// Result of running a single stage.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StageOutcome {
    Completed,
    /// Completed without an optional feature.
    Degraded,
    Failed,
}

impl BootStage {
    pub const FIRST: Self = Self::Paging;

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Idle | Self::Halted)
    }

    /// The stage that follows `self` given how it went.
    #[must_use]
    pub const fn next(self, outcome: StageOutcome) -> Self {
        if self.is_terminal() {
            return self;
        }
        if matches!(outcome, StageOutcome::Failed) {
            return Self::Halted;
        }
        match self {
            Self::Paging => Self::Transitions,
            Self::Transitions => Self::Traps,
            Self::Traps => Self::ThreadLocal,
            Self::ThreadLocal => Self::Hypervisor,
            Self::Hypervisor => Self::UserHandoff,
            Self::UserHandoff | Self::Idle => Self::Idle,
            Self::Halted => Self::Halted,
        }
    }
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Paging => "paging",
            Self::Transitions => "privilege transitions",
            Self::Traps => "trap dispatch",
            Self::ThreadLocal => "thread-local block",
            Self::Hypervisor => "hypervisor bridge",
            Self::UserHandoff => "user handoff",
            Self::Idle => "idle",
            Self::Halted => "halted",
        };
        f.write_str(name)
    }
}

/// Executes individual stages.
pub trait StageDriver {
    fn run(&mut self, stage: BootStage) -> StageOutcome;
}

/// Drives `driver` from [`BootStage::FIRST`] until a terminal stage is
/// reached and returns that stage.
pub fn run_to_terminal<D: StageDriver>(driver: &mut D) -> BootStage {
    let mut stage = BootStage::FIRST;
    while !stage.is_terminal() {
        let outcome = driver.run(stage);
        log::debug!("boot stage {stage}: {outcome:?}");
        stage = stage.next(outcome);
    }
    stage
}
