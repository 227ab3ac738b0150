//! The hardware side of the boot sequence: one method per [`BootStage`].
//!
//! Sequencing and termination live in [`kernel_info::stage`]; this module
//! only decides what each stage does and how bad a failure is.

use crate::boot_context::{self, BootContext};
use crate::gdt::DescriptorError;
use crate::memory::{IDENTITY, virt_of};
use crate::tls::TlsError;
use crate::userland::{EntryOutOfImage, UserHandoff};
use crate::xen::XenBridge;
use crate::{apic, gdt, interrupts, syscall, tls, xen};
use kernel_info::boot::KernelBootInfo;
use kernel_info::memory::USER_IMAGE_MAX_PAGES;
use kernel_info::stage::{BootStage, StageDriver, StageOutcome};
use kernel_vmem::{
    Cr3Root, TableArena, UserImage, UserLayout, VmemError, build_kernel_space, build_user_space,
};
use kernel_xen::XenError;
use log::{error, info, warn};

#[derive(Debug, thiserror::Error)]
enum StageError {
    #[error(transparent)]
    Paging(#[from] VmemError),
    #[error(transparent)]
    Descriptors(#[from] DescriptorError),
    #[error(transparent)]
    ThreadLocal(#[from] TlsError),
    #[error(transparent)]
    Xen(#[from] XenError),
    #[error(transparent)]
    Entry(#[from] EntryOutOfImage),
    #[error("boot context is not published")]
    NoContext,
    #[error("boot context was already published")]
    ContextPublished,
}

type StageResult = Result<StageOutcome, StageError>;

pub struct KernelBoot {
    info: KernelBootInfo,
    xen: Option<XenBridge>,
    handoff: Option<UserHandoff>,
}

impl KernelBoot {
    pub const fn new(info: KernelBootInfo) -> Self {
        Self {
            info,
            xen: None,
            handoff: None,
        }
    }

    /// Set once the user handoff stage completed.
    pub const fn handoff(&self) -> Option<UserHandoff> {
        self.handoff
    }

    pub const fn xen(&self) -> Option<&XenBridge> {
        self.xen.as_ref()
    }

    fn context() -> Result<&'static BootContext, StageError> {
        boot_context::get().ok_or(StageError::NoContext)
    }

    /// Kernel-only space first, then kernel+user; publishes both.
    fn paging(&mut self) -> StageResult {
        let layout = UserLayout::new(self.info.user_region())?;
        // SAFETY: the loader reserved the table arena and the user region
        // for us and identity-maps both.
        let mut arena = unsafe { TableArena::new(&IDENTITY, self.info.kernel_tables(), layout) }?;

        let kernel = build_kernel_space(&mut arena);
        unsafe { kernel.address_space().activate(&mut Cr3Root) };
        info!("kernel address space active at {}", kernel.address_space().top());

        let pages = usize::try_from(self.info.user_image_pages).map_err(|_| {
            VmemError::ImageTooLarge {
                pages: usize::MAX,
                max: USER_IMAGE_MAX_PAGES,
            }
        })?;
        let image = UserImage {
            base: self.info.user_image(),
            pages,
        };
        let user = build_user_space(&mut arena, &kernel, image)?;
        unsafe { user.address_space().activate(&mut Cr3Root) };
        info!("user address space active at {}", user.address_space().top());

        let ctx = boot_context::publish(BootContext { arena, kernel, user })
            .map_err(|_| StageError::ContextPublished)?;
        info!(
            "identity map directory pointer table at {}",
            ctx.kernel.directory_pointer()
        );
        Ok(StageOutcome::Completed)
    }

    /// GDT/TSS and IDT are required; the timer is not.
    fn traps() -> StageResult {
        let ctx = Self::context()?;
        let rsp0 = virt_of(ctx.user.layout().privileged_stack_top());
        unsafe {
            gdt::init_gdt_and_tss(rsp0)?;
            interrupts::init_idt()?;
        }

        if unsafe { apic::start_periodic_timer() } {
            Ok(StageOutcome::Completed)
        } else {
            warn!("no x2APIC, running without a timer");
            Ok(StageOutcome::Degraded)
        }
    }

    fn thread_local() -> StageResult {
        let ctx = Self::context()?;
        unsafe { tls::install(ctx)? };
        Ok(StageOutcome::Completed)
    }

    fn hypervisor(&mut self) -> StageResult {
        let ctx = Self::context()?;
        let Some(bridge) = (unsafe { xen::bring_up(ctx.user.layout())? }) else {
            return Ok(StageOutcome::Degraded);
        };

        let outcome = if bridge.is_complete() {
            StageOutcome::Completed
        } else {
            StageOutcome::Degraded
        };
        self.xen = Some(bridge);
        Ok(outcome)
    }

    fn user_handoff(&mut self) -> StageResult {
        let handoff =
            UserHandoff::for_image(self.info.user_entry_offset, self.info.user_image_pages)?;
        info!("user entry prepared at {}", handoff.entry);
        self.handoff = Some(handoff);
        Ok(StageOutcome::Completed)
    }
}

impl StageDriver for KernelBoot {
    fn run(&mut self, stage: BootStage) -> StageOutcome {
        info!("boot stage: {stage}");
        let result = match stage {
            BootStage::Paging => self.paging(),
            BootStage::Transitions => {
                unsafe { syscall::init_syscalls() };
                Ok(StageOutcome::Completed)
            }
            BootStage::Traps => Self::traps(),
            BootStage::ThreadLocal => Self::thread_local(),
            BootStage::Hypervisor => self.hypervisor(),
            BootStage::UserHandoff => self.user_handoff(),
            BootStage::Idle | BootStage::Halted => Ok(StageOutcome::Completed),
        };
        result.unwrap_or_else(|e| {
            error!("boot stage {stage} failed: {e}");
            StageOutcome::Failed
        })
    }
}
