//! # Memory Layout

use kernel_memory_addresses::PAGE_SIZE;

/// Where the kernel image is placed in physical memory.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const PHYS_LOAD: u64 = 0x0020_0000; // 2 MiB

/// Where the kernel executes. Identical to [`PHYS_LOAD`]: the kernel runs
/// out of the identity map.
pub const KERNEL_BASE: u64 = PHYS_LOAD;

/// Bytes of physical memory the kernel maps 1:1 starting at zero.
pub const IDENTITY_MAP_BYTES: u64 = 4 << 30;

/// Entries per 4 KiB page-table frame.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Leaf entries in the kernel's entry table (one per identity-mapped page).
#[allow(clippy::cast_possible_truncation)]
pub const KERNEL_LEAF_ENTRIES: usize = (IDENTITY_MAP_BYTES / PAGE_SIZE) as usize;

/// Directory entries, one per 512 leaf entries.
pub const KERNEL_DIRECTORY_ENTRIES: usize = KERNEL_LEAF_ENTRIES / ENTRIES_PER_TABLE;

/// Directory-pointer slots in use, one per GiB.
pub const KERNEL_DIRECTORY_POINTER_SLOTS: usize = KERNEL_DIRECTORY_ENTRIES / ENTRIES_PER_TABLE;

/// Frames the loader must reserve for the kernel page-table arena.
pub const KERNEL_TABLE_FRAMES: u64 =
    ((KERNEL_LEAF_ENTRIES + KERNEL_DIRECTORY_ENTRIES) / ENTRIES_PER_TABLE) as u64 + 2;

/// Virtual base of the user window: top-level slot 511, directory-pointer
/// slot 511, directory slot 0.
pub const USER_WINDOW_BASE: u64 = 0xFFFF_FFFF_C000_0000;

/// Entry-table slot holding the user stack page.
pub const USER_STACK_SLOT: usize = 0;

/// First entry-table slot of the user image.
pub const USER_IMAGE_SLOT: usize = 1;

/// Entry-table slot remapped to the thread-local block.
pub const TLS_SLOT: usize = 510;

/// Entry-table slot that starts as a not-present sentinel and is resolved
/// by the page-fault handler.
pub const LAZY_SLOT: usize = 511;

/// Most pages a user image may occupy: slots `1..=510`.
pub const USER_IMAGE_MAX_PAGES: usize = TLS_SLOT;

/// Initial user stack pointer; the stack grows down into slot 0.
pub const USER_STACK_TOP: u64 = USER_WINDOW_BASE + PAGE_SIZE;

/// Virtual address of the first user image page.
pub const USER_IMAGE_BASE: u64 = USER_WINDOW_BASE + USER_IMAGE_SLOT as u64 * PAGE_SIZE;

/// Virtual address of the thread-local block.
pub const TLS_VIRT: u64 = USER_WINDOW_BASE + TLS_SLOT as u64 * PAGE_SIZE;

/// Virtual address backed by the lazily resolved page.
pub const LAZY_VIRT: u64 = USER_WINDOW_BASE + LAZY_SLOT as u64 * PAGE_SIZE;

/// The size of the boot stack.
pub const KERNEL_STACK_SIZE: usize = 32 * 1024;

/// The size of the stack the `syscall` entry stub switches to.
pub const SYSCALL_STACK_SIZE: usize = 16 * 1024;

/// Page offsets inside the user region handed over by the loader.
///
/// The region base `U` is the user entry table; the stack page is `U - 1`.
pub mod user {
    /// Entry table.
    pub const ENTRIES: u64 = 0;
    /// Directory.
    pub const DIRECTORY: u64 = 1;
    /// Directory-pointer table.
    pub const DIRECTORY_POINTER: u64 = 2;
    /// Top-level table.
    pub const TOP: u64 = 3;
    /// Backing page for the lazily resolved slot.
    pub const LAZY_PAGE: u64 = 4;
    /// Privileged stack used on traps from ring 3; its top is page 6.
    pub const PRIVILEGED_STACK: u64 = 5;
    /// Thread-local block.
    pub const TLS_PAGE: u64 = 7;
    /// Shared area granted to the peer domain.
    pub const SHARED_AREA: u64 = 8;
    /// Page the peer's grant is mapped onto.
    pub const GRANT_TARGET: u64 = 10;
    /// Pages reserved from the region base, not counting the stack page.
    pub const PAGES: u64 = 11;
}

/// The companion domain whose grant is mapped at boot.
pub const PEER_DOMAIN: u16 = 76;

/// Grant reference the companion domain publishes its shared page under.
pub const PEER_GRANT_REF: u32 = 511;

/// Polls before a grant-table flag transition is reported as timed out.
pub const GRANT_SPIN_LIMIT: u32 = 1 << 20;

/// Seqlock read attempts before a clock read is reported as timed out.
pub const CLOCK_RETRY_LIMIT: u32 = 1 << 16;

/// Monotonic clock samples spent waiting for the clock to advance one second.
pub const CLOCK_SELF_TEST_SAMPLES: u32 = 1 << 30;

const _: () = {
    assert!(KERNEL_BASE.is_multiple_of(0x20_0000));
    assert!(PHYS_LOAD.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_LEAF_ENTRIES == 1_048_576);
    assert!(KERNEL_DIRECTORY_ENTRIES == 2048);
    assert!(KERNEL_DIRECTORY_POINTER_SLOTS == 4);
    assert!(KERNEL_TABLE_FRAMES == 2054);
    assert!(KERNEL_DIRECTORY_POINTER_SLOTS <= ENTRIES_PER_TABLE);
    assert!(TLS_VIRT == 0xFFFF_FFFF_C01F_E000);
    assert!(LAZY_SLOT == ENTRIES_PER_TABLE - 1);
    assert!(USER_IMAGE_MAX_PAGES == 510);
    assert!(KERNEL_STACK_SIZE.is_multiple_of(4096));
    assert!(SYSCALL_STACK_SIZE.is_multiple_of(4096));
    assert!(user::TLS_PAGE > user::PRIVILEGED_STACK + 1);
    assert!(user::GRANT_TARGET < user::PAGES);
};
