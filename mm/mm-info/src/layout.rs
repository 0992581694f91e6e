//! # Virtual-memory layout
//!
//! The fixed carve-up of the 4 GiB virtual space. The top 4 MiB slot is
//! claimed by the recursive page-directory mapping; the page just below it
//! is the scratch slot used to reach arbitrary frames once paging is on.

/// First address usable by userland stretches.
pub const USER_SPACE_BASE: usize = 0x0040_0000;

/// End of userspace; the kernel half starts here.
pub const USER_SPACE_END: usize = 0xC000_0000;

/// Base of the kernel half of every address space.
pub const KERNEL_SPACE_BASE: usize = 0xC000_0000;

/// Kernel stretches may be placed up to here; above live the scratch page
/// and the recursive window.
pub const KERNEL_SPACE_END: usize = SCRATCH_PAGE;

/// The one fixed virtual page remapped to reach arbitrary physical frames
/// after paging is enabled.
pub const SCRATCH_PAGE: usize = 0xFFBF_F000;

/// Where the kernel heap lives.
pub const KERNEL_HEAP_BASE: usize = 0xD000_0000;

/// Initial backed size of the kernel heap.
pub const KERNEL_HEAP_INITIAL_BYTES: usize = 0x0010_0000;

/// Hard ceiling for kernel heap growth.
pub const KERNEL_HEAP_MAX_BYTES: usize = 0x1000_0000;

const _: () = {
    assert!(USER_SPACE_END == KERNEL_SPACE_BASE);
    assert!(USER_SPACE_BASE.is_multiple_of(4096));
    assert!(SCRATCH_PAGE.is_multiple_of(4096));
    // the scratch page sits immediately below the recursive window
    assert!(SCRATCH_PAGE == 0xFFC0_0000 - 4096);
    assert!(KERNEL_HEAP_BASE >= KERNEL_SPACE_BASE);
    assert!(KERNEL_HEAP_INITIAL_BYTES <= KERNEL_HEAP_MAX_BYTES);
    assert!(KERNEL_HEAP_BASE + KERNEL_HEAP_MAX_BYTES <= KERNEL_SPACE_END);
};
