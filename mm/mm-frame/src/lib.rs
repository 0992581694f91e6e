//! # Physical frame allocator
//!
//! Hands out zeroed 4 KiB frames from the RAM described by the firmware
//! memory map. Physical memory is split into three fixed regions by
//! address (below 1 MiB, 1–16 MiB, above 16 MiB); allocation prefers the
//! highest region with free frames so the scarce low regions stay available
//! for hardware that needs them.
//!
//! ## Free-list layout
//!
//! Per-frame state lives in a side table of doubly-linked frame indices,
//! carved out of physical memory itself during initialization. The table is
//! reached through the same [`PhysAccess`] seam as frame contents, so the
//! allocator works identically before paging (direct pointers) and after
//! (scratch-page mapping), and host tests substitute an arena. The
//! double links make unthreading an arbitrary frame O(1), which is what
//! [`FrameAllocator::allocate_range`] leans on.
//!
//! ## Failure model
//!
//! Exhaustion is fatal; callers never see an "out of frames" value. Freeing
//! a frame that is not currently allocated is fatal too, the link table
//! keeps enough state to catch it.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod links;
mod pool;
mod region;

pub use pool::FrameAllocator;
pub use region::{DMA_LIMIT, LOW_LIMIT, REGION_COUNT, RegionKind, RegionSnapshot};

use mm_addr::{AccessMode, PhysAddr};

/// Access to the raw contents of a physical frame.
///
/// Encapsulates the temporary-mapping dance: in [`AccessMode::Physical`]
/// the frame is a plain pointer, in [`AccessMode::Mapped`] the
/// implementation must make it reachable for the duration of the closure
/// (the hardware implementation remaps the scratch page).
pub trait PhysAccess {
    /// Run `f` over the frame's 4096 bytes.
    ///
    /// # Safety
    ///
    /// `frame` must be frame-aligned RAM owned by the caller; the pointer is
    /// valid only inside `f`.
    unsafe fn with_frame<R>(
        &self,
        mode: AccessMode,
        frame: PhysAddr,
        f: impl FnOnce(*mut u8) -> R,
    ) -> R;
}

/// Identity access for the boot path: before paging, a physical address is
/// a pointer.
pub struct DirectAccess;

impl PhysAccess for DirectAccess {
    unsafe fn with_frame<R>(
        &self,
        mode: AccessMode,
        frame: PhysAddr,
        f: impl FnOnce(*mut u8) -> R,
    ) -> R {
        debug_assert!(mode.is_physical(), "DirectAccess is pre-paging only");
        f(frame.as_usize() as *mut u8)
    }
}
