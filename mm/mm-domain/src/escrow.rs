//! Frame hand-off between the allocator lock and the domain lock.
//!
//! Both adapters implement [`TableFrames`] over the frame allocator. The
//! difference is when the allocator's lock is taken: [`TableSource`] goes
//! to the allocator on every call and may only be used while no domain
//! lock is held; [`EscrowFrame`] front-loads a single frame so the calls
//! inside a critical section touch no other lock.

use core::cell::Cell;

use mm_addr::PhysAddr;
use mm_frame::{FrameAllocator, PhysAccess};
use mm_paging::TableFrames;

/// Direct pass-through to the frame allocator.
///
/// For structure work done outside any domain lock: building a new
/// directory, tearing a domain down.
pub(crate) struct TableSource<'a, P: PhysAccess> {
    frames: &'a FrameAllocator,
    phys: &'a P,
}

impl<'a, P: PhysAccess> TableSource<'a, P> {
    pub fn new(frames: &'a FrameAllocator, phys: &'a P) -> Self {
        Self { frames, phys }
    }
}

impl<P: PhysAccess> TableFrames for TableSource<'_, P> {
    fn allocate_table_frame(&self) -> PhysAddr {
        self.frames.allocate(self.phys)
    }

    fn release_table_frame(&self, frame: PhysAddr) {
        self.frames.free(self.phys, frame);
    }
}

/// One frame paid in before the domain lock, drawn at most once inside it.
///
/// Construction allocates (allocator lock, briefly); the [`TableFrames`]
/// calls inside the critical section just move the frame out of the cell.
/// Whatever is still held when the escrow drops goes back to the pool.
pub(crate) struct EscrowFrame<'a, P: PhysAccess> {
    frames: &'a FrameAllocator,
    phys: &'a P,
    held: Cell<Option<PhysAddr>>,
}

impl<'a, P: PhysAccess> EscrowFrame<'a, P> {
    pub fn new(frames: &'a FrameAllocator, phys: &'a P) -> Self {
        let frame = frames.allocate(phys);
        Self {
            frames,
            phys,
            held: Cell::new(Some(frame)),
        }
    }
}

impl<P: PhysAccess> TableFrames for EscrowFrame<'_, P> {
    fn allocate_table_frame(&self) -> PhysAddr {
        let Some(frame) = self.held.take() else {
            panic!("escrow frame already consumed");
        };
        frame
    }

    fn release_table_frame(&self, frame: PhysAddr) {
        assert!(
            self.held.replace(Some(frame)).is_none(),
            "escrow already holds a frame"
        );
    }
}

impl<P: PhysAccess> Drop for EscrowFrame<'_, P> {
    fn drop(&mut self) {
        if let Some(frame) = self.held.take() {
            self.frames.free(self.phys, frame);
        }
    }
}
