//! Page-granular backing for heap growth and contraction.

use log::trace;
use mm_addr::{PAGE_SIZE, VirtAddr};
use mm_domain::{Machine, ProtectionDomain};
use mm_frame::FrameAllocator;
use mm_paging::PageFlags;

/// How the heap turns address range into memory.
///
/// `extend` must leave `[old_end, new_end)` mapped writable before it
/// returns; `release` undoes `[new_end, old_end)`. Both are called with
/// the heap lock released, so implementations may take their own locks
/// freely.
pub trait Backing {
    fn extend(&self, old_end: VirtAddr, new_end: VirtAddr, supervisor: bool);
    fn release(&self, new_end: VirtAddr, old_end: VirtAddr);
}

/// The real backing: one frame allocated and mapped per page, into the
/// domain that owns the heap's range.
pub struct DomainBacking<'a, M: Machine> {
    machine: &'a M,
    frames: &'a FrameAllocator,
    domain: &'a ProtectionDomain,
}

impl<'a, M: Machine> DomainBacking<'a, M> {
    #[must_use]
    pub const fn new(
        machine: &'a M,
        frames: &'a FrameAllocator,
        domain: &'a ProtectionDomain,
    ) -> Self {
        Self {
            machine,
            frames,
            domain,
        }
    }
}

impl<M: Machine> Backing for DomainBacking<'_, M> {
    fn extend(&self, old_end: VirtAddr, new_end: VirtAddr, supervisor: bool) {
        let flags = if supervisor {
            PageFlags::KERNEL_RW
        } else {
            PageFlags::KERNEL_RW | PageFlags::USER
        };
        let mut va = old_end;
        while va < new_end {
            let frame = self.frames.allocate(self.machine);
            self.domain
                .map(self.machine, self.frames, frame, va, flags)
                .unwrap_or_else(|_| panic!("heap page {va:?} was already mapped"));
            trace!("heap backing {va:?} -> {frame:?}");
            va += PAGE_SIZE;
        }
    }

    fn release(&self, new_end: VirtAddr, old_end: VirtAddr) {
        let mut va = new_end;
        while va < old_end {
            let Some((frame, _)) = self.domain.mapping_of(self.machine, va) else {
                panic!("heap page {va:?} was not mapped");
            };
            self.domain.unmap(self.machine, va);
            self.frames.free(self.machine, frame);
            trace!("heap backing {va:?} released {frame:?}");
            va += PAGE_SIZE;
        }
    }
}
