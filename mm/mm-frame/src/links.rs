//! Frame link table.
//!
//! One [`FrameLink`] per physical frame, stored in frames the allocator
//! carves out of the memory map before threading the free lists. A frame is
//! either on a free list (both fields are frame indices or [`LINK_NIL`]),
//! allocated ([`LINK_USED`] in both), or outside the allocator's control
//! ([`LINK_HELD`]).

use crate::PhysAccess;
use mm_addr::{AccessMode, PAGE_SIZE, PhysAddr};

/// End of a free list.
pub(crate) const LINK_NIL: u32 = u32::MAX;

/// Marks a frame handed out by the allocator.
pub(crate) const LINK_USED: u32 = u32::MAX - 1;

/// Marks a frame the allocator does not manage (reserved or table storage).
pub(crate) const LINK_HELD: u32 = u32::MAX - 2;

/// Largest frame index that can be threaded on a list.
pub(crate) const LINK_MAX: u32 = u32::MAX - 3;

/// Free-list node for one physical frame.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub(crate) struct FrameLink {
    pub prev: u32,
    pub next: u32,
}

/// Link entries per table frame.
pub(crate) const LINKS_PER_FRAME: usize = PAGE_SIZE / size_of::<FrameLink>();

impl FrameLink {
    #[inline]
    pub const fn held() -> Self {
        Self { prev: LINK_HELD, next: LINK_HELD }
    }

    #[inline]
    pub const fn used() -> Self {
        Self { prev: LINK_USED, next: LINK_USED }
    }

    #[inline]
    pub const fn is_free(self) -> bool {
        self.prev <= LINK_MAX || self.prev == LINK_NIL
    }

    #[inline]
    pub const fn is_used(self) -> bool {
        self.prev == LINK_USED
    }
}

/// The side table itself: `frames` consecutive link entries starting at
/// physical address `base`, reached through [`PhysAccess`] so reads and
/// writes work in either paging mode.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinkTable {
    base: PhysAddr,
    frames: usize,
}

impl LinkTable {
    pub const fn new(base: PhysAddr, frames: usize) -> Self {
        Self { base, frames }
    }

    /// Frames of storage needed for `frames` link entries.
    pub const fn frames_needed(frames: usize) -> usize {
        frames.div_ceil(LINKS_PER_FRAME)
    }

    /// Table frame and byte offset holding the entry for `frame`.
    #[inline]
    fn entry_location(self, frame: usize) -> (PhysAddr, usize) {
        debug_assert!(frame < self.frames);
        let table_frame = self.base + (frame / LINKS_PER_FRAME) * PAGE_SIZE;
        let offset = (frame % LINKS_PER_FRAME) * size_of::<FrameLink>();
        (table_frame, offset)
    }

    // Frame pointers are page-aligned and offsets are multiples of the
    // entry size, so the u8 -> FrameLink casts below are always aligned.

    #[allow(clippy::cast_ptr_alignment)]
    pub fn get<P: PhysAccess>(self, phys: &P, mode: AccessMode, frame: usize) -> FrameLink {
        let (table_frame, offset) = self.entry_location(frame);
        // SAFETY: the table frames were carved out of free RAM at
        // initialization and stay held for the allocator's lifetime.
        unsafe {
            phys.with_frame(mode, table_frame, |ptr| {
                ptr.add(offset).cast::<FrameLink>().read()
            })
        }
    }

    #[allow(clippy::cast_ptr_alignment)]
    pub fn set<P: PhysAccess>(self, phys: &P, mode: AccessMode, frame: usize, link: FrameLink) {
        let (table_frame, offset) = self.entry_location(frame);
        // SAFETY: as in `get`; the entry is within the carved table.
        unsafe {
            phys.with_frame(mode, table_frame, |ptr| {
                ptr.add(offset).cast::<FrameLink>().write(link);
            });
        }
    }

    /// Mark every entry held. Initialization then threads only the frames
    /// the memory map actually reports as free.
    #[allow(clippy::cast_ptr_alignment)]
    pub fn fill_held<P: PhysAccess>(self, phys: &P, mode: AccessMode) {
        let table_frames = Self::frames_needed(self.frames);
        for table_index in 0..table_frames {
            let table_frame = self.base + table_index * PAGE_SIZE;
            // SAFETY: as in `get`; writes stay within one table frame.
            unsafe {
                phys.with_frame(mode, table_frame, |ptr| {
                    let links = ptr.cast::<FrameLink>();
                    for entry in 0..LINKS_PER_FRAME {
                        links.add(entry).write(FrameLink::held());
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_states_are_distinct() {
        assert!(FrameLink::held().prev != FrameLink::used().prev);
        assert!(!FrameLink::held().is_free());
        assert!(!FrameLink::held().is_used());
        assert!(FrameLink::used().is_used());
        assert!(FrameLink { prev: LINK_NIL, next: 7 }.is_free());
        assert!(FrameLink { prev: 3, next: LINK_NIL }.is_free());
    }

    #[test]
    fn table_sizing_rounds_up() {
        assert_eq!(LinkTable::frames_needed(1), 1);
        assert_eq!(LinkTable::frames_needed(LINKS_PER_FRAME), 1);
        assert_eq!(LinkTable::frames_needed(LINKS_PER_FRAME + 1), 2);
    }
}
