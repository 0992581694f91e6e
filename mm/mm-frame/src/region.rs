//! Physical memory regions.
//!
//! The frame space is partitioned by address into three regions with fixed
//! boundaries. Frames below [`DMA_LIMIT`] are reachable by legacy ISA DMA,
//! frames below [`LOW_LIMIT`] by 24-bit bus masters; everything above is
//! ordinary RAM. Each region tracks its own counters so exhaustion of one
//! does not hide free frames in another.

use mm_addr::{PAGE_SHIFT, PhysAddr};

/// First address above the ISA DMA region (1 MiB).
pub const DMA_LIMIT: usize = 0x0010_0000;

/// First address above the 24-bit addressable region (16 MiB).
pub const LOW_LIMIT: usize = 0x0100_0000;

/// Number of physical regions.
pub const REGION_COUNT: usize = 3;

const DMA_LIMIT_FRAME: usize = DMA_LIMIT >> PAGE_SHIFT;
const LOW_LIMIT_FRAME: usize = LOW_LIMIT >> PAGE_SHIFT;

/// The region a physical frame belongs to.
///
/// Ordered by address, `Dma < Low < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(usize)]
pub enum RegionKind {
    /// Below 1 MiB; reachable by ISA DMA.
    Dma = 0,
    /// 1 MiB to 16 MiB; reachable by 24-bit bus masters.
    Low = 1,
    /// Above 16 MiB.
    High = 2,
}

impl RegionKind {
    /// The region containing `frame`.
    #[inline]
    #[must_use]
    pub const fn of(frame: PhysAddr) -> Self {
        let index = frame.frame_index();
        if index < DMA_LIMIT_FRAME {
            Self::Dma
        } else if index < LOW_LIMIT_FRAME {
            Self::Low
        } else {
            Self::High
        }
    }

    /// Index into per-region tables.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Frame-index bounds `[start, end)` of this region, clamped to a
    /// machine with `frame_count` frames.
    #[must_use]
    pub const fn frame_span(self, frame_count: usize) -> (usize, usize) {
        let (start, end) = match self {
            Self::Dma => (0, DMA_LIMIT_FRAME),
            Self::Low => (DMA_LIMIT_FRAME, LOW_LIMIT_FRAME),
            Self::High => (LOW_LIMIT_FRAME, usize::MAX),
        };
        let end = if end > frame_count { frame_count } else { end };
        let start = if start > end { end } else { start };
        (start, end)
    }
}

/// Per-region frame accounting.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Region {
    /// Head of this region's free list, [`crate::links::LINK_NIL`] when empty.
    pub head: u32,
    /// Frames currently free.
    pub free: usize,
    /// Frames managed by the allocator (free or allocated).
    pub frames: usize,
    /// Frames in the region's span withheld from allocation.
    pub reserved: usize,
}

impl Region {
    pub const fn empty() -> Self {
        Self {
            head: crate::links::LINK_NIL,
            free: 0,
            frames: 0,
            reserved: 0,
        }
    }
}

/// Point-in-time copy of one region's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSnapshot {
    /// Which region the counters describe.
    pub kind: RegionKind,
    /// Frames currently free.
    pub free: usize,
    /// Frames managed by the allocator.
    pub frames: usize,
    /// Frames withheld from allocation.
    pub reserved: usize,
}

impl RegionSnapshot {
    /// Frames currently handed out.
    #[inline]
    #[must_use]
    pub const fn allocated(&self) -> usize {
        self.frames - self.free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries_split_at_one_and_sixteen_mebibytes() {
        assert_eq!(RegionKind::of(PhysAddr::new(0)), RegionKind::Dma);
        assert_eq!(RegionKind::of(PhysAddr::new(DMA_LIMIT - 0x1000)), RegionKind::Dma);
        assert_eq!(RegionKind::of(PhysAddr::new(DMA_LIMIT)), RegionKind::Low);
        assert_eq!(RegionKind::of(PhysAddr::new(LOW_LIMIT - 0x1000)), RegionKind::Low);
        assert_eq!(RegionKind::of(PhysAddr::new(LOW_LIMIT)), RegionKind::High);
        assert_eq!(RegionKind::of(PhysAddr::new(0x4000_0000)), RegionKind::High);
    }

    #[test]
    fn spans_clamp_to_machine_size() {
        // 8 MiB machine: the low region stops at the last real frame and
        // the high region is empty.
        let frames = 0x0080_0000 >> PAGE_SHIFT;
        assert_eq!(RegionKind::Dma.frame_span(frames), (0, 256));
        assert_eq!(RegionKind::Low.frame_span(frames), (256, frames));
        assert_eq!(RegionKind::High.frame_span(frames), (frames, frames));
    }
}
