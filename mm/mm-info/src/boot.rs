//! # Boot-time memory description
//!
//! Built by the boot shim from the firmware's tables and consumed exactly
//! once, by the frame allocator's initialization. No allocator exists at
//! that point, so the map is a fixed-capacity value type.

use mm_addr::PhysAddr;

/// Upper bound on distinct ranges a firmware map may hand us.
pub const MAX_RANGES: usize = 32;

/// Classification of one memory-map entry.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RangeKind {
    /// Usable RAM.
    Free = 0,
    /// Firmware tables, MMIO holes, anything the allocator must not touch.
    Reserved = 1,
}

/// One entry of the firmware memory map.
///
/// Entries describe non-overlapping byte ranges; no particular order is
/// assumed. Free entries need not be page-aligned, the allocator aligns
/// them inward.
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct MemoryRange {
    pub start: PhysAddr,
    pub length: usize,
    pub kind: RangeKind,
}

impl MemoryRange {
    #[must_use]
    pub const fn new(start: PhysAddr, length: usize, kind: RangeKind) -> Self {
        Self {
            start,
            length,
            kind,
        }
    }

    /// First address past the range.
    #[must_use]
    pub const fn end(&self) -> PhysAddr {
        PhysAddr::new(self.start.as_usize() + self.length)
    }
}

/// The firmware memory map, as handed over by the boot shim.
#[derive(Clone)]
pub struct MemoryMap {
    ranges: [MemoryRange; MAX_RANGES],
    len: usize,
}

impl MemoryMap {
    #[must_use]
    pub const fn new() -> Self {
        const EMPTY: MemoryRange = MemoryRange::new(PhysAddr::ZERO, 0, RangeKind::Reserved);
        Self {
            ranges: [EMPTY; MAX_RANGES],
            len: 0,
        }
    }

    /// Append an entry.
    ///
    /// # Panics
    ///
    /// When the fixed capacity is exceeded; real firmware maps are far
    /// smaller than [`MAX_RANGES`].
    pub fn push(&mut self, range: MemoryRange) {
        assert!(self.len < MAX_RANGES, "memory map overflow");
        self.ranges[self.len] = range;
        self.len += 1;
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryRange> {
        self.ranges[..self.len].iter()
    }

    /// Highest end address over all entries, free or not.
    #[must_use]
    pub fn max_end(&self) -> PhysAddr {
        self.iter()
            .map(MemoryRange::end)
            .max()
            .unwrap_or(PhysAddr::ZERO)
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::new()
    }
}

/// The currently-executing kernel image.
///
/// The image runs identity-placed at boot, so its virtual placement equals
/// its physical one; the frame allocator subtracts this range from the free
/// set before threading any free list.
#[derive(Copy, Clone, Debug)]
pub struct BootReservation {
    pub start: PhysAddr,
    pub size: usize,
}

impl BootReservation {
    #[must_use]
    pub const fn new(start: PhysAddr, size: usize) -> Self {
        Self { start, size }
    }

    /// An empty reservation, for tests and synthetic maps.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            start: PhysAddr::ZERO,
            size: 0,
        }
    }

    #[must_use]
    pub const fn end(&self) -> PhysAddr {
        PhysAddr::new(self.start.as_usize() + self.size)
    }

    #[must_use]
    pub const fn contains(&self, pa: PhysAddr) -> bool {
        pa.as_usize() >= self.start.as_usize() && pa.as_usize() < self.end().as_usize()
    }
}
