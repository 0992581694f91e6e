//! The allocator proper.
//!
//! [`FrameAllocator`] wraps the pool state in a spin lock; every public
//! operation takes the lock once, and frame contents (zeroing) are touched
//! only after it is released again.

use crate::PhysAccess;
use crate::links::{FrameLink, LINK_MAX, LINK_NIL, LinkTable};
use crate::region::{REGION_COUNT, Region, RegionKind, RegionSnapshot};
use mm_addr::{AccessMode, PAGE_SIZE, PhysAddr};
use mm_info::{BootReservation, MemoryMap, RangeKind};
use mm_sync::SpinLock;

/// Region-aware physical frame allocator.
///
/// Construct exactly one with [`FrameAllocator::initialize`] after the boot
/// shim hands over the memory map. All methods take `&self`; the pool state
/// lives behind an internal spin lock.
pub struct FrameAllocator {
    pool: SpinLock<FramePool>,
}

struct FramePool {
    links: LinkTable,
    regions: [Region; REGION_COUNT],
    frame_count: usize,
    mode: AccessMode,
}

/// Allocation order: drain high memory before touching the scarce
/// DMA-capable regions.
const ALLOCATION_ORDER: [RegionKind; REGION_COUNT] =
    [RegionKind::High, RegionKind::Low, RegionKind::Dma];

impl FrameAllocator {
    /// Build the allocator from the firmware memory map.
    ///
    /// Carves the frame link table out of the top of the highest free range,
    /// then threads every usable frame onto its region's free list. Frames
    /// covered by `boot` (the running kernel image), the link table itself
    /// and frame zero are withheld and counted as reserved.
    ///
    /// Runs before paging, so the link table is written through
    /// [`AccessMode::Physical`].
    ///
    /// # Panics
    ///
    /// When the map is empty or no free range can hold the link table.
    #[allow(clippy::cast_possible_truncation)] // frame_count <= LINK_MAX
    pub fn initialize<P: PhysAccess>(
        phys: &P,
        map: &MemoryMap,
        boot: BootReservation,
    ) -> Self {
        assert!(!map.is_empty(), "empty memory map");

        let frame_count = map.max_end().align_down().frame_index();
        assert!(frame_count <= LINK_MAX as usize, "memory map too large");

        let table_frames = LinkTable::frames_needed(frame_count);
        let table_base = carve_table(map, boot, table_frames);
        let table_end = table_base + table_frames * PAGE_SIZE;

        let mode = AccessMode::Physical;
        let links = LinkTable::new(table_base, frame_count);
        links.fill_held(phys, mode);

        let mut regions = [Region::empty(); REGION_COUNT];
        for range in map.iter().filter(|r| r.kind == RangeKind::Free) {
            let first = range.start.align_up().frame_index();
            let last = range.end().align_down().frame_index();
            for index in first..last {
                let pa = PhysAddr::from_frame_index(index);
                let region = &mut regions[RegionKind::of(pa).index()];
                if index == 0 || boot.contains(pa) || (pa >= table_base && pa < table_end) {
                    region.reserved += 1;
                    continue;
                }
                let head = region.head;
                links.set(phys, mode, index, FrameLink { prev: LINK_NIL, next: head });
                if head != LINK_NIL {
                    let mut old = links.get(phys, mode, head as usize);
                    old.prev = index as u32;
                    links.set(phys, mode, head as usize, old);
                }
                region.head = index as u32;
                region.frames += 1;
                region.free += 1;
            }
        }

        let managed: usize = regions.iter().map(|r| r.frames).sum();
        let reserved: usize = regions.iter().map(|r| r.reserved).sum();
        log::info!(
            "frame allocator: {managed} frames managed, {reserved} withheld, link table at {table_base:?} ({table_frames} frames)"
        );
        for kind in [RegionKind::Dma, RegionKind::Low, RegionKind::High] {
            let Region { free, frames, reserved, .. } = regions[kind.index()];
            log::debug!("  {kind:?}: {free} free / {frames} managed, {reserved} reserved");
        }

        Self {
            pool: SpinLock::new(FramePool {
                links,
                regions,
                frame_count,
                mode,
            }),
        }
    }

    /// Allocate one frame, zero-filled.
    ///
    /// Prefers the highest region with free frames so low memory survives
    /// for devices that can only address it.
    ///
    /// # Panics
    ///
    /// When no frame is free in any region. Frame exhaustion has no
    /// recovery; callers do not handle it.
    #[must_use]
    pub fn allocate<P: PhysAccess>(&self, phys: &P) -> PhysAddr {
        let (frame, mode) = self.pool.with_lock(|pool| (pool.take_free(phys), pool.mode));
        // SAFETY: freshly unthreaded from a free list, so the frame is
        // frame-aligned RAM owned by this caller alone.
        unsafe {
            phys.with_frame(mode, frame, |ptr| ptr.write_bytes(0, PAGE_SIZE));
        }
        log::trace!("frame alloc {frame:?}");
        frame
    }

    /// Return one frame to its region's free list.
    ///
    /// # Panics
    ///
    /// When `frame` is outside managed memory or is not currently
    /// allocated (double free, reserved frame, never-threaded frame).
    pub fn free<P: PhysAccess>(&self, phys: &P, frame: PhysAddr) {
        debug_assert!(frame.is_page_aligned());
        log::trace!("frame free {frame:?}");
        self.pool.with_lock(|pool| pool.put_free(phys, frame));
    }

    /// Allocate `count` physically contiguous frames, zero-filled.
    ///
    /// First fit from the bottom of memory, considering only regions up to
    /// `placement`; a device that can only address 16 MiB passes
    /// [`RegionKind::Low`]. The run never straddles a region boundary.
    /// Returns the first frame of the run.
    ///
    /// # Panics
    ///
    /// When `count` is zero or no eligible region holds a free run of that
    /// length.
    #[must_use]
    pub fn allocate_range<P: PhysAccess>(
        &self,
        phys: &P,
        count: usize,
        placement: RegionKind,
    ) -> PhysAddr {
        assert!(count > 0, "empty range");
        let (start, mode) = self
            .pool
            .with_lock(|pool| (pool.take_run(phys, count, placement), pool.mode));
        for offset in 0..count {
            // SAFETY: as in `allocate`; the whole run was just claimed.
            unsafe {
                phys.with_frame(mode, start + offset * PAGE_SIZE, |ptr| {
                    ptr.write_bytes(0, PAGE_SIZE);
                });
            }
        }
        log::trace!("frame alloc {start:?}+{count}");
        start
    }

    /// Return a contiguous run obtained from [`Self::allocate_range`].
    ///
    /// # Panics
    ///
    /// When any frame of the run is not currently allocated.
    pub fn free_range<P: PhysAccess>(&self, phys: &P, start: PhysAddr, count: usize) {
        debug_assert!(start.is_page_aligned());
        log::trace!("frame free {start:?}+{count}");
        self.pool.with_lock(|pool| {
            for offset in 0..count {
                pool.put_free(phys, start + offset * PAGE_SIZE);
            }
        });
    }

    /// Switch the link table to scratch-mapped access.
    ///
    /// Called once by the privileged domain right after paging goes live;
    /// from then on the allocator reaches its table through temporary
    /// mappings instead of raw pointers.
    ///
    /// # Panics
    ///
    /// When called twice; the transition is one-way.
    pub fn note_paging_enabled(&self) {
        self.pool.with_lock(|pool| {
            assert!(pool.mode.is_physical(), "paging was already enabled");
            pool.mode = AccessMode::Mapped;
        });
        log::debug!("frame allocator switched to mapped access");
    }

    /// Point-in-time counters for all three regions, in
    /// `[Dma, Low, High]` order.
    #[must_use]
    pub fn regions(&self) -> [RegionSnapshot; REGION_COUNT] {
        self.pool.with_lock(|pool| {
            let snap = |kind: RegionKind| {
                let region = &pool.regions[kind.index()];
                RegionSnapshot {
                    kind,
                    free: region.free,
                    frames: region.frames,
                    reserved: region.reserved,
                }
            };
            [
                snap(RegionKind::Dma),
                snap(RegionKind::Low),
                snap(RegionKind::High),
            ]
        })
    }

    /// Free frames over all regions.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.pool
            .with_lock(|pool| pool.regions.iter().map(|r| r.free).sum())
    }

    /// Managed frames over all regions.
    #[must_use]
    pub fn total_frames(&self) -> usize {
        self.pool
            .with_lock(|pool| pool.regions.iter().map(|r| r.frames).sum())
    }
}

impl FramePool {
    fn take_free<P: PhysAccess>(&mut self, phys: &P) -> PhysAddr {
        let links = self.links;
        for kind in ALLOCATION_ORDER {
            let head = self.regions[kind.index()].head;
            if head == LINK_NIL {
                continue;
            }
            let index = head as usize;
            let link = links.get(phys, self.mode, index);
            debug_assert!(link.is_free());
            self.regions[kind.index()].head = link.next;
            if link.next != LINK_NIL {
                let mut next = links.get(phys, self.mode, link.next as usize);
                next.prev = LINK_NIL;
                links.set(phys, self.mode, link.next as usize, next);
            }
            links.set(phys, self.mode, index, FrameLink::used());
            self.regions[kind.index()].free -= 1;
            return PhysAddr::from_frame_index(index);
        }
        panic!("out of physical frames");
    }

    #[allow(clippy::cast_possible_truncation)] // index < frame_count <= LINK_MAX
    fn put_free<P: PhysAccess>(&mut self, phys: &P, frame: PhysAddr) {
        let links = self.links;
        let index = frame.frame_index();
        assert!(
            index < self.frame_count,
            "frame {frame:?} is outside managed memory"
        );
        let link = links.get(phys, self.mode, index);
        assert!(link.is_used(), "frame {frame:?} was not allocated");

        let kind = RegionKind::of(frame);
        let region = &mut self.regions[kind.index()];
        let head = region.head;
        links.set(phys, self.mode, index, FrameLink { prev: LINK_NIL, next: head });
        if head != LINK_NIL {
            let mut old = links.get(phys, self.mode, head as usize);
            old.prev = index as u32;
            links.set(phys, self.mode, head as usize, old);
        }
        region.head = index as u32;
        region.free += 1;
        assert!(
            region.free <= region.frames,
            "more frames free than managed in {kind:?}"
        );
    }

    fn take_run<P: PhysAccess>(
        &mut self,
        phys: &P,
        count: usize,
        placement: RegionKind,
    ) -> PhysAddr {
        let links = self.links;
        // Frame zero is never handed out.
        let mut index = 1;
        'scan: while index + count <= self.frame_count {
            let kind = RegionKind::of(PhysAddr::from_frame_index(index));
            if kind > placement {
                break;
            }
            let (_, span_end) = kind.frame_span(self.frame_count);
            if index + count > span_end {
                index = span_end;
                continue;
            }
            for probe in index..index + count {
                if !links.get(phys, self.mode, probe).is_free() {
                    index = probe + 1;
                    continue 'scan;
                }
            }
            for claim in index..index + count {
                self.unthread(phys, claim, kind);
                links.set(phys, self.mode, claim, FrameLink::used());
                self.regions[kind.index()].free -= 1;
            }
            return PhysAddr::from_frame_index(index);
        }
        panic!("no contiguous run of {count} frames within {placement:?}");
    }

    /// Remove a free frame from the middle of its region's list.
    fn unthread<P: PhysAccess>(&mut self, phys: &P, index: usize, kind: RegionKind) {
        let links = self.links;
        let link = links.get(phys, self.mode, index);
        debug_assert!(link.is_free());
        if link.prev == LINK_NIL {
            self.regions[kind.index()].head = link.next;
        } else {
            let mut prev = links.get(phys, self.mode, link.prev as usize);
            prev.next = link.next;
            links.set(phys, self.mode, link.prev as usize, prev);
        }
        if link.next != LINK_NIL {
            let mut next = links.get(phys, self.mode, link.next as usize);
            next.prev = link.prev;
            links.set(phys, self.mode, link.next as usize, next);
        }
    }
}

/// Pick the spot for the link table: the top of the highest free range that
/// can hold it without touching the boot reservation.
fn carve_table(map: &MemoryMap, boot: BootReservation, table_frames: usize) -> PhysAddr {
    let bytes = table_frames * PAGE_SIZE;
    let mut best: Option<PhysAddr> = None;
    for range in map.iter().filter(|r| r.kind == RangeKind::Free) {
        let start = range.start.align_up();
        let end = range.end().align_down();
        if end.as_usize() < start.as_usize() + bytes {
            continue;
        }
        let base = PhysAddr::new(end.as_usize() - bytes);
        if boot.size > 0 && base < boot.end() && boot.start < end {
            continue;
        }
        if best.is_none_or(|b| base > b) {
            best = Some(base);
        }
    }
    let Some(base) = best else {
        panic!("no free range can hold the frame link table");
    };
    base
}
