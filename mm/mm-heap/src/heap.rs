//! The heap proper: a spin-locked span of boundary-tagged blocks, growing
//! and shrinking in whole pages through a [`Backing`].

use log::{debug, info, trace};
use mm_addr::{PAGE_SIZE, VirtAddr, align_up};
use mm_sync::SpinLock;

use crate::backing::Backing;
use crate::index::{HoleIndex, INDEX_CAPACITY};
use crate::tags::{self, BLOCK_ALIGN, Header, TAG_OVERHEAD};

/// A growable kernel heap over one contiguous virtual range.
///
/// Blocks tile `[start, end)` without gaps; free ones are tracked in the
/// hole index. All backing traffic happens with the heap lock released,
/// so the frame allocator and domain locks are never nested inside it.
pub struct Heap {
    core: SpinLock<HeapCore>,
    privileged: bool,
}

struct HeapCore {
    index: HoleIndex,
    /// First block address, past the index slots.
    start: usize,
    /// Current backed end; moves with growth and contraction.
    end: usize,
    /// The initialized extent; contraction never goes below it.
    minimum: usize,
    /// Absolute growth ceiling.
    max_end: usize,
}

// SAFETY: every raw pointer in the core targets the heap range, and the
// lock serializes all access to it.
unsafe impl Send for HeapCore {}

impl Heap {
    /// Lay the heap out over `[start, end)` with growth ceiling `max`.
    ///
    /// The front of the range is reserved for the hole index; the rest
    /// becomes one hole. `privileged` selects supervisor or user mappings
    /// whenever the heap grows later.
    ///
    /// # Panics
    ///
    /// When any bound is not page aligned, `max` lies below `end`, or the
    /// range cannot hold the index plus one block.
    ///
    /// # Safety
    ///
    /// `[start, end)` must be mapped writable memory owned by this heap
    /// for its whole life. Memory past `end` is only touched after a
    /// [`Backing`] has provided it.
    #[must_use]
    pub unsafe fn initialize(
        start: VirtAddr,
        end: VirtAddr,
        max: VirtAddr,
        privileged: bool,
    ) -> Self {
        let (start, end, max_end) = (start.as_usize(), end.as_usize(), max.as_usize());
        assert!(
            start.is_multiple_of(PAGE_SIZE)
                && end.is_multiple_of(PAGE_SIZE)
                && max_end.is_multiple_of(PAGE_SIZE),
            "heap bounds must be page aligned"
        );
        assert!(end <= max_end, "heap ceiling below its initial extent");

        let slots = INDEX_CAPACITY * size_of::<*mut Header>();
        let usable = align_up(start + slots, PAGE_SIZE);
        assert!(usable < end, "heap too small for its hole index");

        // SAFETY: the caller vouches for the range; slots and first hole
        // split it between them.
        let mut index = unsafe { HoleIndex::new(start as *mut *mut Header) };
        let hole = unsafe { tags::write_block(usable, end - usable, true) };
        index.insert(hole);

        info!("heap 0x{usable:08X}..0x{end:08X}, ceiling 0x{max_end:08X}");
        Self {
            core: SpinLock::new(HeapCore {
                index,
                start: usable,
                end,
                minimum: end,
                max_end,
            }),
            privileged,
        }
    }

    /// Allocate `size` bytes, on a page boundary when `page_align` asks
    /// for it.
    ///
    /// When no hole fits, the heap grows through `backing` and the search
    /// runs once more; growth past the ceiling is fatal, so the returned
    /// pointer is always valid.
    ///
    /// # Panics
    ///
    /// When `size` is zero or the heap would have to grow past its
    /// ceiling.
    #[must_use]
    pub fn allocate<B: Backing>(&self, size: usize, page_align: bool, backing: &B) -> *mut u8 {
        assert!(size > 0, "empty heap allocation");
        let needed = align_up(size + TAG_OVERHEAD, BLOCK_ALIGN);

        if let Some(block) = self.core.with_lock(|core| core.carve(needed, page_align)) {
            trace!("heap alloc 0x{size:X} -> {block:p}");
            return block;
        }

        // Miss. Plan the growth, back it with the lock released, then
        // retry once over the absorbed range. The slack covers the worst
        // leading gap a page-aligned request can demand.
        let slack = if page_align { PAGE_SIZE + TAG_OVERHEAD } else { 0 };
        let (old_end, new_end) = self.core.with_lock(|core| core.growth_plan(needed + slack));
        backing.extend(VirtAddr::new(old_end), VirtAddr::new(new_end), self.privileged);
        debug!("heap grew to 0x{new_end:08X}");

        let block = self.core.with_lock(|core| {
            core.absorb(old_end, new_end);
            core.carve(needed, page_align)
        });
        let Some(block) = block else {
            panic!("heap cannot place 0x{needed:X} bytes after growing");
        };
        trace!("heap alloc 0x{size:X} -> {block:p}");
        block
    }

    /// Return the block at `ptr` to the heap, coalescing with both
    /// neighbors. When the merged hole reaches the heap's end, trailing
    /// whole pages go back through `backing` once the lock is released.
    ///
    /// # Panics
    ///
    /// When the block's tags fail verification or it is already free.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from [`allocate`](Self::allocate) on this heap
    /// and not have been freed since.
    pub unsafe fn free<B: Backing>(&self, ptr: *mut u8, backing: &B) {
        trace!("heap free {ptr:p}");
        // SAFETY: forwarded to the caller.
        let shrink = self.core.with_lock(|core| unsafe { core.release(ptr) });
        if let Some((new_end, old_end)) = shrink {
            backing.release(VirtAddr::new(new_end), VirtAddr::new(old_end));
            debug!("heap shrank to 0x{new_end:08X}");
        }
    }

    /// Current backed end of the heap.
    #[must_use]
    pub fn end(&self) -> VirtAddr {
        VirtAddr::new(self.core.with_lock(|core| core.end))
    }

    /// Bytes currently sitting in holes, tags included.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.core.with_lock(|core| {
            (0..core.index.len())
                // SAFETY: indexed entries are live hole tags.
                .map(|position| unsafe { (*core.index.get(position)).size() })
                .sum()
        })
    }

    /// Number of distinct holes.
    #[must_use]
    pub fn hole_count(&self) -> usize {
        self.core.with_lock(|core| core.index.len())
    }

    /// Walk every block and assert the boundary-tag invariants.
    ///
    /// # Panics
    ///
    /// On any inconsistency: a bad magic, a dangling back-reference,
    /// blocks not tiling the range, adjacent holes, or a hole the index
    /// does not know.
    pub fn verify(&self) {
        self.core.with_lock(|core| core.verify_tags());
    }
}

impl HeapCore {
    /// Gap to leave in front of a block at `addr` so the payload behind
    /// its header lands on a page boundary. Never a gap too small to stand
    /// as a block of its own.
    const fn alignment_gap(addr: usize) -> usize {
        let payload = addr + size_of::<Header>();
        if payload.is_multiple_of(PAGE_SIZE) {
            return 0;
        }
        let gap = align_up(payload, PAGE_SIZE) - payload;
        if gap < TAG_OVERHEAD { gap + PAGE_SIZE } else { gap }
    }

    /// Position of the smallest hole that can take `needed` bytes plus any
    /// alignment gap.
    fn find_fit(&self, needed: usize, page_align: bool) -> Option<usize> {
        (0..self.index.len()).find(|&position| {
            let header = self.index.get(position);
            // SAFETY: indexed entries are live hole tags.
            let size = unsafe { (*header).size() };
            let gap = if page_align {
                Self::alignment_gap(header as usize)
            } else {
                0
            };
            size >= gap + needed
        })
    }

    /// Carve a `needed`-byte block out of the best hole, splitting off a
    /// leading gap and a trailing remainder where they are big enough to
    /// stand alone.
    fn carve(&mut self, needed: usize, page_align: bool) -> Option<*mut u8> {
        let position = self.find_fit(needed, page_align)?;
        let header = self.index.get(position);
        self.index.remove_at(position);
        let hole_addr = header as usize;
        // SAFETY: the entry was a live hole tag until just now.
        let hole_size = unsafe { (*header).size() };

        let gap = if page_align {
            Self::alignment_gap(hole_addr)
        } else {
            0
        };
        if gap > 0 {
            // SAFETY: carving inside the hole removed above.
            let front = unsafe { tags::write_block(hole_addr, gap, true) };
            self.index.insert(front);
        }
        let block_addr = hole_addr + gap;
        let mut block_size = hole_size - gap;

        // A remainder too small to carry its own tags stays with the block.
        if block_size - needed >= TAG_OVERHEAD {
            // SAFETY: the remainder lies inside the original hole.
            let tail = unsafe { tags::write_block(block_addr + needed, block_size - needed, true) };
            self.index.insert(tail);
            block_size = needed;
        }

        // SAFETY: as above.
        unsafe { tags::write_block(block_addr, block_size, false) };
        Some((block_addr + size_of::<Header>()) as *mut u8)
    }

    /// The page-aligned growth that fits `needed` more bytes.
    ///
    /// # Panics
    ///
    /// When that would cross the ceiling. Heap exhaustion has no recovery.
    fn growth_plan(&self, needed: usize) -> (usize, usize) {
        let new_end = align_up(self.end + needed, PAGE_SIZE);
        assert!(new_end <= self.max_end, "heap limit exceeded");
        (self.end, new_end)
    }

    /// Take ownership of the freshly backed `[old_end, new_end)`, merging
    /// it with a hole that happens to end at the old boundary.
    fn absorb(&mut self, old_end: usize, new_end: usize) {
        debug_assert_eq!(old_end, self.end);
        self.end = new_end;

        let mut addr = old_end;
        let mut size = new_end - old_end;
        // Blocks tile the range, so a live footer sits right below the old
        // end.
        // SAFETY: tiling invariant.
        let below = unsafe { tags::read_footer(old_end - size_of::<tags::Footer>()) };
        let last = below.header;
        unsafe { tags::check(last) };
        if unsafe { (*last).is_hole } {
            self.index.remove(last);
            size += unsafe { (*last).size() };
            addr = last as usize;
        }
        // SAFETY: the merged extent is backed and owned by the heap now.
        let hole = unsafe { tags::write_block(addr, size, true) };
        self.index.insert(hole);
    }

    /// Free the block whose payload starts at `ptr`. Returns the page
    /// range to hand back to the backing when the heap contracts.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live payload pointer of this heap.
    unsafe fn release(&mut self, ptr: *mut u8) -> Option<(usize, usize)> {
        let mut addr = (ptr as usize) - size_of::<Header>();
        let header = addr as *mut Header;
        // SAFETY: verification catches a stray pointer with a fatal panic
        // rather than silent corruption.
        unsafe { tags::check(header) };
        assert!(!unsafe { (*header).is_hole }, "double free of heap block");
        let mut size = unsafe { (*header).size() };

        // Unify left through the lower neighbor's footer back-reference.
        if addr > self.start {
            // SAFETY: tiling invariant; the neighbor's footer ends at `addr`.
            let below = unsafe { tags::read_footer(addr - size_of::<tags::Footer>()) };
            let left = below.header;
            unsafe { tags::check(left) };
            if unsafe { (*left).is_hole } {
                self.index.remove(left);
                size += unsafe { (*left).size() };
                addr = left as usize;
            }
        }

        // Unify right; a hole there must be indexed, or the index and the
        // tags have drifted apart.
        if addr + size < self.end {
            let right = (addr + size) as *mut Header;
            // SAFETY: tiling invariant; the upper neighbor starts here.
            unsafe { tags::check(right) };
            if unsafe { (*right).is_hole } {
                self.index.remove(right);
                size += unsafe { (*right).size() };
            }
        }

        // A hole reaching the end gives trailing pages back, down to the
        // initialized extent.
        let mut shrink = None;
        if addr + size == self.end {
            let mut keep = align_up(addr, PAGE_SIZE);
            if keep > addr && keep - addr < TAG_OVERHEAD {
                keep += PAGE_SIZE;
            }
            let keep = keep.max(self.minimum);
            if keep < self.end {
                shrink = Some((keep, self.end));
                self.end = keep;
                size = keep - addr;
            }
        }
        if size > 0 {
            // SAFETY: rewriting tags over the merged extent.
            let hole = unsafe { tags::write_block(addr, size, true) };
            self.index.insert(hole);
        }
        shrink
    }

    fn verify_tags(&self) {
        let mut addr = self.start;
        let mut previous_was_hole = false;
        while addr < self.end {
            let header = addr as *mut Header;
            // SAFETY: the tiling invariant is exactly what this walk checks;
            // a violation panics inside `check` before anything strays.
            unsafe { tags::check(header) };
            let size = unsafe { (*header).size() };
            let is_hole = unsafe { (*header).is_hole };
            assert!(
                size >= TAG_OVERHEAD && addr + size <= self.end,
                "heap block escapes the range"
            );
            assert!(
                !(previous_was_hole && is_hole),
                "adjacent heap holes left uncoalesced"
            );
            assert!(
                !is_hole || self.index.contains(header),
                "heap hole missing from the index"
            );
            previous_was_hole = is_hole;
            addr += size;
        }
        assert_eq!(addr, self.end, "heap blocks do not tile the range");
    }
}
