//! Heap behavior over a host buffer standing in for the mapped range.
//!
//! The recording backing never maps anything; the whole arena is real
//! memory, so growth and contraction show up only as recorded calls.

use std::cell::RefCell;

use mm_addr::{PAGE_SIZE, VirtAddr};
use mm_heap::{Backing, Heap};

const ARENA_PAGES: usize = 64;

#[repr(C, align(4096))]
struct Arena([u8; ARENA_PAGES * PAGE_SIZE]);

fn arena() -> Box<Arena> {
    Box::new(Arena([0; ARENA_PAGES * PAGE_SIZE]))
}

#[derive(Default)]
struct RecordingBacking {
    extends: RefCell<Vec<(VirtAddr, VirtAddr)>>,
    releases: RefCell<Vec<(VirtAddr, VirtAddr)>>,
}

impl Backing for RecordingBacking {
    fn extend(&self, old_end: VirtAddr, new_end: VirtAddr, _supervisor: bool) {
        self.extends.borrow_mut().push((old_end, new_end));
    }

    fn release(&self, new_end: VirtAddr, old_end: VirtAddr) {
        self.releases.borrow_mut().push((new_end, old_end));
    }
}

fn heap_over(backing: &Arena, pages: usize, max_pages: usize) -> Heap {
    let base = VirtAddr::from_ptr(&raw const backing.0);
    unsafe {
        Heap::initialize(
            base,
            base + pages * PAGE_SIZE,
            base + max_pages * PAGE_SIZE,
            true,
        )
    }
}

#[test]
fn a_freed_block_is_reused_in_place() {
    let store = arena();
    let heap = heap_over(&store, 16, ARENA_PAGES);
    let backing = RecordingBacking::default();

    let p1 = heap.allocate(100, false, &backing);
    let p2 = heap.allocate(200, false, &backing);
    assert_ne!(p1, p2);
    heap.verify();

    unsafe { heap.free(p1, &backing) };
    heap.verify();
    assert_eq!(heap.hole_count(), 2);

    // 90 bytes need less than the freed block's 100, and the leftover is
    // too small to stand alone, so the block comes back whole.
    let p3 = heap.allocate(90, false, &backing);
    assert_eq!(p3, p1);
    assert_eq!(heap.hole_count(), 1);
    heap.verify();

    assert!(backing.extends.borrow().is_empty());
    assert!(backing.releases.borrow().is_empty());
}

#[test]
fn freeing_everything_restores_a_single_hole() {
    let store = arena();
    let heap = heap_over(&store, 16, ARENA_PAGES);
    let backing = RecordingBacking::default();
    let initial_free = heap.free_bytes();

    let p1 = heap.allocate(100, false, &backing);
    let p2 = heap.allocate(200, false, &backing);
    let p3 = heap.allocate(300, false, &backing);

    unsafe { heap.free(p2, &backing) };
    heap.verify();
    unsafe { heap.free(p1, &backing) };
    heap.verify();
    unsafe { heap.free(p3, &backing) };
    heap.verify();

    assert_eq!(heap.hole_count(), 1);
    assert_eq!(heap.free_bytes(), initial_free);
    // the hole never left the initial extent, so nothing was released
    assert!(backing.releases.borrow().is_empty());
}

#[test]
fn a_large_remainder_is_split_off_as_its_own_hole() {
    let store = arena();
    let heap = heap_over(&store, 16, ARENA_PAGES);
    let backing = RecordingBacking::default();

    let p1 = heap.allocate(1000, false, &backing);
    let _guard = heap.allocate(100, false, &backing);
    unsafe { heap.free(p1, &backing) };
    let free_before = heap.free_bytes();

    // the freed 1000-byte block is the smallest fit; the big leftover
    // becomes a hole of its own
    let p3 = heap.allocate(100, false, &backing);
    assert_eq!(p3, p1);
    assert_eq!(heap.hole_count(), 2);
    assert!(heap.free_bytes() < free_before);
    heap.verify();
}

#[test]
fn page_aligned_requests_land_on_page_boundaries() {
    let store = arena();
    let heap = heap_over(&store, 16, ARENA_PAGES);
    let backing = RecordingBacking::default();
    let initial_free = heap.free_bytes();

    let p = heap.allocate(PAGE_SIZE, true, &backing);
    assert_eq!(p as usize % PAGE_SIZE, 0);
    // the gap in front of the aligned block stands as a hole
    assert_eq!(heap.hole_count(), 2);
    heap.verify();

    unsafe { heap.free(p, &backing) };
    assert_eq!(heap.hole_count(), 1);
    assert_eq!(heap.free_bytes(), initial_free);
    heap.verify();
}

#[test]
#[should_panic(expected = "empty heap allocation")]
fn a_zero_byte_allocation_is_refused() {
    let store = arena();
    let heap = heap_over(&store, 16, ARENA_PAGES);
    let _ = heap.allocate(0, false, &RecordingBacking::default());
}

#[test]
#[should_panic(expected = "heap corruption")]
fn a_scribbled_tag_is_fatal_on_free() {
    let store = arena();
    let heap = heap_over(&store, 16, ARENA_PAGES);
    let backing = RecordingBacking::default();

    let p = heap.allocate(64, false, &backing);
    // wreck the header magic just in front of the payload
    unsafe { ((p as usize - 12) as *mut u32).write(0xDEAD_BEEF) };
    unsafe { heap.free(p, &backing) };
}

#[test]
#[should_panic(expected = "double free of heap block")]
fn freeing_twice_is_fatal() {
    let store = arena();
    let heap = heap_over(&store, 16, ARENA_PAGES);
    let backing = RecordingBacking::default();

    let p = heap.allocate(64, false, &backing);
    unsafe { heap.free(p, &backing) };
    unsafe { heap.free(p, &backing) };
}

#[test]
fn growth_and_contraction_round_trip() {
    let store = arena();
    let base = VirtAddr::from_ptr(&raw const store.0);
    // two pages of index slots, one page of blocks
    let heap = heap_over(&store, 3, 8);
    let backing = RecordingBacking::default();
    let initial_end = base + 3 * PAGE_SIZE;
    let initial_free = heap.free_bytes();
    assert_eq!(heap.end(), initial_end);

    // two pages cannot fit in the one-page hole, so the heap grows
    let p = heap.allocate(2 * PAGE_SIZE, false, &backing);
    let grown_end = base + 6 * PAGE_SIZE;
    assert_eq!(heap.end(), grown_end);
    assert_eq!(*backing.extends.borrow(), vec![(initial_end, grown_end)]);
    assert!(backing.releases.borrow().is_empty());
    heap.verify();

    // the payload is real arena memory
    unsafe { p.write_bytes(0xA5, 2 * PAGE_SIZE) };

    // freeing the block leaves the trailing pages unused, and the heap
    // hands them back down to its initial extent
    unsafe { heap.free(p, &backing) };
    assert_eq!(heap.end(), initial_end);
    assert_eq!(*backing.releases.borrow(), vec![(initial_end, grown_end)]);
    assert_eq!(heap.free_bytes(), initial_free);
    assert_eq!(heap.hole_count(), 1);
    heap.verify();
}

#[test]
#[should_panic(expected = "heap limit exceeded")]
fn growth_past_the_ceiling_is_fatal() {
    let store = arena();
    let heap = heap_over(&store, 3, 4);
    let backing = RecordingBacking::default();
    // needs three more pages, the ceiling allows one
    let _ = heap.allocate(2 * PAGE_SIZE, false, &backing);
}
