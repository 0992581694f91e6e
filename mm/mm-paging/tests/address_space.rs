use std::cell::{Cell, RefCell};

use mm_addr::{AccessMode, PhysAddr, VirtAddr};
use mm_paging::{
    AddressSpace, DirIndex, MapError, Mmu, PageDirectory, PageFlags, PageTable, RECURSIVE_SLOT,
    TableAccess, TableFrames, window,
};

#[repr(C, align(4096))]
struct Frame4K([u8; 4096]);

/// Simulated physical memory. Frame numbers start at 1 so that address zero
/// never shows up as a real frame.
#[derive(Default)]
struct Arena {
    frames: RefCell<Vec<Box<Frame4K>>>,
    released: RefCell<Vec<PhysAddr>>,
}

impl Arena {
    fn alloc_frame(&self) -> PhysAddr {
        let mut frames = self.frames.borrow_mut();
        frames.push(Box::new(Frame4K([0; 4096])));
        PhysAddr::from_frame_index(frames.len())
    }

    fn frame_ptr(&self, pa: PhysAddr) -> *mut u8 {
        assert!(pa.is_page_aligned(), "not a frame base: {pa:?}");
        let frames = self.frames.borrow();
        let frame = &frames[pa.frame_index() - 1];
        (&raw const frame.0).cast_mut().cast()
    }

    fn frames_allocated(&self) -> usize {
        self.frames.borrow().len()
    }
}

impl TableAccess for Arena {
    unsafe fn directory_mut<'t>(&self, _mode: AccessMode, root: PhysAddr) -> &'t mut PageDirectory {
        unsafe { &mut *self.frame_ptr(root).cast() }
    }

    unsafe fn table_mut<'t>(
        &self,
        _mode: AccessMode,
        _slot: DirIndex,
        table: PhysAddr,
    ) -> &'t mut PageTable {
        unsafe { &mut *self.frame_ptr(table).cast() }
    }
}

impl TableFrames for Arena {
    fn allocate_table_frame(&self) -> PhysAddr {
        self.alloc_frame()
    }

    fn release_table_frame(&self, frame: PhysAddr) {
        self.released.borrow_mut().push(frame);
    }
}

#[derive(Default)]
struct MockMmu {
    flushes: RefCell<Vec<VirtAddr>>,
    loaded: Cell<Option<PhysAddr>>,
    enabled: Cell<bool>,
}

impl Mmu for MockMmu {
    fn load_root(&self, root: PhysAddr) {
        self.loaded.set(Some(root));
    }

    fn flush(&self, va: VirtAddr) {
        self.flushes.borrow_mut().push(va);
    }

    fn flush_all(&self) {}

    unsafe fn enable_paging_mode(&self) {
        self.enabled.set(true);
    }

    fn faulting_address(&self) -> VirtAddr {
        VirtAddr::ZERO
    }
}

#[test]
fn new_wires_the_recursive_slot() {
    let arena = Arena::default();
    let space = AddressSpace::new(&arena, &arena);

    let dir = unsafe { arena.directory_mut(space.mode(), space.root()) };
    let entry = dir.get(RECURSIVE_SLOT);
    assert!(entry.present());
    assert!(entry.writable());
    assert_eq!(entry.frame_addr(), space.root());
    assert_eq!(space.mode(), AccessMode::Physical);
}

#[test]
fn map_round_trips() {
    let arena = Arena::default();
    let mmu = MockMmu::default();
    let space = AddressSpace::new(&arena, &arena);

    let va = VirtAddr::new(0x0800_2000);
    let pa = PhysAddr::new(0x0042_0000);
    let flags = PageFlags::WRITABLE | PageFlags::USER;

    assert!(!space.is_mapped(&arena, va));
    space.map(&arena, &mmu, &arena, va, pa, flags).unwrap();

    assert!(space.is_mapped(&arena, va));
    assert_eq!(space.mapping_of(&arena, va), Some((pa, flags)));

    space.unmap(&arena, &mmu, va);
    assert!(!space.is_mapped(&arena, va));
    assert_eq!(space.mapping_of(&arena, va), None);
}

#[test]
fn mapping_twice_is_rejected() {
    let arena = Arena::default();
    let mmu = MockMmu::default();
    let space = AddressSpace::new(&arena, &arena);

    let va = VirtAddr::new(0xC000_0000);
    let first = PhysAddr::new(0x0010_0000);
    space
        .map(&arena, &mmu, &arena, va, first, PageFlags::KERNEL_RW)
        .unwrap();

    let second = PhysAddr::new(0x0020_0000);
    let again = space.map(&arena, &mmu, &arena, va, second, PageFlags::KERNEL_RW);
    assert_eq!(again, Err(MapError::AlreadyMapped));

    // the original mapping is untouched
    assert_eq!(
        space.mapping_of(&arena, va),
        Some((first, PageFlags::KERNEL_RW))
    );
}

#[test]
fn unmap_is_idempotent() {
    let arena = Arena::default();
    let mmu = MockMmu::default();
    let space = AddressSpace::new(&arena, &arena);

    let va = VirtAddr::new(0x0040_0000);
    space
        .map(&arena, &mmu, &arena, va, PhysAddr::new(0x5000), PageFlags::empty())
        .unwrap();

    space.unmap(&arena, &mmu, va);
    let flushes_after_first = mmu.flushes.borrow().len();

    // second unmap neither panics nor flushes again
    space.unmap(&arena, &mmu, va);
    assert_eq!(mmu.flushes.borrow().len(), flushes_after_first);
    assert!(!space.is_mapped(&arena, va));
}

#[test]
fn unmap_clears_present_but_keeps_writable() {
    let arena = Arena::default();
    let mmu = MockMmu::default();
    let space = AddressSpace::new(&arena, &arena);

    let va = VirtAddr::new(0x0080_0000);
    space
        .map(&arena, &mmu, &arena, va, PhysAddr::new(0x7000), PageFlags::WRITABLE)
        .unwrap();
    space.unmap(&arena, &mmu, va);

    let table = space
        .page_table(&arena, &mmu, &arena, va, false)
        .expect("table still exists");
    let entry = table.get(mm_paging::TableIndex::of(va));
    assert!(!entry.present());
    assert!(entry.writable());
}

#[test]
fn queries_never_create_tables() {
    let arena = Arena::default();
    let mmu = MockMmu::default();
    let space = AddressSpace::new(&arena, &arena);
    let before = arena.frames_allocated();

    let va = VirtAddr::new(0x1234_5000);
    assert!(!space.is_mapped(&arena, va));
    assert_eq!(space.mapping_of(&arena, va), None);
    space.unmap(&arena, &mmu, va);
    assert!(space.page_table(&arena, &mmu, &arena, va, false).is_none());

    assert_eq!(arena.frames_allocated(), before);
    assert!(mmu.flushes.borrow().is_empty());
}

#[test]
fn one_table_per_directory_slot() {
    let arena = Arena::default();
    let mmu = MockMmu::default();
    let space = AddressSpace::new(&arena, &arena);
    let before = arena.frames_allocated();

    // same 4 MiB span, different pages
    let flags = PageFlags::empty();
    space
        .map(&arena, &mmu, &arena, VirtAddr::new(0x0800_0000), PhysAddr::new(0x1000), flags)
        .unwrap();
    space
        .map(&arena, &mmu, &arena, VirtAddr::new(0x0800_5000), PhysAddr::new(0x2000), flags)
        .unwrap();

    assert_eq!(arena.frames_allocated(), before + 1);
}

#[test]
fn creating_a_table_flushes_its_window_page() {
    let arena = Arena::default();
    let mmu = MockMmu::default();
    let space = AddressSpace::new(&arena, &arena);

    let va = VirtAddr::new(0x0800_2000);
    space
        .map(&arena, &mmu, &arena, va, PhysAddr::new(0x9000), PageFlags::empty())
        .unwrap();

    let flushes = mmu.flushes.borrow();
    assert_eq!(
        flushes.as_slice(),
        &[window::table_va(DirIndex::of(va)), va]
    );
}

#[test]
fn release_tables_returns_every_structure_frame() {
    let arena = Arena::default();
    let mmu = MockMmu::default();
    let space = AddressSpace::new(&arena, &arena);

    let leaf = PhysAddr::new(0x0500_0000);
    space
        .map(&arena, &mmu, &arena, VirtAddr::new(0x0040_0000), leaf, PageFlags::empty())
        .unwrap();
    let high = PhysAddr::new(0x0600_0000);
    space
        .map(&arena, &mmu, &arena, VirtAddr::new(0xC123_4000), high, PageFlags::empty())
        .unwrap();

    space.release_tables(&arena, &arena);

    let released = arena.released.borrow();
    // two tables plus the directory; leaf target frames stay out of it
    assert_eq!(released.len(), 3);
    assert!(released.contains(&space.root()));
    assert!(!released.contains(&leaf));
}

#[test]
fn enable_paging_loads_root_and_flips_mode() {
    let arena = Arena::default();
    let mmu = MockMmu::default();
    let mut space = AddressSpace::new(&arena, &arena);

    unsafe { space.enable_paging(&mmu) };

    assert_eq!(mmu.loaded.get(), Some(space.root()));
    assert!(mmu.enabled.get());
    assert_eq!(space.mode(), AccessMode::Mapped);
}

#[test]
#[should_panic(expected = "already enabled")]
fn enable_paging_twice_is_fatal() {
    let arena = Arena::default();
    let mmu = MockMmu::default();
    let mut space = AddressSpace::new(&arena, &arena);

    unsafe { space.enable_paging(&mmu) };
    unsafe { space.enable_paging(&mmu) };
}

#[test]
fn dump_walks_without_touching_state() {
    let arena = Arena::default();
    let mmu = MockMmu::default();
    let space = AddressSpace::new(&arena, &arena);

    let va = VirtAddr::new(0x0900_1000);
    space
        .map(&arena, &mmu, &arena, va, PhysAddr::new(0x3000), PageFlags::WRITABLE)
        .unwrap();

    space.dump(&arena);
    assert_eq!(space.mapping_of(&arena, va).map(|(pa, _)| pa), Some(PhysAddr::new(0x3000)));
}
