//! The real backing wired up: heap growth pulls frames from the allocator
//! and maps them into the owning domain, contraction gives both back.
//!
//! The heap range is a host buffer, so payload writes hit real memory; the
//! domain mappings are pure bookkeeping over an arena of fake frames.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use mm_addr::{AccessMode, PAGE_SIZE, PhysAddr, VirtAddr};
use mm_domain::ProtectionDomain;
use mm_frame::{FrameAllocator, PhysAccess};
use mm_heap::{DomainBacking, Heap};
use mm_info::{BootReservation, MemoryMap, MemoryRange, RangeKind};
use mm_paging::{DirIndex, Mmu, PageDirectory, PageFlags, PageTable, TableAccess};

#[repr(C, align(4096))]
struct Frame4K([u8; PAGE_SIZE]);

struct TestMachine {
    frames: RefCell<HashMap<usize, Box<Frame4K>>>,
    paging_on: Cell<bool>,
}

impl TestMachine {
    fn new() -> Self {
        Self {
            frames: RefCell::new(HashMap::new()),
            paging_on: Cell::new(false),
        }
    }

    fn frame_ptr(&self, pa: PhysAddr) -> *mut u8 {
        let mut frames = self.frames.borrow_mut();
        let frame = frames
            .entry(pa.frame_index())
            .or_insert_with(|| Box::new(Frame4K([0; PAGE_SIZE])));
        (&raw mut frame.0).cast()
    }
}

impl PhysAccess for TestMachine {
    unsafe fn with_frame<R>(
        &self,
        _mode: AccessMode,
        frame: PhysAddr,
        f: impl FnOnce(*mut u8) -> R,
    ) -> R {
        f(self.frame_ptr(frame))
    }
}

impl TableAccess for TestMachine {
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

impl Mmu for TestMachine {
    fn load_root(&self, _root: PhysAddr) {}

    fn flush(&self, _va: VirtAddr) {}

    fn flush_all(&self) {}

    unsafe fn enable_paging_mode(&self) {
        self.paging_on.set(true);
    }

    fn faulting_address(&self) -> VirtAddr {
        VirtAddr::ZERO
    }
}

fn machine_with_pool() -> (TestMachine, FrameAllocator) {
    let machine = TestMachine::new();
    let mut map = MemoryMap::new();
    map.push(MemoryRange::new(PhysAddr::ZERO, 0x4_0000, RangeKind::Free));
    let alloc = FrameAllocator::initialize(&machine, &map, BootReservation::none());
    (machine, alloc)
}

#[repr(C, align(4096))]
struct Arena([u8; 16 * PAGE_SIZE]);

#[test]
fn growth_pulls_frames_and_maps_them_supervisor_only() {
    let (machine, alloc) = machine_with_pool();
    let domain = ProtectionDomain::create(&machine, &alloc);
    let backing = DomainBacking::new(&machine, &alloc, &domain);

    let store = Box::new(Arena([0; 16 * PAGE_SIZE]));
    let base = VirtAddr::from_ptr(&raw const store.0);
    let initial_end = base + 3 * PAGE_SIZE;
    let heap = unsafe { Heap::initialize(base, initial_end, base + 16 * PAGE_SIZE, true) };

    let before = alloc.free_frames();
    let p = heap.allocate(2 * PAGE_SIZE, false, &backing);

    // one frame per grown page, plus one or two page tables depending on
    // where the arena happens to sit
    let grown = (heap.end().as_usize() - initial_end.as_usize()) / PAGE_SIZE;
    assert_eq!(grown, 3);
    let consumed = before - alloc.free_frames();
    let tables = consumed - grown;
    assert!((1..=2).contains(&tables));

    let (_, flags) = domain.mapping_of(&machine, initial_end).unwrap();
    assert_eq!(flags, PageFlags::KERNEL_RW);

    // the payload is backed by the arena, not the mappings
    unsafe { p.write_bytes(0x5A, 2 * PAGE_SIZE) };
    heap.verify();

    unsafe { heap.free(p, &backing) };
    assert_eq!(heap.end(), initial_end);
    assert!(!domain.is_mapped(&machine, initial_end));
    // page frames came back, table frames stay with the domain
    assert_eq!(alloc.free_frames(), before - tables);
    heap.verify();
}

#[test]
fn an_unprivileged_heap_maps_user_accessible_pages() {
    let (machine, alloc) = machine_with_pool();
    let domain = ProtectionDomain::create(&machine, &alloc);
    let backing = DomainBacking::new(&machine, &alloc, &domain);

    let store = Box::new(Arena([0; 16 * PAGE_SIZE]));
    let base = VirtAddr::from_ptr(&raw const store.0);
    let initial_end = base + 3 * PAGE_SIZE;
    let heap = unsafe { Heap::initialize(base, initial_end, base + 16 * PAGE_SIZE, false) };

    let p = heap.allocate(PAGE_SIZE, false, &backing);

    let (_, flags) = domain.mapping_of(&machine, initial_end).unwrap();
    assert!(flags.contains(PageFlags::USER));
    assert!(flags.contains(PageFlags::WRITABLE));

    unsafe { heap.free(p, &backing) };
    assert!(!domain.is_mapped(&machine, initial_end));
}
