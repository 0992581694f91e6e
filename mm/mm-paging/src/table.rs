use core::fmt;
use mm_addr::{PAGE_SHIFT, PAGE_SIZE, VirtAddr};

use crate::entry::PageEntry;

/// Entries per page directory and per page table.
pub const ENTRY_COUNT: usize = 1024;

/// The directory slot that maps the directory onto itself.
///
/// Installed at construction and never changed; it is what makes every
/// paging structure reachable at a fixed virtual window once paging is on.
pub const RECURSIVE_SLOT: DirIndex = DirIndex::new(1023);

/// Index into the page directory (virtual address bits 22..=31).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DirIndex(u16);

impl DirIndex {
    #[inline]
    #[must_use]
    pub const fn new(index: u16) -> Self {
        debug_assert!((index as usize) < ENTRY_COUNT);
        Self(index)
    }

    /// Slot covering `va`.
    #[inline]
    #[must_use]
    pub const fn of(va: VirtAddr) -> Self {
        Self(((va.as_usize() >> 22) & 0x3FF) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Base of the 4 MiB virtual span this slot covers.
    #[inline]
    #[must_use]
    pub const fn span_base(self) -> VirtAddr {
        VirtAddr::new(self.as_usize() << 22)
    }

    /// All 1024 slots, in order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..ENTRY_COUNT as u16).map(Self::new)
    }
}

impl fmt::Debug for DirIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DirIndex({})", self.0)
    }
}

/// Index into a page table (virtual address bits 12..=21).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    #[inline]
    #[must_use]
    pub const fn new(index: u16) -> Self {
        debug_assert!((index as usize) < ENTRY_COUNT);
        Self(index)
    }

    /// Slot covering `va`.
    #[inline]
    #[must_use]
    pub const fn of(va: VirtAddr) -> Self {
        Self(((va.as_usize() >> PAGE_SHIFT) & 0x3FF) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..ENTRY_COUNT as u16).map(Self::new)
    }
}

impl fmt::Debug for TableIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableIndex({})", self.0)
    }
}

/// A page table: 1024 leaf entries covering 4 MiB.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; ENTRY_COUNT],
}

impl PageTable {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntry::new(); ENTRY_COUNT],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: TableIndex) -> PageEntry {
        self.entries[index.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, index: TableIndex, entry: PageEntry) {
        self.entries[index.as_usize()] = entry;
    }

    /// Number of present leaf entries.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.present()).count()
    }
}

/// A page directory: 1024 entries, each covering 4 MiB via a page table.
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PageEntry; ENTRY_COUNT],
}

impl PageDirectory {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntry::new(); ENTRY_COUNT],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: DirIndex) -> PageEntry {
        self.entries[index.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, index: DirIndex, entry: PageEntry) {
        self.entries[index.as_usize()] = entry;
    }
}

const _: () = {
    assert!(size_of::<PageTable>() == PAGE_SIZE);
    assert!(size_of::<PageDirectory>() == PAGE_SIZE);
    assert!(align_of::<PageTable>() == PAGE_SIZE);
};
