//! # Recursive window address math
//!
//! With the directory's last slot mapping the directory itself, every paging
//! structure appears at a fixed virtual location once paging is enabled:
//! the table serving directory slot `i` at `WINDOW_BASE + i * 4096`, and the
//! directory (slot 1023 of the window) at the very last page. These are pure
//! functions of the recursive-slot constant; nothing here touches memory.

use mm_addr::{PAGE_SHIFT, VirtAddr};

use crate::entry::PageEntry;
use crate::table::{DirIndex, RECURSIVE_SLOT, TableIndex};

/// First address of the 4 MiB window; equals `RECURSIVE_SLOT << 22`.
pub const WINDOW_BASE: usize = RECURSIVE_SLOT.as_usize() << 22;

/// Virtual address of the page table serving directory slot `slot`.
#[inline]
#[must_use]
pub const fn table_va(slot: DirIndex) -> VirtAddr {
    VirtAddr::new(WINDOW_BASE + (slot.as_usize() << PAGE_SHIFT))
}

/// Virtual address of the page directory itself.
#[inline]
#[must_use]
pub const fn directory_va() -> VirtAddr {
    table_va(RECURSIVE_SLOT)
}

/// Virtual address of the leaf entry translating `va`.
///
/// Used by the scratch-page dance: rewriting this one entry retargets the
/// translation of `va` without walking anything.
#[inline]
#[must_use]
pub const fn entry_va(va: VirtAddr) -> VirtAddr {
    let table = table_va(DirIndex::of(va));
    VirtAddr::new(table.as_usize() + TableIndex::of(va).as_usize() * size_of::<PageEntry>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_occupies_the_top_slot() {
        assert_eq!(WINDOW_BASE, 0xFFC0_0000);
        assert_eq!(table_va(DirIndex::new(0)), VirtAddr::new(0xFFC0_0000));
        assert_eq!(table_va(DirIndex::new(1)), VirtAddr::new(0xFFC0_1000));
        assert_eq!(directory_va(), VirtAddr::new(0xFFFF_F000));
    }

    #[test]
    fn entry_va_selects_the_exact_pte() {
        // va 0x0040_3000: directory slot 1, table index 3
        let va = VirtAddr::new(0x0040_3000);
        assert_eq!(entry_va(va), VirtAddr::new(0xFFC0_1000 + 3 * 4));

        // the directory's own recursive entry
        let last = VirtAddr::new(0xFFFF_F000);
        assert_eq!(entry_va(last), VirtAddr::new(0xFFFF_F000 + 1023 * 4));
    }
}
