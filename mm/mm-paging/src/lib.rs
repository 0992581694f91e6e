//! # Two-level x86 paging structures
//!
//! Builds and manipulates a single 32-bit address space: a page directory
//! whose 1024 slots each cover 4 MiB through a page table of 1024 leaf
//! entries. The directory's last slot always maps the directory itself,
//! so once paging is on every structure is reachable at a fixed virtual
//! window ([`window`]).
//!
//! ## Design
//!
//! - [`AddressSpace`] is plain data (root frame + [`AccessMode`]); the three
//!   collaborators are passed per call so the kernel can wire hardware
//!   implementations while tests substitute an arena:
//!   [`TableAccess`] reaches directory/table frames, [`Mmu`] is the
//!   translation hardware, [`TableFrames`] supplies frame storage.
//! - The pre-paging/post-paging duality is the explicit
//!   [`AccessMode`](mm_addr::AccessMode) state carried by the space and
//!   handed to every [`TableAccess`] call; the transition happens exactly
//!   once, in [`AddressSpace::enable_paging`].
//! - Mapping an already-mapped page is a caller error ([`MapError`]), not a
//!   remap; unmapping an unmapped page is a no-op.
//!
//! ## Safety
//!
//! Mutating mappings of a live address space requires TLB maintenance; the
//! operations here invalidate through the [`Mmu`] themselves. The
//! [`TableAccess`] implementation must hand out references to real,
//! exclusively-owned table frames.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod entry;
mod space;
mod table;
pub mod window;

pub use entry::{PageEntry, PageFlags};
pub use space::{AddressSpace, MapError};
pub use table::{DirIndex, ENTRY_COUNT, PageDirectory, PageTable, RECURSIVE_SLOT, TableIndex};

use mm_addr::{AccessMode, PhysAddr, VirtAddr};

/// The translation hardware, as far as this subsystem needs it.
///
/// The kernel implements this with privileged register access; tests record
/// the calls.
pub trait Mmu {
    /// Install `root` as the active page directory.
    fn load_root(&self, root: PhysAddr);

    /// Invalidate the cached translation of one page.
    fn flush(&self, va: VirtAddr);

    /// Invalidate all non-global cached translations.
    fn flush_all(&self);

    /// Turn paging on.
    ///
    /// # Safety
    ///
    /// The directory loaded via [`load_root`](Self::load_root) must map the
    /// currently-executing code, or the machine is gone.
    unsafe fn enable_paging_mode(&self);

    /// The address that caused the most recent page fault.
    fn faulting_address(&self) -> VirtAddr;
}

/// How directory and table frames are reached in memory.
///
/// The hardware implementation dereferences the physical address directly in
/// [`AccessMode::Physical`] and goes through the recursive window in
/// [`AccessMode::Mapped`]; the test implementation resolves into an arena.
pub trait TableAccess {
    /// Reach the page directory rooted at `root`.
    ///
    /// # Safety
    ///
    /// `root` must be a live directory frame owned by the caller; the
    /// returned reference must not outlive that ownership.
    unsafe fn directory_mut<'t>(&self, mode: AccessMode, root: PhysAddr) -> &'t mut PageDirectory;

    /// Reach the page table installed at directory slot `slot`.
    ///
    /// # Safety
    ///
    /// As for [`directory_mut`](Self::directory_mut); additionally, in
    /// `Mapped` mode the table must actually be installed at `slot` of the
    /// active directory, since that is where the window looks.
    unsafe fn table_mut<'t>(&self, mode: AccessMode, slot: DirIndex, table: PhysAddr)
    -> &'t mut PageTable;
}

/// Storage source for paging structures.
///
/// Frames handed out must be zeroed; the frame allocator zero-fills on
/// allocation, so a fresh table carries no stray mappings.
pub trait TableFrames {
    /// One zeroed frame for a new directory or table. Fatal on exhaustion.
    fn allocate_table_frame(&self) -> PhysAddr;

    /// Return a frame no longer referenced by any paging structure.
    fn release_table_frame(&self, frame: PhysAddr);
}
