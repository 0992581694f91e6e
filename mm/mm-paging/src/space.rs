use log::debug;
use mm_addr::{AccessMode, PAGE_SHIFT, PhysAddr, VirtAddr};

use crate::entry::{PageEntry, PageFlags};
use crate::table::{DirIndex, PageDirectory, PageTable, RECURSIVE_SLOT, TableIndex};
use crate::window;
use crate::{Mmu, TableAccess, TableFrames};

/// Mapping requests that the caller got wrong.
///
/// Everything else (out of frames, corrupted structures) is fatal and does
/// not come back as a value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    /// The leaf entry for this page is already present.
    #[error("virtual page is already mapped")]
    AlreadyMapped,
}

/// One address space: a two-level tree rooted at a page directory.
///
/// Plain data; every operation takes the collaborators it needs. The owning
/// protection domain provides locking.
pub struct AddressSpace {
    root: PhysAddr,
    mode: AccessMode,
}

impl AddressSpace {
    /// Allocate a directory and wire its recursive slot.
    ///
    /// Spaces are built before activation, in [`AccessMode::Physical`].
    pub fn new(frames: &impl TableFrames, access: &impl TableAccess) -> Self {
        let root = frames.allocate_table_frame();
        let space = Self {
            root,
            mode: AccessMode::Physical,
        };
        // SAFETY: the frame was just allocated for this directory.
        let dir = unsafe { access.directory_mut(space.mode, root) };
        dir.set(RECURSIVE_SLOT, PageEntry::table_link(root));
        space
    }

    /// Physical frame of the page directory.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysAddr {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn mode(&self) -> AccessMode {
        self.mode
    }

    fn directory<'t>(&self, access: &impl TableAccess) -> &'t mut PageDirectory {
        // SAFETY: `root` stays a live directory frame for the life of the space.
        unsafe { access.directory_mut(self.mode, self.root) }
    }

    fn existing_table<'t>(
        &self,
        access: &impl TableAccess,
        va: VirtAddr,
    ) -> Option<&'t mut PageTable> {
        let slot = DirIndex::of(va);
        let entry = self.directory(access).get(slot);
        if !entry.present() {
            return None;
        }
        // SAFETY: a present directory entry references a live table frame.
        Some(unsafe { access.table_mut(self.mode, slot, entry.frame_addr()) })
    }

    fn ensure_table<'t>(
        &self,
        access: &impl TableAccess,
        mmu: &impl Mmu,
        frames: &impl TableFrames,
        va: VirtAddr,
    ) -> &'t mut PageTable {
        let slot = DirIndex::of(va);
        let dir = self.directory(access);
        let entry = dir.get(slot);
        if entry.present() {
            // SAFETY: as in `existing_table`.
            return unsafe { access.table_mut(self.mode, slot, entry.frame_addr()) };
        }

        let frame = frames.allocate_table_frame();
        dir.set(slot, PageEntry::table_link(frame));
        // The window page for this slot just changed meaning; drop the stale
        // translation before the table is touched through it.
        mmu.flush(window::table_va(slot));
        // SAFETY: freshly allocated, just installed.
        unsafe { access.table_mut(self.mode, slot, frame) }
    }

    /// The page table covering `va`, creating it when `create` is set.
    ///
    /// A created table is installed present and writable; the frame arrives
    /// zeroed from [`TableFrames`], so it carries no mappings.
    pub fn page_table<'t>(
        &self,
        access: &impl TableAccess,
        mmu: &impl Mmu,
        frames: &impl TableFrames,
        va: VirtAddr,
        create: bool,
    ) -> Option<&'t mut PageTable> {
        if create {
            Some(self.ensure_table(access, mmu, frames, va))
        } else {
            self.existing_table(access, va)
        }
    }

    /// Install a leaf mapping `va -> pa`.
    ///
    /// # Errors
    ///
    /// [`MapError::AlreadyMapped`] when the leaf is present; the existing
    /// mapping is left untouched.
    pub fn map(
        &self,
        access: &impl TableAccess,
        mmu: &impl Mmu,
        frames: &impl TableFrames,
        va: VirtAddr,
        pa: PhysAddr,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        debug_assert!(va.is_page_aligned());
        debug_assert!(pa.is_page_aligned());

        let table = self.ensure_table(access, mmu, frames, va);
        let index = TableIndex::of(va);
        if table.get(index).present() {
            return Err(MapError::AlreadyMapped);
        }
        table.set(index, PageEntry::leaf(pa, flags));
        mmu.flush(va);
        Ok(())
    }

    /// Remove the leaf mapping of `va`, if any.
    ///
    /// Clears only the present bit; the other bits (notably writable) stay
    /// behind. No-op when neither table nor leaf exists, so unmapping twice
    /// is fine.
    pub fn unmap(&self, access: &impl TableAccess, mmu: &impl Mmu, va: VirtAddr) {
        let Some(table) = self.existing_table(access, va) else {
            return;
        };
        let index = TableIndex::of(va);
        let mut entry = table.get(index);
        if !entry.present() {
            return;
        }
        entry.set_present(false);
        table.set(index, entry);
        mmu.flush(va);
    }

    /// Whether `va` currently translates.
    #[must_use]
    pub fn is_mapped(&self, access: &impl TableAccess, va: VirtAddr) -> bool {
        self.mapping_of(access, va).is_some()
    }

    /// Frame and permissions behind `va`'s page, if mapped.
    #[must_use]
    pub fn mapping_of(
        &self,
        access: &impl TableAccess,
        va: VirtAddr,
    ) -> Option<(PhysAddr, PageFlags)> {
        let table = self.existing_table(access, va)?;
        let entry = table.get(TableIndex::of(va));
        if !entry.present() {
            return None;
        }
        Some((entry.frame_addr(), entry.page_flags()))
    }

    /// Log every present mapping at debug level.
    pub fn dump(&self, access: &impl TableAccess) {
        debug!("address space root {:?}, {:?}", self.root, self.mode);
        let dir = self.directory(access);
        for slot in DirIndex::all() {
            let entry = dir.get(slot);
            if !entry.present() {
                continue;
            }
            if slot == RECURSIVE_SLOT {
                debug!("  [{:4}] recursive", slot.as_usize());
                continue;
            }
            // SAFETY: present directory entries reference live tables.
            let table = unsafe { access.table_mut(self.mode, slot, entry.frame_addr()) };
            debug!(
                "  [{:4}] table {:?}, {} pages",
                slot.as_usize(),
                entry.frame_addr(),
                table.present_count()
            );
            for index in TableIndex::all() {
                let leaf = table.get(index);
                if leaf.present() {
                    let va = VirtAddr::new(
                        slot.span_base().as_usize() + (index.as_usize() << PAGE_SHIFT),
                    );
                    debug!("    {:?} -> {:?} {:?}", va, leaf.frame_addr(), leaf.page_flags());
                }
            }
        }
    }

    /// Return every table frame, and the directory itself, to `frames`.
    ///
    /// Leaf target frames are not touched; they belong to whoever mapped
    /// them. The space must no longer be active on any hardware thread.
    pub fn release_tables(&self, access: &impl TableAccess, frames: &impl TableFrames) {
        let dir = self.directory(access);
        for slot in DirIndex::all() {
            if slot == RECURSIVE_SLOT {
                continue;
            }
            let entry = dir.get(slot);
            if entry.present() {
                frames.release_table_frame(entry.frame_addr());
            }
        }
        frames.release_table_frame(self.root);
    }

    /// Make this space the active one and turn paging on.
    ///
    /// One-way: the space moves to [`AccessMode::Mapped`] and all further
    /// structure access goes through the recursive window.
    ///
    /// # Panics
    ///
    /// When paging was already enabled for this space.
    ///
    /// # Safety
    ///
    /// The directory must map the currently-executing code and stack, and
    /// the [`TableAccess`] used afterwards must resolve through the window.
    pub unsafe fn enable_paging(&mut self, mmu: &impl Mmu) {
        assert!(
            self.mode.is_physical(),
            "paging was already enabled for this space"
        );
        mmu.load_root(self.root);
        // SAFETY: forwarded contract.
        unsafe { mmu.enable_paging_mode() };
        self.mode = AccessMode::Mapped;
    }
}
