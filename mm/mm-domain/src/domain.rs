use log::{debug, info, trace};
use mm_addr::{PhysAddr, VirtAddr};
use mm_frame::FrameAllocator;
use mm_info::layout;
use mm_paging::{AddressSpace, MapError, PageFlags};
use mm_sync::SpinLock;

use crate::Machine;
use crate::escrow::{EscrowFrame, TableSource};
use crate::rights::AccessRights;
use crate::stretch::{Stretch, StretchError, StretchTable};

/// An address space plus the policy state wrapped around it.
///
/// All mutation of the owned paging structures happens under the domain's
/// spin lock; the frame allocator is never called while it is held (see
/// the crate docs on the escrow rule).
pub struct ProtectionDomain {
    privileged: bool,
    inner: SpinLock<DomainInner>,
}

struct DomainInner {
    space: AddressSpace,
    stretches: StretchTable,
}

impl ProtectionDomain {
    pub(crate) fn build<M: Machine>(
        machine: &M,
        frames: &FrameAllocator,
        privileged: bool,
    ) -> Self {
        let source = TableSource::new(frames, machine);
        let space = AddressSpace::new(&source, machine);
        debug!(
            "created {} domain, root {:?}",
            if privileged { "privileged" } else { "user" },
            space.root()
        );
        Self {
            privileged,
            inner: SpinLock::new(DomainInner {
                space,
                stretches: StretchTable::new(),
            }),
        }
    }

    /// A fresh non-privileged domain: an empty directory with only the
    /// recursive slot wired.
    pub fn create<M: Machine>(machine: &M, frames: &FrameAllocator) -> Self {
        Self::build(machine, frames, false)
    }

    #[inline]
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Physical frame of this domain's page directory.
    #[must_use]
    pub fn root(&self) -> PhysAddr {
        self.inner.with_lock(|inner| inner.space.root())
    }

    /// Turn paging on with this domain's directory active.
    ///
    /// Before the switch, the page table for the scratch slot is created so
    /// that post-paging frame access never has to allocate structure. The
    /// frame allocator is moved to mapped access right after.
    ///
    /// # Panics
    ///
    /// When called on a non-privileged domain, or a second time.
    ///
    /// # Safety
    ///
    /// The domain must map the currently-executing code and stack; this is
    /// the boot path's responsibility and nothing here can check it.
    pub unsafe fn enable_paging<M: Machine>(&self, machine: &M, frames: &FrameAllocator) {
        assert!(self.privileged, "only the privileged domain enables paging");
        let escrow = EscrowFrame::new(frames, machine);
        self.inner.with_lock(|inner| {
            // The scratch slot's table must exist before the window becomes
            // the only way at physical memory.
            let _ = inner.space.page_table(
                machine,
                machine,
                &escrow,
                VirtAddr::new(layout::SCRATCH_PAGE),
                true,
            );
            // SAFETY: forwarded contract.
            unsafe { inner.space.enable_paging(machine) };
        });
        frames.note_paging_enabled();
        info!("paging enabled, directory {:?}", self.root());
    }

    /// Map the frame at `pa` to the page at `va`.
    ///
    /// # Errors
    ///
    /// [`MapError::AlreadyMapped`] when `va` already translates; the
    /// existing mapping is untouched and the escrow frame goes back.
    pub fn map<M: Machine>(
        &self,
        machine: &M,
        frames: &FrameAllocator,
        pa: PhysAddr,
        va: VirtAddr,
        flags: PageFlags,
    ) -> Result<(), MapError> {
        let escrow = EscrowFrame::new(frames, machine);
        let result = self
            .inner
            .with_lock(|inner| inner.space.map(machine, machine, &escrow, va, pa, flags));
        if result.is_ok() {
            trace!("map {va:?} -> {pa:?}");
        }
        result
    }

    /// Remove the mapping of `va`; a no-op when nothing is mapped there.
    pub fn unmap<M: Machine>(&self, machine: &M, va: VirtAddr) {
        trace!("unmap {va:?}");
        self.inner
            .with_lock(|inner| inner.space.unmap(machine, machine, va));
    }

    #[must_use]
    pub fn is_mapped<M: Machine>(&self, machine: &M, va: VirtAddr) -> bool {
        self.inner.with_lock(|inner| inner.space.is_mapped(machine, va))
    }

    /// Frame and flags behind `va`, if mapped.
    #[must_use]
    pub fn mapping_of<M: Machine>(
        &self,
        machine: &M,
        va: VirtAddr,
    ) -> Option<(PhysAddr, PageFlags)> {
        self.inner
            .with_lock(|inner| inner.space.mapping_of(machine, va))
    }

    /// Log this domain's mappings and stretches at debug level.
    pub fn dump<M: Machine>(&self, machine: &M) {
        self.inner.with_lock(|inner| {
            inner.space.dump(machine);
            for stretch in inner.stretches.iter() {
                debug!(
                    "  stretch {:?}+0x{:X} {:?}",
                    stretch.base, stretch.size, stretch.rights
                );
            }
        });
    }

    /// Reserve a virtual range in this domain.
    ///
    /// With no `base` the lowest fitting gap is chosen; `Some(base)` is an
    /// exact placement. Non-privileged domains draw from the user span,
    /// the privileged domain from the kernel half.
    ///
    /// # Errors
    ///
    /// [`StretchError::RangeTaken`] for an occupied exact placement,
    /// [`StretchError::NoSpace`] when no gap fits (or an exact request
    /// falls outside the domain's span), [`StretchError::TableFull`] when
    /// the per-domain stretch limit is hit.
    ///
    /// # Panics
    ///
    /// When `size` is zero.
    pub fn allocate_stretch(
        &self,
        size: usize,
        rights: AccessRights,
        base: Option<VirtAddr>,
    ) -> Result<Stretch, StretchError> {
        let span = self.stretch_span();
        let stretch = self
            .inner
            .with_lock(|inner| inner.stretches.allocate(span, size, rights, base))?;
        debug!("stretch {:?}+0x{:X} {:?}", stretch.base, stretch.size, stretch.rights);
        Ok(stretch)
    }

    /// Drop the stretch starting at `base`. Returns whether one existed.
    ///
    /// Mappings inside the range are not touched; the caller unmaps what
    /// it mapped.
    pub fn release_stretch(&self, base: VirtAddr) -> bool {
        let removed = self.inner.with_lock(|inner| inner.stretches.remove(base));
        if let Some(stretch) = &removed {
            debug!("released stretch {:?}+0x{:X}", stretch.base, stretch.size);
        }
        removed.is_some()
    }

    /// Tear the domain down, returning its directory and table frames to
    /// the allocator.
    ///
    /// Frames mapped *into* the domain are untouched; whoever installed
    /// those mappings owns them.
    ///
    /// # Panics
    ///
    /// When asked to destroy the privileged domain.
    pub fn destroy<M: Machine>(self, machine: &M, frames: &FrameAllocator) {
        assert!(!self.privileged, "the privileged domain is never destroyed");
        let mut inner = self.inner;
        let inner = inner.get_mut();
        let root = inner.space.root();
        let source = TableSource::new(frames, machine);
        inner.space.release_tables(machine, &source);
        debug!("destroyed domain, root was {root:?}");
    }

    const fn stretch_span(&self) -> (usize, usize) {
        if self.privileged {
            (layout::KERNEL_SPACE_BASE, layout::KERNEL_SPACE_END)
        } else {
            (layout::USER_SPACE_BASE, layout::USER_SPACE_END)
        }
    }
}
