//! The hardware machine: privileged register access, the recursive window,
//! and the scratch page.
//!
//! Everything here is a thin, unsynchronized wrapper over the CPU; the
//! locking discipline lives with the callers (domains and the frame
//! allocator hold their own locks around these calls).

use core::arch::asm;

use mm_addr::{AccessMode, PhysAddr, VirtAddr};
use mm_frame::PhysAccess;
use mm_info::layout::SCRATCH_PAGE;
use mm_paging::{DirIndex, Mmu, PageDirectory, PageEntry, PageFlags, PageTable, TableAccess, window};

/// The real x86: raw pointers before paging, the recursive window and the
/// scratch page after.
#[derive(Clone, Copy, Debug, Default)]
pub struct X86Machine;

impl PhysAccess for X86Machine {
    unsafe fn with_frame<R>(
        &self,
        mode: AccessMode,
        frame: PhysAddr,
        f: impl FnOnce(*mut u8) -> R,
    ) -> R {
        match mode {
            AccessMode::Physical => f(frame.as_usize() as *mut u8),
            AccessMode::Mapped => {
                let scratch = VirtAddr::new(SCRATCH_PAGE);
                let entry = window::entry_va(scratch).as_mut_ptr::<PageEntry>();
                // SAFETY: the scratch slot's page table was installed before
                // paging went live, so its PTE is reachable through the
                // window. Volatile, because the MMU reads behind our back.
                let previous = unsafe { entry.read_volatile() };
                unsafe { entry.write_volatile(PageEntry::leaf(frame, PageFlags::KERNEL_RW)) };
                self.flush(scratch);

                let result = f(scratch.as_mut_ptr());

                // SAFETY: same PTE as above.
                unsafe { entry.write_volatile(previous) };
                self.flush(scratch);
                result
            }
        }
    }
}

impl TableAccess for X86Machine {
    unsafe fn directory_mut<'t>(&self, mode: AccessMode, root: PhysAddr) -> &'t mut PageDirectory {
        let ptr: *mut PageDirectory = match mode {
            AccessMode::Physical => root.as_usize() as *mut PageDirectory,
            AccessMode::Mapped => window::directory_va().as_mut_ptr(),
        };
        // SAFETY: forwarded from the trait contract; in `Mapped` mode only
        // the active directory is ever asked for.
        unsafe { &mut *ptr }
    }

    unsafe fn table_mut<'t>(
        &self,
        mode: AccessMode,
        slot: DirIndex,
        table: PhysAddr,
    ) -> &'t mut PageTable {
        let ptr: *mut PageTable = match mode {
            AccessMode::Physical => table.as_usize() as *mut PageTable,
            AccessMode::Mapped => window::table_va(slot).as_mut_ptr(),
        };
        // SAFETY: forwarded from the trait contract.
        unsafe { &mut *ptr }
    }
}

impl Mmu for X86Machine {
    fn load_root(&self, root: PhysAddr) {
        // SAFETY: register write; the caller decides when a new directory
        // becomes active.
        unsafe {
            asm!("mov cr3, {}", in(reg) root.as_usize(), options(nostack, preserves_flags));
        }
    }

    fn flush(&self, va: VirtAddr) {
        // SAFETY: invalidates one TLB entry, no memory effects.
        unsafe {
            asm!("invlpg [{}]", in(reg) va.as_usize(), options(nostack, preserves_flags));
        }
    }

    fn flush_all(&self) {
        // Reloading CR3 drops every non-global translation.
        // SAFETY: writes back the value just read.
        unsafe {
            let cr3: usize;
            asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
            asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }

    unsafe fn enable_paging_mode(&self) {
        // CR0.PG (bit 31) together with CR0.WP (bit 16) so supervisor code
        // honors read-only pages.
        // SAFETY: forwarded from the trait contract.
        unsafe {
            let mut cr0: usize;
            asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
            cr0 |= (1 << 31) | (1 << 16);
            asm!("mov cr0, {}", in(reg) cr0, options(nostack, preserves_flags));
        }
    }

    fn faulting_address(&self) -> VirtAddr {
        let cr2: usize;
        // SAFETY: register read.
        unsafe {
            asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
        }
        VirtAddr::new(cr2)
    }
}
