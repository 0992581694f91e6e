use bitfield_struct::bitfield;
use mm_addr::{PAGE_SHIFT, PhysAddr};

/// One 32-bit x86 page-table entry in its raw bitfield form.
///
/// The same layout serves both levels: in the page directory an entry points
/// at a page table, in a page table it maps a 4 KiB frame.
///
/// ### Bit layout
///
/// | Bits  | Name      | Meaning |
/// |-------|-----------|----------|
/// | 0     | `P`       | Valid entry if set |
/// | 1     | `RW`      | Writable if set |
/// | 2     | `US`      | User-mode accessible if set |
/// | 3     | `PWT`     | Write-through caching |
/// | 4     | `PCD`     | Disable caching |
/// | 5     | `A`       | Accessed |
/// | 6     | `D`       | Dirty (leaf only) |
/// | 7     | `PS`/`PAT`| Page size in the directory, PAT in a leaf |
/// | 8     | `G`       | Global (leaf only) |
/// | 9–11  | avail     | Free for OS use |
/// | 12–31 | `addr`    | Physical frame bits [31:12] |
///
/// The physical address field omits the low 12 bits, which are implicitly
/// zero due to frame alignment.
#[bitfield(u32)]
pub struct PageEntry {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Deliberately survives [`unmap`](crate::AddressSpace::unmap): a
    /// removed mapping keeps its old permission bits with `P` clear.
    pub writable: bool,

    /// User/Supervisor (US, bit 2). Set to allow user-mode access.
    pub user: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU, cleared by software.
    pub accessed: bool,

    /// Dirty (D, bit 6), leaf entries only.
    pub dirty: bool,

    /// PS in a directory entry (4 MiB pages, unused here), PAT in a leaf.
    pub large: bool,

    /// Global (G, bit 8), leaf entries only.
    pub global: bool,

    /// OS-available bits 9..=11; hardware does not interpret these.
    #[bits(3)]
    pub avail: u8,

    /// Physical frame bits [31:12].
    #[bits(20)]
    frame: u32,
}

impl PageEntry {
    /// Store a frame-aligned physical address in the entry.
    #[inline]
    #[allow(clippy::cast_possible_truncation)] // 32-bit physical space
    pub const fn set_frame_addr(&mut self, pa: PhysAddr) {
        debug_assert!(pa.is_page_aligned());
        self.set_frame((pa.as_usize() >> PAGE_SHIFT) as u32);
    }

    /// The physical frame this entry refers to.
    #[inline]
    #[must_use]
    pub const fn frame_addr(&self) -> PhysAddr {
        PhysAddr::new((self.frame() as usize) << PAGE_SHIFT)
    }

    /// Builder form of [`set_frame_addr`](Self::set_frame_addr).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // 32-bit physical space
    pub const fn with_frame_addr(self, pa: PhysAddr) -> Self {
        debug_assert!(pa.is_page_aligned());
        self.with_frame((pa.as_usize() >> PAGE_SHIFT) as u32)
    }

    /// A directory entry pointing at the page table in `frame`.
    ///
    /// Tables are always installed writable and supervisor-only; leaf
    /// entries carry the caller's permissions.
    #[inline]
    #[must_use]
    pub const fn table_link(frame: PhysAddr) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_frame_addr(frame)
    }

    /// A leaf entry mapping `frame` with the given permissions.
    #[inline]
    #[must_use]
    pub fn leaf(frame: PhysAddr, flags: PageFlags) -> Self {
        flags
            .apply_to(Self::new().with_present(true))
            .with_frame_addr(frame)
    }

    /// The caller-facing permission set of this entry.
    #[inline]
    #[must_use]
    pub fn page_flags(&self) -> PageFlags {
        let mut flags = PageFlags::empty();
        flags.set(PageFlags::WRITABLE, self.writable());
        flags.set(PageFlags::USER, self.user());
        flags.set(PageFlags::WRITE_THROUGH, self.write_through());
        flags.set(PageFlags::NO_CACHE, self.cache_disabled());
        flags.set(PageFlags::GLOBAL, self.global());
        flags
    }
}

bitflags::bitflags! {
    /// Permissions a caller may request for a mapping.
    ///
    /// Everything else in [`PageEntry`] (present, accessed, dirty) is owned
    /// by the paging code or the hardware.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct PageFlags: u32 {
        const WRITABLE      = 1 << 0;
        const USER          = 1 << 1;
        const WRITE_THROUGH = 1 << 2;
        const NO_CACHE      = 1 << 3;
        const GLOBAL        = 1 << 4;
    }
}

impl PageFlags {
    /// Kernel read/write data, the common case.
    pub const KERNEL_RW: Self = Self::WRITABLE;

    fn apply_to(self, entry: PageEntry) -> PageEntry {
        entry
            .with_writable(self.contains(Self::WRITABLE))
            .with_user(self.contains(Self::USER))
            .with_write_through(self.contains(Self::WRITE_THROUGH))
            .with_cache_disabled(self.contains(Self::NO_CACHE))
            .with_global(self.contains(Self::GLOBAL))
    }
}
