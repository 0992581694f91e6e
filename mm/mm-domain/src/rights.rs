use mm_paging::PageFlags;

bitflags::bitflags! {
    /// What the holder of a stretch may do with pages mapped inside it.
    ///
    /// Rights are the caller-facing policy vocabulary; they translate to
    /// hardware [`PageFlags`] when a mapping is installed. Reads and
    /// instruction fetches cannot be forbidden by this hardware
    /// generation, so `READ` and `EXECUTE` are advisory.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct AccessRights: u32 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const EXECUTE = 1 << 2;
        const USER    = 1 << 3;
    }
}

impl AccessRights {
    /// Kernel-internal read/write data.
    pub const KERNEL_RW: Self = Self::READ.union(Self::WRITE);

    /// The page-entry flags implementing these rights.
    #[must_use]
    pub fn page_flags(self) -> PageFlags {
        let mut flags = PageFlags::empty();
        flags.set(PageFlags::WRITABLE, self.contains(Self::WRITE));
        flags.set(PageFlags::USER, self.contains(Self::USER));
        flags
    }
}
