//! Stretches: named virtual ranges reserved inside a domain.
//!
//! A stretch only reserves address space; pages inside it are mapped (or
//! not) separately. The table is a fixed array because stretches are few
//! and the kernel heap is not available this early.

use mm_addr::{PAGE_SIZE, VirtAddr, align_up};

use crate::rights::AccessRights;

/// Upper bound on live stretches per domain.
pub const MAX_STRETCHES: usize = 64;

/// A reserved virtual range and the rights it was granted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Stretch {
    pub base: VirtAddr,
    pub size: usize,
    pub rights: AccessRights,
}

impl Stretch {
    /// First address past the stretch.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtAddr {
        VirtAddr::new(self.base.as_usize() + self.size)
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtAddr) -> bool {
        va.as_usize() >= self.base.as_usize() && va.as_usize() < self.end().as_usize()
    }
}

/// Stretch requests the caller got wrong; all recoverable.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum StretchError {
    /// An exactly-placed request overlaps an existing stretch.
    #[error("virtual range is already taken")]
    RangeTaken,
    /// No gap in the domain's span fits the request.
    #[error("no free virtual range of the requested size")]
    NoSpace,
    /// The fixed stretch table is out of slots.
    #[error("stretch table is full")]
    TableFull,
}

pub(crate) struct StretchTable {
    slots: [Option<Stretch>; MAX_STRETCHES],
}

impl StretchTable {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_STRETCHES],
        }
    }

    fn conflict(&self, base: usize, size: usize) -> Option<Stretch> {
        self.slots
            .iter()
            .flatten()
            .find(|s| base < s.end().as_usize() && s.base.as_usize() < base + size)
            .copied()
    }

    fn insert(&mut self, stretch: Stretch) -> Result<(), StretchError> {
        for slot in &mut self.slots {
            if slot.is_none() {
                *slot = Some(stretch);
                return Ok(());
            }
        }
        Err(StretchError::TableFull)
    }

    /// Reserve a range within `span`.
    ///
    /// With no `base` the lowest gap large enough wins. `Some(base)` is an
    /// exact placement that fails if anything in `[base, base + size)` is
    /// taken.
    ///
    /// # Panics
    ///
    /// When `size` is zero.
    pub fn allocate(
        &mut self,
        span: (usize, usize),
        size: usize,
        rights: AccessRights,
        base: Option<VirtAddr>,
    ) -> Result<Stretch, StretchError> {
        assert!(size > 0, "empty stretch");
        let size = align_up(size, PAGE_SIZE);
        let (lo, hi) = span;

        let base = if let Some(base) = base {
            debug_assert!(base.is_page_aligned());
            let wanted = base.as_usize();
            if wanted < lo || wanted + size > hi {
                return Err(StretchError::NoSpace);
            }
            if self.conflict(wanted, size).is_some() {
                return Err(StretchError::RangeTaken);
            }
            wanted
        } else {
            let mut candidate = lo;
            loop {
                if candidate + size > hi {
                    return Err(StretchError::NoSpace);
                }
                // Stretch ends are page aligned, so the bumped candidate
                // stays aligned too.
                match self.conflict(candidate, size) {
                    None => break candidate,
                    Some(taken) => candidate = taken.end().as_usize(),
                }
            }
        };

        let stretch = Stretch {
            base: VirtAddr::new(base),
            size,
            rights,
        };
        self.insert(stretch)?;
        Ok(stretch)
    }

    /// Drop the stretch starting at `base`, returning it if it existed.
    pub fn remove(&mut self, base: VirtAddr) -> Option<Stretch> {
        self.slots
            .iter_mut()
            .find(|slot| slot.is_some_and(|s| s.base == base))
            .and_then(Option::take)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stretch> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPAN: (usize, usize) = (0x10_0000, 0x20_0000);

    fn table() -> StretchTable {
        StretchTable::new()
    }

    #[test]
    fn exact_placement_and_conflict() {
        let mut t = table();
        let s = t
            .allocate(SPAN, 0x3000, AccessRights::KERNEL_RW, Some(VirtAddr::new(0x10_0000)))
            .unwrap();
        assert_eq!(s.base, VirtAddr::new(0x10_0000));
        assert_eq!(s.size, 0x3000);

        // Overlapping even by one page is refused.
        let err = t
            .allocate(SPAN, 0x1000, AccessRights::KERNEL_RW, Some(VirtAddr::new(0x10_2000)))
            .unwrap_err();
        assert_eq!(err, StretchError::RangeTaken);

        // Adjacent is fine.
        assert!(
            t.allocate(SPAN, 0x1000, AccessRights::KERNEL_RW, Some(VirtAddr::new(0x10_3000)))
                .is_ok()
        );
    }

    #[test]
    fn first_fit_skips_taken_ranges() {
        let mut t = table();
        t.allocate(SPAN, 0x2000, AccessRights::KERNEL_RW, Some(VirtAddr::new(0x10_1000)))
            .unwrap();

        // The gap below the taken range is too small for 2 pages, so the
        // request lands just past it.
        let s = t
            .allocate(SPAN, 0x2000, AccessRights::KERNEL_RW, None)
            .unwrap();
        assert_eq!(s.base, VirtAddr::new(0x10_3000));

        // A single page fits in the low gap.
        let s = t
            .allocate(SPAN, 0x1000, AccessRights::KERNEL_RW, None)
            .unwrap();
        assert_eq!(s.base, VirtAddr::new(0x10_0000));
    }

    #[test]
    fn sizes_round_up_to_pages() {
        let mut t = table();
        let s = t
            .allocate(SPAN, 100, AccessRights::KERNEL_RW, None)
            .unwrap();
        assert_eq!(s.size, 0x1000);
        assert!(s.contains(VirtAddr::new(0x10_0FFF)));
        assert!(!s.contains(VirtAddr::new(0x10_1000)));
    }

    #[test]
    fn span_exhaustion_is_an_error() {
        let mut t = table();
        t.allocate(SPAN, 0x10_0000, AccessRights::KERNEL_RW, None)
            .unwrap();
        let err = t
            .allocate(SPAN, 0x1000, AccessRights::KERNEL_RW, None)
            .unwrap_err();
        assert_eq!(err, StretchError::NoSpace);
    }

    #[test]
    fn out_of_span_exact_request_is_refused() {
        let mut t = table();
        let err = t
            .allocate(SPAN, 0x1000, AccessRights::KERNEL_RW, Some(VirtAddr::new(0x8000)))
            .unwrap_err();
        assert_eq!(err, StretchError::NoSpace);
    }

    #[test]
    fn removal_frees_the_range() {
        let mut t = table();
        let s = t
            .allocate(SPAN, 0x4000, AccessRights::KERNEL_RW, Some(VirtAddr::new(0x12_0000)))
            .unwrap();
        assert_eq!(t.remove(s.base), Some(s));
        assert_eq!(t.remove(s.base), None);
        assert!(
            t.allocate(SPAN, 0x4000, AccessRights::KERNEL_RW, Some(VirtAddr::new(0x12_0000)))
                .is_ok()
        );
    }

    #[test]
    fn table_capacity_is_bounded() {
        let mut t = table();
        for i in 0..MAX_STRETCHES {
            t.allocate(
                (0, usize::MAX),
                0x1000,
                AccessRights::KERNEL_RW,
                Some(VirtAddr::new(0x10_0000 + i * 0x1000)),
            )
            .unwrap();
        }
        let err = t
            .allocate((0, usize::MAX), 0x1000, AccessRights::KERNEL_RW, None)
            .unwrap_err();
        assert_eq!(err, StretchError::TableFull);
    }
}
