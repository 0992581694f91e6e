//! # Physical and Virtual Address Types
//!
//! Strongly typed wrappers for the raw addresses used throughout the
//! memory-management crates.
//!
//! ## Overview
//!
//! Two principal types prevent mixing the two address spaces at compile time
//! while remaining zero-cost wrappers around `usize`:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysAddr`] | A location in physical memory (frame-granular storage). |
//! | [`VirtAddr`] | A location in a paged address space. |
//!
//! The machine this code targets is a 32-bit x86 with 4 KiB pages and a
//! two-level translation tree, so `usize` is exactly the hardware word there.
//! Host-side tests run with the wider native word; all page and index
//! arithmetic masks the bits it needs and is indifferent to the extra width.
//!
//! ## Access mode
//!
//! [`AccessMode`] captures the one irreversible transition this subsystem
//! goes through: before paging is enabled, physical addresses are plain
//! pointers; afterwards, physical memory is only reachable through the
//! recursive window or a temporary scratch mapping. Code that touches raw
//! frames or page tables carries the mode explicitly instead of guessing
//! from global state.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

use core::fmt;
use core::ops::{Add, AddAssign};

/// Size of one page and one frame, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// log2([`PAGE_SIZE`]); number of low bits holding the in-page offset.
pub const PAGE_SHIFT: u32 = 12;

/// Bytes of virtual space covered by one page-directory slot (1024 pages).
pub const TABLE_SPAN: usize = PAGE_SIZE * 1024;

/// Align `value` down to the previous multiple of `align`.
///
/// `align` must be a power of two.
#[inline]
#[must_use]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Align `value` up to the next multiple of `align`.
///
/// `align` must be a power of two.
#[inline]
#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// A physical memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysAddr(usize);

impl PhysAddr {
    /// The zero address, used as a "no frame" marker in a few places.
    pub const ZERO: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Global frame number of the frame containing this address.
    #[inline]
    #[must_use]
    pub const fn frame_index(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Base address of frame number `index`.
    #[inline]
    #[must_use]
    pub const fn from_frame_index(index: usize) -> Self {
        Self(index << PAGE_SHIFT)
    }

    /// Frame base containing this address (low bits zeroed).
    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(align_down(self.0, PAGE_SIZE))
    }

    /// Next frame boundary at or above this address.
    #[inline]
    #[must_use]
    pub const fn align_up(self) -> Self {
        Self(align_up(self.0, PAGE_SIZE))
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// Offset of this address within its frame.
    #[inline]
    #[must_use]
    pub const fn offset_in_page(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:08X})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl Add<usize> for PhysAddr {
    type Output = Self;
    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<usize> for PhysAddr {
    #[inline]
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs;
    }
}

/// A virtual memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtAddr(usize);

impl VirtAddr {
    pub const ZERO: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    /// Address of `ptr`, for code that walks real memory (heap tags, tests).
    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Reinterpret as a raw pointer. The caller is responsible for the
    /// address actually being backed in the current address space.
    #[inline]
    #[must_use]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Page base containing this address (low bits zeroed).
    #[inline]
    #[must_use]
    pub const fn align_down(self) -> Self {
        Self(align_down(self.0, PAGE_SIZE))
    }

    /// Next page boundary at or above this address.
    #[inline]
    #[must_use]
    pub const fn align_up(self) -> Self {
        Self(align_up(self.0, PAGE_SIZE))
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    /// Offset of this address within its page.
    #[inline]
    #[must_use]
    pub const fn offset_in_page(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:08X})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl Add<usize> for VirtAddr {
    type Output = Self;
    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<usize> for VirtAddr {
    #[inline]
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs;
    }
}

/// How physical memory is reached at the moment.
///
/// The transition is one-way: the subsystem starts in [`Physical`] mode and
/// moves to [`Mapped`] exactly once, when the privileged domain enables
/// paging. There is no way back.
///
/// [`Physical`]: AccessMode::Physical
/// [`Mapped`]: AccessMode::Mapped
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AccessMode {
    /// Paging is off; a physical address is directly dereferenceable.
    Physical,
    /// Paging is on; physical memory is reached through the recursive
    /// window (page tables) or the scratch page (arbitrary frames).
    Mapped,
}

impl AccessMode {
    #[inline]
    #[must_use]
    pub const fn is_physical(self) -> bool {
        matches!(self, Self::Physical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_down(0x1FFF, PAGE_SIZE), 0x1000);
        assert_eq!(align_up(0x1001, PAGE_SIZE), 0x2000);
        assert_eq!(align_up(0x2000, PAGE_SIZE), 0x2000);
        assert_eq!(align_down(0, PAGE_SIZE), 0);
    }

    #[test]
    fn frame_index_round_trip() {
        let pa = PhysAddr::new(0x0123_4567);
        assert_eq!(pa.frame_index(), 0x0123_4);
        assert_eq!(PhysAddr::from_frame_index(pa.frame_index()), pa.align_down());
        assert_eq!(pa.offset_in_page(), 0x567);
    }

    #[test]
    fn page_alignment_predicates() {
        assert!(VirtAddr::new(0xC000_0000).is_page_aligned());
        assert!(!VirtAddr::new(0xC000_0004).is_page_aligned());
        assert_eq!(VirtAddr::new(0xC000_0FFF).align_down(), VirtAddr::new(0xC000_0000));
        assert_eq!(VirtAddr::new(0xC000_0001).align_up(), VirtAddr::new(0xC000_1000));
    }

    #[test]
    fn pointer_round_trip() {
        let value = 42u64;
        let va = VirtAddr::from_ptr(&raw const value);
        assert_eq!(unsafe { *va.as_mut_ptr::<u64>() }, 42);
    }

    #[test]
    fn formatting() {
        assert_eq!(format!("{:?}", PhysAddr::new(0x1000)), "PA(0x00001000)");
        assert_eq!(format!("{}", VirtAddr::new(0xFFC0_0000)), "0xFFC00000");
    }

    #[test]
    fn mode_is_copy_and_comparable() {
        let mode = AccessMode::Physical;
        assert!(mode.is_physical());
        assert_ne!(mode, AccessMode::Mapped);
    }
}
