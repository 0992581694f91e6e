//! The hole index: every free block, ordered by ascending size.
//!
//! A fixed array of header pointers living in memory the heap reserves off
//! its own front at initialization, so the index needs no allocator of its
//! own. Ascending order makes the first fitting entry the smallest one.

use core::ptr;

use crate::tags::Header;

/// Entries the index can hold. Its byte footprint is
/// `INDEX_CAPACITY * size_of::<*mut Header>()`.
pub const INDEX_CAPACITY: usize = 1024;

pub struct HoleIndex {
    entries: *mut *mut Header,
    len: usize,
}

impl HoleIndex {
    /// # Safety
    ///
    /// `entries` must point at [`INDEX_CAPACITY`] writable pointer slots
    /// reserved to this index for its whole life.
    pub const unsafe fn new(entries: *mut *mut Header) -> Self {
        Self { entries, len: 0 }
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub fn get(&self, position: usize) -> *mut Header {
        debug_assert!(position < self.len);
        // SAFETY: slots below `len` were written by `insert`.
        unsafe { *self.entries.add(position) }
    }

    /// Insert `header` keeping the ascending size order.
    ///
    /// # Panics
    ///
    /// When the fixed capacity is exhausted. A heap fragmented into more
    /// holes than the index holds cannot be tracked any further.
    pub fn insert(&mut self, header: *mut Header) {
        assert!(self.len < INDEX_CAPACITY, "heap hole index overflow");
        // SAFETY: `header` is a live hole tag owned by the caller.
        let size = unsafe { (*header).size() };
        let mut position = 0;
        while position < self.len && unsafe { (*self.get(position)).size() } < size {
            position += 1;
        }
        let mut slot = self.len;
        while slot > position {
            // SAFETY: shifting initialized slots one to the right, inside
            // the reserved capacity.
            unsafe { self.entries.add(slot).write(*self.entries.add(slot - 1)) };
            slot -= 1;
        }
        // SAFETY: `position` is free after the shift.
        unsafe { self.entries.add(position).write(header) };
        self.len += 1;
    }

    pub fn remove_at(&mut self, position: usize) {
        debug_assert!(position < self.len);
        for slot in position..self.len - 1 {
            // SAFETY: compacting initialized slots one to the left.
            unsafe { self.entries.add(slot).write(*self.entries.add(slot + 1)) };
        }
        self.len -= 1;
    }

    /// Remove `header` from the index.
    ///
    /// # Panics
    ///
    /// When it is not there. A hole the heap knows about but the index does
    /// not means the two structures have drifted apart.
    pub fn remove(&mut self, header: *mut Header) {
        let Some(position) = self.position_of(header) else {
            panic!("heap hole at {header:p} missing from the index");
        };
        self.remove_at(position);
    }

    pub fn position_of(&self, header: *mut Header) -> Option<usize> {
        (0..self.len).find(|&position| ptr::eq(self.get(position), header))
    }

    pub fn contains(&self, header: *mut Header) -> bool {
        self.position_of(header).is_some()
    }
}
