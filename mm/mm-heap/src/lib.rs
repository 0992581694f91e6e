//! # Kernel heap
//!
//! A byte-granular allocator carved out of one protection domain's virtual
//! range. Every block carries boundary tags (a header in front of the
//! payload, a footer behind it pointing back at the header), so freeing
//! coalesces with both neighbors in constant time. Free blocks are
//! additionally listed in a size-ordered index at the front of the heap's
//! own range, making allocation a smallest-fit scan.
//!
//! ## Growth
//!
//! The heap starts over a pre-mapped range and grows in whole pages
//! through a [`Backing`] when no hole fits, up to a hard ceiling. Freeing
//! at the top end contracts it again, down to the initial extent. The real
//! backing, [`DomainBacking`], pulls frames from the frame allocator and
//! maps them into the owning domain; tests substitute a recorder over a
//! host buffer.
//!
//! ## Failure model
//!
//! Corrupted tags, double frees and growth past the ceiling are all fatal.
//! The only error an allocation could report would be exhaustion, and
//! exhaustion of the kernel heap has no recovery.
//!
//! Lock discipline: backing traffic runs with the heap lock released, so
//! the heap, frame allocator and domain locks are only ever taken one at
//! a time.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod backing;
mod heap;
mod index;
mod tags;

pub use backing::{Backing, DomainBacking};
pub use heap::Heap;
