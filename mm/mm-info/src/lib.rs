//! # Boot handoff and virtual-memory layout
//!
//! The boot path hands the memory subsystem two things before any allocator
//! exists: the firmware memory map and the extent of the running kernel
//! image. Both live in [`boot`]. The fixed virtual-space carve-up (kernel
//! split, heap range, scratch page) lives in [`layout`].

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod boot;
pub mod layout;

pub use boot::{BootReservation, MemoryMap, MemoryRange, RangeKind};
