//! # Protection domains
//!
//! A protection domain owns one address space and the bookkeeping around
//! it: a spin lock serializing structure mutation, and the table of
//! stretches (reserved virtual ranges) handed out inside it.
//!
//! The kernel's own domain is a process-wide singleton created once during
//! boot ([`init_privileged`]); further domains come from
//! [`ProtectionDomain::create`]. Only the privileged domain may
//! [`enable_paging`](ProtectionDomain::enable_paging), and it does so
//! exactly once.
//!
//! ## The escrow rule
//!
//! Mapping a page may require a new page table, and page tables come from
//! the frame allocator, which has its own lock. To keep every operation on
//! one lock at a time, [`ProtectionDomain::map`] allocates a single frame
//! into an escrow *before* taking the domain lock; table creation inside
//! the critical section draws from the escrow and never allocates. An
//! untouched escrow frame goes back to the pool afterwards.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod domain;
mod escrow;
mod privileged;
mod rights;
mod stretch;
#[cfg(target_arch = "x86")]
pub mod x86;

pub use domain::ProtectionDomain;
pub use privileged::{init_privileged, privileged};
pub use rights::AccessRights;
pub use stretch::{MAX_STRETCHES, Stretch, StretchError};

use mm_frame::PhysAccess;
use mm_paging::{Mmu, TableAccess};

/// Everything the hardware side must provide: raw frame access, paging
/// structure access and the MMU registers.
///
/// The kernel passes its one machine implementation (`X86Machine` on
/// hardware) to every domain operation; tests pass an arena.
pub trait Machine: PhysAccess + TableAccess + Mmu {}

impl<T: PhysAccess + TableAccess + Mmu> Machine for T {}
