//! # Synchronization primitives for the memory subsystem
//!
//! Exactly the two primitives the allocators need:
//!
//! - [`SpinLock`]: each allocator (frame pool, protection domain, heap)
//!   owns one and holds it for the full duration of every mutating
//!   operation.
//! - [`SyncOnceCell`]: backs process-wide state that is created once during
//!   initialization, such as the privileged protection domain.
//!
//! The concurrency model is a single hardware thread per domain; these exist
//! for reentrancy discipline in the kernel and give honest mutual exclusion
//! to the threaded host tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod once;
mod spin_lock;

pub use once::SyncOnceCell;
pub use spin_lock::{SpinLock, SpinLockGuard};
