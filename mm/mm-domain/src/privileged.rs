//! The kernel's own domain, created once during early boot.

use mm_frame::FrameAllocator;
use mm_sync::SyncOnceCell;

use crate::{Machine, ProtectionDomain};

static PRIVILEGED: SyncOnceCell<ProtectionDomain> = SyncOnceCell::new();

/// Create the privileged domain. Runs before paging is enabled, while the
/// paging structures are still reachable by physical address.
///
/// # Panics
///
/// When called a second time.
pub fn init_privileged<M: Machine>(
    machine: &M,
    frames: &FrameAllocator,
) -> &'static ProtectionDomain {
    let mut created = false;
    let domain = PRIVILEGED.get_or_init(|| {
        created = true;
        ProtectionDomain::build(machine, frames, true)
    });
    assert!(created, "privileged domain was already initialized");
    domain
}

/// The privileged domain.
///
/// # Panics
///
/// Before [`init_privileged`] has run.
#[must_use]
pub fn privileged() -> &'static ProtectionDomain {
    PRIVILEGED.get().expect("privileged domain not initialized")
}
