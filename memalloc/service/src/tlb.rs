//! # Translation-Cache Maintenance
//!
//! Abstract capability to discard stale cached translations, supplied by the
//! host environment. The dispatcher calls it exactly once per completed
//! request, after every install or removal and before reporting success, so
//! flush cost amortizes over the whole range instead of per page.

use memalloc_vmem::VirtualPageRange;

/// Drops cached translations for `range` in the caller's address space.
pub trait TlbInvalidate {
    fn invalidate(&mut self, range: VirtualPageRange);
}

/// No-op for hosts without translating hardware (simulation, tests).
#[derive(Copy, Clone, Debug, Default)]
pub struct NullTlb;

impl TlbInvalidate for NullTlb {
    fn invalidate(&mut self, _range: VirtualPageRange) {}
}
