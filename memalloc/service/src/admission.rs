//! # Admission Control
//!
//! Two global ceilings gate every allocation: the total number of mapped
//! pages and the total number of live allocation requests. The check is
//! evaluated before any mutation and never mutates anything itself; the
//! counters move only when a request has fully completed.

/// Global ceilings for one service instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Quotas {
    /// Ceiling on concurrently mapped pages.
    pub max_pages: u64,
    /// Ceiling on live allocation requests.
    pub max_allocations: u64,
}

impl Default for Quotas {
    fn default() -> Self {
        Self {
            max_pages: 4096,
            max_allocations: 100,
        }
    }
}

/// The specific quota a request would violate.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AdmissionError {
    #[error("page quota exceeded ({in_use} of {max} pages in use, {requested} requested)")]
    PageQuota { in_use: u64, max: u64, requested: u64 },
    #[error("allocation quota exceeded ({max} live allocations)")]
    AllocationQuota { max: u64 },
}

/// Encapsulates the two global counters behind the admission check.
#[derive(Debug)]
pub struct AdmissionController {
    quotas: Quotas,
    pages_allocated: u64,
    allocations: u64,
}

impl AdmissionController {
    #[must_use]
    pub const fn new(quotas: Quotas) -> Self {
        Self {
            quotas,
            pages_allocated: 0,
            allocations: 0,
        }
    }

    /// Total pages currently mapped through completed requests.
    #[must_use]
    pub const fn total_pages_allocated(&self) -> u64 {
        self.pages_allocated
    }

    /// Completed allocation requests not yet reversed.
    #[must_use]
    pub const fn total_allocations(&self) -> u64 {
        self.allocations
    }

    /// Pre-check a request for `num_pages`; mutates nothing.
    ///
    /// # Errors
    /// The violated quota, page ceiling checked first.
    pub const fn admit(&self, num_pages: u64) -> Result<(), AdmissionError> {
        if self.pages_allocated.saturating_add(num_pages) > self.quotas.max_pages {
            return Err(AdmissionError::PageQuota {
                in_use: self.pages_allocated,
                max: self.quotas.max_pages,
                requested: num_pages,
            });
        }
        if self.allocations >= self.quotas.max_allocations {
            return Err(AdmissionError::AllocationQuota {
                max: self.quotas.max_allocations,
            });
        }
        Ok(())
    }

    /// Record one fully completed allocation of `num_pages`.
    pub const fn commit(&mut self, num_pages: u64) {
        self.pages_allocated += num_pages;
        self.allocations += 1;
        debug_assert!(self.pages_allocated <= self.quotas.max_pages);
    }

    /// Reverse one completed allocation of `num_pages`.
    pub const fn release(&mut self, num_pages: u64) {
        debug_assert!(self.pages_allocated >= num_pages);
        debug_assert!(self.allocations > 0);
        self.pages_allocated = self.pages_allocated.saturating_sub(num_pages);
        self.allocations = self.allocations.saturating_sub(1);
    }
}
