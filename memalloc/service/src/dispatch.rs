//! # Request Dispatch
//!
//! The single entry point of the service. Every request moves through
//! validation, admission, and the conflict scan before anything mutates;
//! the mapping loop itself is transactional: data pages are reserved up
//! front, and a mid-range table failure rolls back every leaf installed so
//! far. A failed request never leaves a partial mapping or a skewed counter
//! behind.

use alloc::vec::Vec;
use log::{debug, info, trace};
use spin::Mutex;

use memalloc_vmem::address_space::{AddressSpace, WalkError};
use memalloc_vmem::addresses::RangeError;
use memalloc_vmem::encoding::{EntryEncoding, Protection};
use memalloc_vmem::{FrameSource, PhysicalPage, VirtualAddress, VirtualPageRange};

use crate::admission::{AdmissionController, AdmissionError, Quotas};
use crate::tlb::TlbInvalidate;
use crate::wire::{self, Opcode, RawRequest, WireError};

/// Map the caller's write request onto one of the two supported protections.
#[must_use]
pub const fn protection_for(write: bool) -> Protection {
    if write {
        Protection::ReadWrite
    } else {
        Protection::ReadOnly
    }
}

/// One live allocation, exactly as granted.
///
/// FREE must name the recorded range verbatim; sub-ranges and merges of
/// several allocations are rejected even when every page of them is mapped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AllocationRecord {
    range: VirtualPageRange,
    protection: Protection,
}

impl AllocationRecord {
    #[must_use]
    pub const fn range(&self) -> VirtualPageRange {
        self.range
    }

    #[must_use]
    pub const fn protection(&self) -> Protection {
        self.protection
    }
}

/// Everything that can go wrong with one request.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ServiceError {
    /// The payload could not be read as a request struct.
    #[error("malformed payload: {0}")]
    BadPayload(#[from] WireError),
    /// The payload decoded but describes no valid page range.
    #[error("invalid page range: {0}")]
    BadRange(#[from] RangeError),
    /// Some page of the requested range is already mapped.
    #[error("range overlaps an existing mapping")]
    ConflictExisting,
    /// A global quota would be violated.
    #[error(transparent)]
    QuotaExceeded(#[from] AdmissionError),
    /// A physical or table page could not be acquired.
    #[error("out of physical memory")]
    ResourceExhausted,
    /// FREE named a range that is not fully mapped.
    #[error("range is not fully mapped")]
    RangeNotMapped,
    /// Unrecognized opcode.
    #[error("unrecognized opcode {0}")]
    InvalidOperation(u32),
}

impl From<WalkError> for ServiceError {
    fn from(_: WalkError) -> Self {
        Self::ResourceExhausted
    }
}

impl ServiceError {
    /// The wire code reported to the caller.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::BadPayload(_) | Self::BadRange(_) => wire::code::BAD_PAYLOAD,
            Self::ConflictExisting | Self::RangeNotMapped => wire::code::CONFLICT,
            Self::QuotaExceeded(AdmissionError::PageQuota { .. }) => wire::code::PAGE_QUOTA,
            Self::QuotaExceeded(AdmissionError::AllocationQuota { .. }) => {
                wire::code::ALLOCATION_QUOTA
            }
            Self::ResourceExhausted => wire::code::NO_MEMORY,
            Self::InvalidOperation(_) => wire::code::INVALID_OPERATION,
        }
    }
}

/// The allocation service: one address space, one page source, one
/// translation cache, two global counters.
///
/// `dispatch` takes `&mut self`, so a single owner is serialized by the
/// borrow checker; concurrent callers share the service through
/// [`SharedService`], which holds the lock for the whole request.
pub struct MemAllocService<E: EntryEncoding, A: FrameSource, T: TlbInvalidate> {
    space: AddressSpace<E>,
    frames: A,
    tlb: T,
    admission: AdmissionController,
    /// Live allocations; FREE consumes exactly one record.
    records: Vec<AllocationRecord>,
}

impl<E: EntryEncoding, A: FrameSource, T: TlbInvalidate> MemAllocService<E, A, T> {
    /// Build a service around an empty address space.
    ///
    /// # Errors
    /// [`ServiceError::ResourceExhausted`] if `frames` cannot supply the
    /// root table page.
    pub fn new(mut frames: A, encoding: E, tlb: T, quotas: Quotas) -> Result<Self, ServiceError> {
        let space = AddressSpace::new(&mut frames, encoding)?;
        info!(
            "allocation service ready (quota: {} pages, {} allocations)",
            quotas.max_pages, quotas.max_allocations
        );
        Ok(Self {
            space,
            frames,
            tlb,
            admission: AdmissionController::new(quotas),
            records: Vec::new(),
        })
    }

    /// Wire entry point: decode, run, fold the outcome into a response code.
    pub fn dispatch(&mut self, opcode: u32, payload: &[u8]) -> i32 {
        let outcome = match Opcode::from_raw(opcode) {
            Some(Opcode::Allocate) => RawRequest::decode(payload)
                .map_err(ServiceError::from)
                .and_then(|request| self.allocate(request)),
            Some(Opcode::Free) => RawRequest::decode(payload)
                .map_err(ServiceError::from)
                .and_then(|request| self.free(request)),
            None => Err(ServiceError::InvalidOperation(opcode)),
        };
        match outcome {
            Ok(()) => wire::code::SUCCESS,
            Err(err) => {
                debug!("request rejected: {err}");
                err.code()
            }
        }
    }

    /// Back `num_pages` fresh zeroed pages at `vaddr` with the protection
    /// derived from `write`. All-or-nothing: on any failure the hierarchy
    /// holds no page of the range and the counters are unchanged.
    ///
    /// # Errors
    /// See [`ServiceError`]; quota and conflict rejections are side-effect
    /// free and safe to retry once capacity frees up.
    #[allow(clippy::cast_possible_truncation)]
    pub fn allocate(&mut self, request: RawRequest) -> Result<(), ServiceError> {
        let range = VirtualPageRange::new(
            VirtualAddress::new(request.vaddr),
            u64::from(request.num_pages),
        )?;
        self.admission.admit(range.num_pages())?;
        if self.space.is_any_mapped(range) {
            return Err(ServiceError::ConflictExisting);
        }

        // Reserve every data page before installing any, so a plain
        // shortfall is caught while the hierarchy is still untouched.
        let mut reserved = Vec::with_capacity(range.num_pages() as usize);
        for _ in 0..range.num_pages() {
            match self.frames.alloc_zeroed() {
                Some(page) => reserved.push(page),
                None => {
                    self.release_pages(&reserved);
                    return Err(ServiceError::ResourceExhausted);
                }
            }
        }

        let protection = protection_for(request.write);
        for (installed, (va, page)) in range.pages().zip(reserved.iter().copied()).enumerate() {
            if let Err(err) = self.space.map_one(&mut self.frames, va, page, protection) {
                // A table page ran out mid-range: take back the leaves
                // installed so far and every reserved page.
                self.rollback(range, installed);
                self.release_pages(&reserved[installed..]);
                return Err(err.into());
            }
            trace!("installed page {installed} of {}", range.num_pages());
        }

        self.tlb.invalidate(range);
        self.admission.commit(range.num_pages());
        self.records.push(AllocationRecord { range, protection });
        debug!(
            "allocated {} page(s) at {} ({protection:?})",
            range.num_pages(),
            range.base()
        );
        Ok(())
    }

    /// Reverse one prior allocation: unmap every page of the range, release
    /// the backing pages, invalidate once, and drop both counters.
    ///
    /// The range must match the record of a live allocation verbatim. A
    /// sub-range, or a range merging several allocations, is rejected even
    /// when all of its pages are mapped; the counters only ever move by
    /// whole allocations.
    ///
    /// # Errors
    /// [`ServiceError::RangeNotMapped`] (and no effect) unless the range
    /// names a live allocation exactly.
    pub fn free(&mut self, request: RawRequest) -> Result<(), ServiceError> {
        let range = VirtualPageRange::new(
            VirtualAddress::new(request.vaddr),
            u64::from(request.num_pages),
        )?;
        let position = self
            .records
            .iter()
            .position(|record| record.range == range)
            .ok_or(ServiceError::RangeNotMapped)?;

        for va in range.pages() {
            if let Some(page) = self.space.unmap_one(va) {
                self.frames.free(page);
            }
        }
        self.tlb.invalidate(range);
        self.admission.release(range.num_pages());
        self.records.swap_remove(position);
        debug!("freed {} page(s) at {}", range.num_pages(), range.base());
        Ok(())
    }

    /// Undo the first `installed` pages of `range`.
    fn rollback(&mut self, range: VirtualPageRange, installed: usize) {
        for va in range.pages().take(installed) {
            if let Some(page) = self.space.unmap_one(va) {
                self.frames.free(page);
            }
        }
    }

    fn release_pages(&mut self, pages: &[PhysicalPage]) {
        for &page in pages {
            self.frames.free(page);
        }
    }

    /// The quota counters.
    #[must_use]
    pub const fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// The live allocations, in no particular order.
    #[must_use]
    pub fn live_allocations(&self) -> &[AllocationRecord] {
        &self.records
    }

    /// Read access to the mapped hierarchy.
    #[must_use]
    pub const fn address_space(&self) -> &AddressSpace<E> {
        &self.space
    }

    /// The page source, e.g. to reach page contents it exposes.
    #[must_use]
    pub const fn frames(&self) -> &A {
        &self.frames
    }

    /// Mutable access to the page source; mapped pages must stay untouched.
    pub const fn frames_mut(&mut self) -> &mut A {
        &mut self.frames
    }

    /// The translation-cache capability.
    #[must_use]
    pub const fn tlb(&self) -> &T {
        &self.tlb
    }
}

/// Serializes whole requests across callers sharing one service.
///
/// The lock spans the entire request, so validation, admission, the conflict
/// scan, and every install happen atomically with respect to other callers.
pub struct SharedService<E: EntryEncoding, A: FrameSource, T: TlbInvalidate>(
    Mutex<MemAllocService<E, A, T>>,
);

impl<E: EntryEncoding, A: FrameSource, T: TlbInvalidate> SharedService<E, A, T> {
    #[must_use]
    pub const fn new(service: MemAllocService<E, A, T>) -> Self {
        Self(Mutex::new(service))
    }

    /// Locked counterpart of [`MemAllocService::dispatch`].
    pub fn dispatch(&self, opcode: u32, payload: &[u8]) -> i32 {
        self.0.lock().dispatch(opcode, payload)
    }

    pub fn into_inner(self) -> MemAllocService<E, A, T> {
        self.0.into_inner()
    }
}
