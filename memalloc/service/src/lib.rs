//! # Demand-Paging Allocation Service
//!
//! The control-channel front end over the page-table machinery: callers ask
//! for a contiguous run of virtual pages backed by freshly zeroed physical
//! pages with a chosen protection, and the service admits the request
//! against global quotas, scans for overlap, builds any missing table
//! levels, installs the mappings, and invalidates stale translations.
//! Each request applies in full or not at all.
//!
//! ```text
//! dispatch ─► admission ─► conflict scan ─► reserve pages
//!                 │                              │
//!             rejected                per page: walk + install
//!                                                │
//!                                      one flush, then commit
//! ```
//!
//! A request either runs to completion or the caller observes no effect;
//! rejected and faulted requests leave the hierarchy, the pool accounting of
//! mapped pages, and both global counters untouched.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod admission;
pub mod dispatch;
pub mod tlb;
pub mod wire;

pub use crate::dispatch::{
    AllocationRecord, MemAllocService, ServiceError, SharedService, protection_for,
};
