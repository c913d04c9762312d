//! # Page-Table Hierarchy for Demand Paging
//!
//! Builds and walks a four-level page-table hierarchy for a single address
//! space, backed by an arena of table nodes instead of raw linked physical
//! pointers.
//!
//! ## What you get
//! - Tiny [`VirtualAddress`]/[`PhysicalAddress`] newtypes (u64) to avoid
//!   mixing address kinds, plus a page-aligned [`VirtualPageRange`].
//! - An [`arena`](crate::arena) of table nodes addressed by stable handles;
//!   parent entries own exactly one lazily created child.
//! - An [`AddressSpace`] with the mutating walk (create missing levels,
//!   install a leaf) and the read-only walk (conflict scan, translate, unmap).
//! - A pluggable [`EntryEncoding`](crate::encoding::EntryEncoding) that turns
//!   table links and leaf mappings into architecture descriptor bits.
//! - A tiny allocator interface ([`FrameSource`]) for zeroed physical pages.
//!
//! ## Virtual Address → Leaf Slot Walk
//!
//! Each 48-bit virtual address is divided into five fields:
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L0   |  L1   |  L2   |  leaf | Offset |
//! ```
//!
//! The first four fields are **indices** into four levels of tables, each
//! holding 512 entries. Levels 0..=2 are directories whose entries link one
//! child table; the last level holds leaf entries that reference one physical
//! page plus its protection descriptor. Directories are created on first
//! reference, zero-initialized before being linked, and never freed.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod address_space;
pub mod addresses;
pub mod arena;
pub mod encoding;

pub use crate::address_space::AddressSpace;
pub use crate::addresses::{
    PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPageRange,
};

/// Minimal allocator interface used to obtain **physical** 4 KiB pages, both
/// for table nodes and for the data pages installed into leaf entries.
///
/// The implementation decides where pages come from (a pool, a bitmap, a
/// bump region). Returned pages **must** be page-aligned and entirely
/// zero-filled; `None` means the source is exhausted.
pub trait FrameSource {
    /// Allocate one zero-filled, page-aligned physical page.
    fn alloc_zeroed(&mut self) -> Option<PhysicalPage>;

    /// Return a page previously handed out by this source.
    fn free(&mut self, page: PhysicalPage);
}
