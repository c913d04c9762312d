//! # Address Space
//!
//! Strongly-typed helpers to build and inspect a **single** virtual address
//! space rooted in the arena's first directory node.
//!
//! ## Highlights
//!
//! - The mutating walk allocates and links missing directory levels on the
//!   way down and installs one leaf mapping ([`AddressSpace::map_one`]).
//! - The read-only walk treats a missing level as "not mapped" and creates
//!   nothing ([`AddressSpace::is_mapped`], [`AddressSpace::is_any_mapped`]).
//! - [`AddressSpace::unmap_one`] clears one leaf slot and hands the backing
//!   page back to the caller; directory nodes are never reclaimed.
//!
//! Descriptors for new links and leaves come from the injected
//! [`EntryEncoding`]; table pages come from the caller's [`FrameSource`].

use crate::FrameSource;
use crate::addresses::{PhysicalPage, VirtualAddress, VirtualPageRange};
use crate::arena::{DIRECTORY_LEVELS, Entry, LEAF_LEVEL, PageTableArena, TableHandle, TableIndex};
use crate::encoding::{EntryEncoding, Protection, RawEntry};
use log::{debug, trace};

/// Failure of the mutating walk.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum WalkError {
    /// No physical page could be acquired for a missing table at `level`.
    #[error("out of memory creating a level {0} table")]
    TableExhausted(usize),
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<E> {
    arena: PageTableArena,
    encoding: E,
}

impl<E: EntryEncoding> AddressSpace<E> {
    /// Build an empty address space, acquiring the root directory page.
    ///
    /// # Errors
    /// [`WalkError::TableExhausted`] if `alloc` cannot supply the root page.
    pub fn new<A: FrameSource + ?Sized>(alloc: &mut A, encoding: E) -> Result<Self, WalkError> {
        let root = alloc.alloc_zeroed().ok_or(WalkError::TableExhausted(0))?;
        debug!("address space root table at {root}");
        Ok(Self {
            arena: PageTableArena::with_root(root),
            encoding,
        })
    }

    /// Descend to the leaf table for `va`, creating and linking any missing
    /// directory level. Runs once per target page.
    ///
    /// On failure the directories created so far stay linked; they hold no
    /// mappings and a later walk reuses them.
    fn ensure_leaf_slot<A: FrameSource + ?Sized>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<(TableHandle, TableIndex), WalkError> {
        let mut current = self.arena.root();
        for level in 0..DIRECTORY_LEVELS {
            let index = TableIndex::of(va, level);
            current = match self.arena.node(current).get(index) {
                Entry::Table { child, .. } => child,
                entry => {
                    // Only leaf tables hold page entries; a directory slot
                    // is a table link or empty.
                    debug_assert!(entry.is_empty(), "leaf entry in a directory level");
                    let backing = alloc
                        .alloc_zeroed()
                        .ok_or(WalkError::TableExhausted(level + 1))?;
                    let child = self.arena.push(backing);
                    let raw = self.encoding.encode_table_entry(backing);
                    self.arena
                        .node_mut(current)
                        .set(index, Entry::Table { child, raw });
                    debug!("created level {} table at {backing}", level + 1);
                    child
                }
            };
        }
        Ok((current, TableIndex::of(va, LEAF_LEVEL)))
    }

    /// Install `page` at `va` with `protection`, building missing levels.
    ///
    /// The leaf slot must be empty; callers scan for conflicts first.
    ///
    /// # Errors
    /// [`WalkError::TableExhausted`] if a missing directory level cannot be
    /// created. No leaf is installed in that case.
    pub fn map_one<A: FrameSource + ?Sized>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        page: PhysicalPage,
        protection: Protection,
    ) -> Result<(), WalkError> {
        let (leaf, index) = self.ensure_leaf_slot(alloc, va)?;
        debug_assert!(
            self.arena.node(leaf).get(index).is_empty(),
            "leaf slot already mapped"
        );
        let raw = self.encoding.encode_leaf_entry(page, protection);
        self.arena.node_mut(leaf).set(index, Entry::Page { page, raw });
        trace!("mapped {va} -> {page} ({protection:?})");
        Ok(())
    }

    /// Read-only descent to the leaf slot for `va`; `None` on any missing
    /// level. Creates nothing.
    fn locate_leaf_slot(&self, va: VirtualAddress) -> Option<(TableHandle, TableIndex)> {
        let mut current = self.arena.root();
        for level in 0..DIRECTORY_LEVELS {
            match self.arena.node(current).get(TableIndex::of(va, level)) {
                Entry::Table { child, .. } => current = child,
                _ => return None,
            }
        }
        Some((current, TableIndex::of(va, LEAF_LEVEL)))
    }

    /// Whether the page at `va` is currently mapped.
    #[must_use]
    pub fn is_mapped(&self, va: VirtualAddress) -> bool {
        self.locate_leaf_slot(va)
            .is_some_and(|(leaf, index)| !self.arena.node(leaf).get(index).is_empty())
    }

    /// Whether any page of `range` is currently mapped. Stops at the first
    /// occupied leaf; a missing level counts as unmapped for that address.
    #[must_use]
    pub fn is_any_mapped(&self, range: VirtualPageRange) -> bool {
        range.pages().any(|va| self.is_mapped(va))
    }

    /// Clear the leaf mapping at `va`, returning its page for release.
    /// `None` if the page was not mapped. Directory nodes stay in place.
    pub fn unmap_one(&mut self, va: VirtualAddress) -> Option<PhysicalPage> {
        let (leaf, index) = self.locate_leaf_slot(va)?;
        match self.arena.node(leaf).get(index) {
            Entry::Page { page, .. } => {
                self.arena.node_mut(leaf).set(index, Entry::Empty);
                trace!("unmapped {va} -> {page}");
                Some(page)
            }
            _ => None,
        }
    }

    /// Translate `va` to the mapped physical page, if any.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalPage> {
        match self.leaf_entry(va)? {
            Entry::Page { page, .. } => Some(page),
            _ => None,
        }
    }

    /// The raw descriptor installed at `va`, if mapped.
    #[must_use]
    pub fn leaf_descriptor(&self, va: VirtualAddress) -> Option<RawEntry> {
        match self.leaf_entry(va)? {
            Entry::Page { raw, .. } => Some(raw),
            _ => None,
        }
    }

    fn leaf_entry(&self, va: VirtualAddress) -> Option<Entry> {
        let (leaf, index) = self.locate_leaf_slot(va)?;
        Some(self.arena.node(leaf).get(index))
    }

    /// Number of table nodes in the hierarchy, root included.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.arena.len()
    }
}
