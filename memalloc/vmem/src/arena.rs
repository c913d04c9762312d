//! # Table-Node Arena
//!
//! The hierarchy is an arena of table nodes addressed by stable handles.
//! A directory entry owns exactly one child table; a leaf entry references
//! exactly one physical page plus its protection descriptor. Alongside each
//! link or mapping sits the raw descriptor the hardware would read, so the
//! arena is a faithful model of the physical tables without raw pointer
//! arithmetic.

use crate::addresses::{PAGE_SHIFT, PhysicalPage, VirtualAddress};
use crate::encoding::RawEntry;
use alloc::vec::Vec;

/// Entries per table node (9 index bits per level).
pub const ENTRIES_PER_TABLE: usize = 512;

/// Number of directory levels above the leaf level.
pub const DIRECTORY_LEVELS: usize = 3;

/// Depth of the leaf level; its entries map data pages.
pub const LEAF_LEVEL: usize = DIRECTORY_LEVELS;

/// Stable handle of one table node inside its arena.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TableHandle(u32);

/// The 9-bit slice of a virtual address indexing one level.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    /// Extract the index for `level` (0 = root directory, 3 = leaf table).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn of(va: VirtualAddress, level: usize) -> Self {
        debug_assert!(level <= LEAF_LEVEL);
        let shift = PAGE_SHIFT + 9 * (LEAF_LEVEL - level) as u32;
        Self(((va.as_u64() >> shift) & 0x1ff) as u16)
    }

    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// One slot of a table node.
#[derive(Copy, Clone, Debug)]
pub enum Entry {
    /// Nothing mapped, nothing linked.
    Empty,
    /// Directory link: owns one child table.
    Table { child: TableHandle, raw: RawEntry },
    /// Leaf mapping: one physical page plus its protection descriptor.
    Page { page: PhysicalPage, raw: RawEntry },
}

impl Entry {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// One table node: the physical page backing it plus 512 slots.
pub struct TableNode {
    backing: PhysicalPage,
    slots: [Entry; ENTRIES_PER_TABLE],
}

impl TableNode {
    fn new(backing: PhysicalPage) -> Self {
        Self {
            backing,
            slots: [Entry::Empty; ENTRIES_PER_TABLE],
        }
    }

    /// The physical table page this node models.
    #[must_use]
    pub const fn backing(&self) -> PhysicalPage {
        self.backing
    }

    #[must_use]
    pub const fn get(&self, index: TableIndex) -> Entry {
        self.slots[index.as_usize()]
    }

    pub const fn set(&mut self, index: TableIndex, entry: Entry) {
        self.slots[index.as_usize()] = entry;
    }
}

/// Arena of table nodes; node 0 is the root directory.
pub struct PageTableArena {
    nodes: Vec<TableNode>,
}

impl PageTableArena {
    /// Start a hierarchy with an (already zeroed) root directory page.
    #[must_use]
    pub fn with_root(root_backing: PhysicalPage) -> Self {
        let mut nodes = Vec::new();
        nodes.push(TableNode::new(root_backing));
        Self { nodes }
    }

    #[must_use]
    pub const fn root(&self) -> TableHandle {
        TableHandle(0)
    }

    /// Add an empty node backed by `backing` and hand back its handle.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push(&mut self, backing: PhysicalPage) -> TableHandle {
        debug_assert!(self.nodes.len() < u32::MAX as usize);
        let handle = TableHandle(self.nodes.len() as u32);
        self.nodes.push(TableNode::new(backing));
        handle
    }

    #[must_use]
    pub fn node(&self, handle: TableHandle) -> &TableNode {
        &self.nodes[handle.0 as usize]
    }

    pub fn node_mut(&mut self, handle: TableHandle) -> &mut TableNode {
        &mut self.nodes[handle.0 as usize]
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
