//! # Physical Page Pool
//!
//! A capacity-bounded pool of 4 KiB physical pages implementing the
//! [`FrameSource`] trait. The pool owns the backing bytes, so it also plays
//! the mapper role: callers (and tests) reach a page's contents through
//! [`PagePool::bytes`]/[`PagePool::bytes_mut`] once they hold its address.
//!
//! Pages are zero when handed out: fresh pages are born zeroed and returned
//! pages are wiped on [`free`](FrameSource::free), so reuse cannot leak a
//! previous caller's bytes.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::vec::Vec;
use log::warn;
use memalloc_vmem::addresses::{PAGE_SIZE, PhysicalAddress};
use memalloc_vmem::{FrameSource, PhysicalPage};

/// Bytes per frame.
pub const FRAME_BYTES: usize = PAGE_SIZE as usize;

/// Lowest physical address handed out by a default-constructed pool.
const DEFAULT_BASE: u64 = 0x10_0000; // 1 MiB

/// One page worth of backing storage.
#[repr(align(4096))]
struct Frame([u8; FRAME_BYTES]);

impl Frame {
    const fn zeroed() -> Self {
        Self([0u8; FRAME_BYTES])
    }
}

/// Fixed-capacity pool of zero-filled physical pages.
///
/// Storage grows lazily up to `capacity`; freed pages are wiped and reused
/// before the pool grows. Page addresses are `base + index * PAGE_SIZE`.
pub struct PagePool {
    base: PhysicalAddress,
    capacity: usize,
    frames: Vec<Frame>,
    /// Liveness bitmap, parallel to `frames`.
    live: Vec<bool>,
    /// Indices of freed frames awaiting reuse.
    reusable: Vec<u32>,
}

impl PagePool {
    /// Pool of at most `capacity` pages starting at the default base.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_base(PhysicalAddress::new(DEFAULT_BASE), capacity)
    }

    /// Pool of at most `capacity` pages starting at `base` (page-aligned).
    #[must_use]
    pub fn with_base(base: PhysicalAddress, capacity: usize) -> Self {
        debug_assert!(base.as_u64() & (PAGE_SIZE - 1) == 0);
        Self {
            base,
            capacity,
            frames: Vec::new(),
            live: Vec::new(),
            reusable: Vec::new(),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pages currently handed out.
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.frames.len() - self.reusable.len()
    }

    /// Pages still obtainable before the pool is exhausted.
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity - self.allocated()
    }

    /// Contents of a live page.
    ///
    /// # Panics
    /// If `page` is not currently handed out by this pool.
    #[must_use]
    pub fn bytes(&self, page: PhysicalPage) -> &[u8; FRAME_BYTES] {
        let index = self.index_of(page);
        &self.frames[index].0
    }

    /// Mutable contents of a live page.
    ///
    /// # Panics
    /// If `page` is not currently handed out by this pool.
    pub fn bytes_mut(&mut self, page: PhysicalPage) -> &mut [u8; FRAME_BYTES] {
        let index = self.index_of(page);
        &mut self.frames[index].0
    }

    /// Resolve a page to its frame index, rejecting pages this pool never
    /// handed out (or already took back) in release builds too.
    #[allow(clippy::cast_possible_truncation)]
    fn index_of(&self, page: PhysicalPage) -> usize {
        let Some(offset) = page.base().as_u64().checked_sub(self.base.as_u64()) else {
            panic!("{page} lies below this pool's address range");
        };
        let index = (offset / PAGE_SIZE) as usize;
        assert!(index < self.frames.len(), "{page} was not handed out by this pool");
        assert!(self.live[index], "{page} is not live in this pool");
        index
    }
}

impl FrameSource for PagePool {
    fn alloc_zeroed(&mut self) -> Option<PhysicalPage> {
        let index = if let Some(index) = self.reusable.pop() {
            index as usize
        } else if self.frames.len() < self.capacity {
            self.frames.push(Frame::zeroed());
            self.live.push(false);
            self.frames.len() - 1
        } else {
            warn!("page pool exhausted (capacity {})", self.capacity);
            return None;
        };
        debug_assert!(!self.live[index]);
        self.live[index] = true;
        let addr = PhysicalAddress::new(self.base.as_u64() + index as u64 * PAGE_SIZE);
        Some(PhysicalPage::from_addr(addr))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn free(&mut self, page: PhysicalPage) {
        let index = self.index_of(page);
        self.live[index] = false;
        // Wipe now so the next alloc_zeroed hands out a clean page.
        self.frames[index].0.fill(0);
        self.reusable.push(index as u32);
    }
}
