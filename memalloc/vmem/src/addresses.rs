//! # Virtual and Physical Memory Addresses

use core::fmt;

/// Size of one page (and of one table node) in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// Number of low address bits covered by the in-page offset.
pub const PAGE_SHIFT: u32 = 12;

/// Number of address bits consumed by the four translation levels plus the
/// page offset. Addresses at or above `1 << TRANSLATED_BITS` have no slot in
/// the hierarchy.
pub const TRANSLATED_BITS: u32 = 48;

/// A **virtual** memory address (caller address space).
///
/// Newtype over `u64` to prevent mixing with physical addresses.
/// No alignment guarantees by itself.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

/// A **physical** memory address (machine bus address).
///
/// Newtype over `u64` to prevent mixing with virtual addresses.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

/// A page-aligned physical address: one 4 KiB physical page.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(PhysicalAddress);

impl VirtualAddress {
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether the address sits on a page boundary.
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & (PAGE_SIZE - 1) == 0
    }

    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(sum) => Some(Self(sum)),
            None => None,
        }
    }
}

impl PhysicalAddress {
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl PhysicalPage {
    /// Wrap `addr` as a page. The address must be page-aligned.
    #[must_use]
    pub const fn from_addr(addr: PhysicalAddress) -> Self {
        debug_assert!(addr.as_u64() & (PAGE_SIZE - 1) == 0);
        Self(addr)
    }

    /// Base address of the page.
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        self.0
    }
}

/// A contiguous, page-aligned run of virtual pages.
///
/// Construction validates everything the walk relies on: alignment, a
/// non-zero length, and that the whole run fits the translated address space
/// without wrapping.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VirtualPageRange {
    base: VirtualAddress,
    num_pages: u64,
}

/// Rejection reasons for [`VirtualPageRange::new`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RangeError {
    #[error("base address {0} is not page-aligned")]
    UnalignedBase(VirtualAddress),
    #[error("page count is zero")]
    EmptyRange,
    #[error("range exceeds the {TRANSLATED_BITS}-bit translated address space")]
    OutOfTranslatedSpace,
}

impl VirtualPageRange {
    /// Validate and build the range `[base, base + num_pages * PAGE_SIZE)`.
    ///
    /// # Errors
    /// See [`RangeError`].
    pub const fn new(base: VirtualAddress, num_pages: u64) -> Result<Self, RangeError> {
        if !base.is_page_aligned() {
            return Err(RangeError::UnalignedBase(base));
        }
        if num_pages == 0 {
            return Err(RangeError::EmptyRange);
        }
        let Some(bytes) = num_pages.checked_mul(PAGE_SIZE) else {
            return Err(RangeError::OutOfTranslatedSpace);
        };
        let Some(end) = base.checked_add(bytes) else {
            return Err(RangeError::OutOfTranslatedSpace);
        };
        if end.as_u64() > 1 << TRANSLATED_BITS {
            return Err(RangeError::OutOfTranslatedSpace);
        }
        Ok(Self { base, num_pages })
    }

    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        self.base
    }

    #[must_use]
    pub const fn num_pages(self) -> u64 {
        self.num_pages
    }

    /// Exclusive end of the range.
    #[must_use]
    pub const fn end(self) -> VirtualAddress {
        VirtualAddress(self.base.0 + self.num_pages * PAGE_SIZE)
    }

    /// Page-aligned addresses of the range, in ascending order.
    pub fn pages(self) -> impl Iterator<Item = VirtualAddress> {
        (0..self.num_pages).map(move |i| VirtualAddress(self.base.0 + i * PAGE_SIZE))
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012x}", self.0)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012x} (Virtual)", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012x}", self.0)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012x} (Physical)", self.0)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012x} (Physical page)", self.0.0)
    }
}
