//! # Pluggable Descriptor Encodings
//!
//! The hierarchy stores, next to every link and leaf, the raw 64-bit
//! descriptor the translating hardware would read. How table links and leaf
//! protections are laid out in those bits differs per architecture, so the
//! layout is injected as an [`EntryEncoding`] strategy chosen when the
//! service is configured. Everything above this module treats [`RawEntry`]
//! as opaque.

use crate::addresses::{PAGE_SHIFT, PhysicalPage};
use bitfield_struct::bitfield;

/// An encoded table or leaf descriptor, opaque outside its encoding.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct RawEntry(u64);

impl RawEntry {
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }
}

impl core::fmt::Debug for RawEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "RawEntry(0x{:016x})", self.0)
    }
}

/// The two protections a leaf mapping can carry.
///
/// Exactly two by design: callers either get a writable mapping or a
/// read-only one. No execute permission, no finer grades.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Protection {
    ReadWrite,
    ReadOnly,
}

impl Protection {
    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Architecture descriptor policy.
///
/// `encode_table_entry` produces the non-leaf descriptor linking a child
/// table page; `encode_leaf_entry` produces the leaf descriptor mapping one
/// data page with `prot`.
pub trait EntryEncoding {
    fn encode_table_entry(&self, table: PhysicalPage) -> RawEntry;
    fn encode_leaf_entry(&self, page: PhysicalPage, prot: Protection) -> RawEntry;
}

/// One x86-64 page-table entry in its raw bitfield form.
///
/// Models the common superset of fields across all four paging levels.
/// Only the bits this crate writes are named; hardware-managed status bits
/// (accessed, dirty) stay zero at install time.
#[bitfield(u64)]
struct X86EntryBits {
    /// Present (P, bit 0). Valid entry if set.
    present: bool,
    /// Writable (RW, bit 1). Clear for read-only.
    writable: bool,
    /// User/Supervisor (US, bit 2). Set to allow user-mode access.
    user_access: bool,
    /// Page Write-Through (PWT, bit 3).
    write_through: bool,
    /// Page Cache Disable (PCD, bit 4).
    cache_disabled: bool,
    /// Accessed (A, bit 5). Hardware-set on first access.
    accessed: bool,
    /// Dirty (D, bit 6). Hardware-set on first write, leaf only.
    dirty: bool,
    /// Page Size (PS, bit 7). Always clear here: no huge pages.
    large_page: bool,
    /// Global (G, bit 8), leaf only.
    global: bool,
    #[bits(3)]
    _available: u8,
    /// Physical page number, bits 51:12 of the target address.
    #[bits(40)]
    page_number: u64,
    #[bits(11)]
    _os_reserved: u16,
    /// Execute disable (NX, bit 63).
    no_execute: bool,
}

/// x86-64 long-mode descriptor layout.
#[derive(Copy, Clone, Debug, Default)]
pub struct X86Encoding;

impl EntryEncoding for X86Encoding {
    fn encode_table_entry(&self, table: PhysicalPage) -> RawEntry {
        let bits = X86EntryBits::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
            .with_page_number(table.base().as_u64() >> PAGE_SHIFT);
        RawEntry::from_bits(bits.into_bits())
    }

    fn encode_leaf_entry(&self, page: PhysicalPage, prot: Protection) -> RawEntry {
        let bits = X86EntryBits::new()
            .with_present(true)
            .with_writable(prot.is_writable())
            .with_user_access(true)
            .with_no_execute(true)
            .with_page_number(page.base().as_u64() >> PAGE_SHIFT);
        RawEntry::from_bits(bits.into_bits())
    }
}

/// One AArch64 stage-1 translation descriptor (4 KiB granule).
///
/// Bit 1 distinguishes table descriptors at directory levels and page
/// descriptors at the leaf level; both forms set it.
#[bitfield(u64)]
struct Aarch64EntryBits {
    /// Valid (bit 0).
    valid: bool,
    /// Table descriptor at directory levels, page descriptor at the leaf
    /// (bit 1). A clear bit would denote a block mapping: not produced here.
    table_or_page: bool,
    /// MAIR attribute index (bits 4:2), leaf only.
    #[bits(3)]
    attr_index: u8,
    /// Non-secure (NS, bit 5).
    non_secure: bool,
    /// AP[1] (bit 6): EL0 access allowed.
    el0_access: bool,
    /// AP[2] (bit 7): read-only when set.
    read_only: bool,
    /// Shareability (SH, bits 9:8).
    #[bits(2)]
    shareability: u8,
    /// Access flag (AF, bit 10). Must be set to avoid an access-flag fault.
    access_flag: bool,
    /// Not-global (nG, bit 11).
    not_global: bool,
    /// Physical page number, bits 47:12 of the target address.
    #[bits(36)]
    page_number: u64,
    #[bits(5)]
    _reserved: u8,
    /// PXN (bit 53).
    privileged_execute_never: bool,
    /// UXN (bit 54).
    unprivileged_execute_never: bool,
    #[bits(9)]
    _software: u16,
}

/// AArch64 stage-1 descriptor layout.
#[derive(Copy, Clone, Debug, Default)]
pub struct Aarch64Encoding;

/// Inner shareable, matching normal cacheable memory.
const SH_INNER: u8 = 0b11;

impl EntryEncoding for Aarch64Encoding {
    fn encode_table_entry(&self, table: PhysicalPage) -> RawEntry {
        let bits = Aarch64EntryBits::new()
            .with_valid(true)
            .with_table_or_page(true)
            .with_page_number(table.base().as_u64() >> PAGE_SHIFT);
        RawEntry::from_bits(bits.into_bits())
    }

    fn encode_leaf_entry(&self, page: PhysicalPage, prot: Protection) -> RawEntry {
        let bits = Aarch64EntryBits::new()
            .with_valid(true)
            .with_table_or_page(true)
            .with_el0_access(true)
            .with_read_only(!prot.is_writable())
            .with_shareability(SH_INNER)
            .with_access_flag(true)
            .with_not_global(true)
            .with_page_number(page.base().as_u64() >> PAGE_SHIFT)
            .with_privileged_execute_never(true)
            .with_unprivileged_execute_never(true);
        RawEntry::from_bits(bits.into_bits())
    }
}
