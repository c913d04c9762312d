//! # Control-Channel Protocol
//!
//! Two opcodes, one fixed request struct, one signed response code. The
//! transport that carries the bytes is an external collaborator; this module
//! only defines the layout and decodes it.

/// Opcode for backing a range with fresh zeroed pages.
pub const OP_ALLOCATE: u32 = 1;
/// Opcode for reversing a prior allocation.
pub const OP_FREE: u32 = 2;

/// Recognized operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Opcode {
    Allocate,
    Free,
}

impl Opcode {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            OP_ALLOCATE => Some(Self::Allocate),
            OP_FREE => Some(Self::Free),
            _ => None,
        }
    }
}

/// Response codes reported to the caller.
pub mod code {
    /// Request fully completed.
    pub const SUCCESS: i32 = 0;
    /// The range's mapping state conflicts with the request.
    pub const CONFLICT: i32 = -1;
    /// The page quota would be exceeded.
    pub const PAGE_QUOTA: i32 = -2;
    /// The allocation-count quota would be exceeded.
    pub const ALLOCATION_QUOTA: i32 = -3;
    /// A physical or table page could not be acquired.
    pub const NO_MEMORY: i32 = -12;
    /// The request payload could not be read or describes no valid range.
    pub const BAD_PAYLOAD: i32 = -14;
    /// Unrecognized opcode.
    pub const INVALID_OPERATION: i32 = -22;
}

/// Size of the on-the-wire request struct.
pub const REQUEST_BYTES: usize = 16;

/// Request payload, little endian on the wire:
///
/// ```text
/// | 0..8      | 8..12          | 12..16       |
/// | vaddr u64 | num_pages u32  | write u32    |
/// ```
///
/// `write` is ignored by FREE.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RawRequest {
    pub vaddr: u64,
    pub num_pages: u32,
    pub write: bool,
}

/// Payload-level decode failure.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum WireError {
    #[error("request payload is {0} bytes, expected {REQUEST_BYTES}")]
    Length(usize),
}

impl RawRequest {
    /// Decode one request struct; the payload must be exactly
    /// [`REQUEST_BYTES`] long.
    ///
    /// # Errors
    /// [`WireError::Length`] on a short or oversized payload.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let Some((vaddr_bytes, rest)) = payload.split_first_chunk::<8>() else {
            return Err(WireError::Length(payload.len()));
        };
        let Some((pages_bytes, rest)) = rest.split_first_chunk::<4>() else {
            return Err(WireError::Length(payload.len()));
        };
        let Some((write_bytes, rest)) = rest.split_first_chunk::<4>() else {
            return Err(WireError::Length(payload.len()));
        };
        if !rest.is_empty() {
            return Err(WireError::Length(payload.len()));
        }
        Ok(Self {
            vaddr: u64::from_le_bytes(*vaddr_bytes),
            num_pages: u32::from_le_bytes(*pages_bytes),
            write: u32::from_le_bytes(*write_bytes) != 0,
        })
    }

    /// Encode into the wire layout.
    #[must_use]
    pub fn encode(&self) -> [u8; REQUEST_BYTES] {
        let mut buf = [0u8; REQUEST_BYTES];
        buf[0..8].copy_from_slice(&self.vaddr.to_le_bytes());
        buf[8..12].copy_from_slice(&self.num_pages.to_le_bytes());
        buf[12..16].copy_from_slice(&u32::from(self.write).to_le_bytes());
        buf
    }
}
