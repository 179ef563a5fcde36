//! Cairn wire format — on-wire types for node-to-node block transfer.
//!
//! Framing is a `u32` little-endian length prefix followed by the payload.
//! A request frame carries a [`BlockRequest`]; a response frame carries
//! either exactly the requested number of data bytes, or an empty payload —
//! the null sentinel meaning "cannot serve". A block is never zero-length,
//! so the sentinel is unambiguous. Every fully received request produces
//! exactly one response frame before the next request is read; the client
//! ends the conversation by closing its end of the connection.
//!
//! The request struct is #[repr(C, packed)] with zerocopy derives for
//! deterministic layout and allocation-free serialization.

use std::ops::Range;

use static_assertions::{assert_eq_size, const_assert_eq};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::store::DATA_SIZE;

// ── Block Request ─────────────────────────────────────────────────────────────

/// A request for a contiguous range of the byte store.
///
/// Bootstrap downloads use `length == BLOCK_LEN`; the error corrector asks
/// for single bytes with `length == 1`. Any in-range length is valid on the
/// wire.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct BlockRequest {
    pub start_index: i32,
    pub length: i32,
}

assert_eq_size!(BlockRequest, [u8; 8]);

impl BlockRequest {
    pub fn new(start_index: i32, length: i32) -> Self {
        Self {
            start_index,
            length,
        }
    }

    /// The store range this request covers, or `None` if the request is
    /// out of range: `start_index` must be non-negative, `length` at least
    /// one, and the end must not pass `DATA_SIZE`.
    pub fn range(&self) -> Option<Range<usize>> {
        let start = i64::from(self.start_index);
        let length = i64::from(self.length);
        if start < 0 || length < 1 || start + length > DATA_SIZE as i64 {
            return None;
        }
        Some(start as usize..(start + length) as usize)
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Bytes per bootstrap block. A divisor of `DATA_SIZE`, so the bootstrap
/// queue holds exactly `DATA_SIZE / BLOCK_LEN` requests. This is a protocol
/// constant: peers built with a different block length do not interoperate.
pub const BLOCK_LEN: usize = 10_000;

const_assert_eq!(DATA_SIZE % BLOCK_LEN, 0);

/// Largest payload a frame may carry — a response covering the whole store.
pub const MAX_FRAME: u32 = DATA_SIZE as u32;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame of {0} bytes exceeds the limit of {}", MAX_FRAME)]
    FrameTooLarge(u32),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
