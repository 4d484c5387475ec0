//! Counter record codec.
//!
//! Each chunk of an address has one counter record holding the cumulative
//! event count up to and including that chunk, dup-sorted under the
//! address key. Three forms exist, all big-endian and frozen:
//!
//! - *optimized*: 1 byte holding `count - 1`, for addresses with a single
//!   chunk of at most 256 events;
//! - *regular*: `count (8 B) ‖ chunk terminator (8 B)` for every non-final
//!   chunk;
//! - *last sentinel*: `count (8 B) ‖ 0xFFFF_FFFF_FFFF_FFFF` for the final
//!   chunk of a multi-chunk address.
//!
//! The decoder dispatches on record length alone; there is no version byte.

use crate::{IndexError, IndexResult};
use explorer_kv::Table;

/// Terminator marking an address's final chunk (and the sentinel counter).
pub const CHUNK_TERMINATOR_LAST: u64 = u64::MAX;

/// Largest event count representable by the optimized one-byte form.
pub const OPTIMIZED_COUNTER_MAX: u64 = 256;

/// Byte length of a regular or sentinel counter record.
pub const COUNTER_RECORD_LEN: usize = 16;

/// Serializes the optimized one-byte form. `count` must be in `1..=256`.
pub fn optimized_counter(count: u64) -> [u8; 1] {
    debug_assert!((1..=OPTIMIZED_COUNTER_MAX).contains(&count));
    [(count - 1) as u8]
}

/// Serializes a regular counter record for a non-final chunk.
pub fn regular_counter(count: u64, chunk_terminator: u64) -> [u8; COUNTER_RECORD_LEN] {
    let mut v = [0u8; COUNTER_RECORD_LEN];
    v[..8].copy_from_slice(&count.to_be_bytes());
    v[8..].copy_from_slice(&chunk_terminator.to_be_bytes());
    v
}

/// Serializes the sentinel counter record for the final chunk.
pub fn last_counter(count: u64) -> [u8; COUNTER_RECORD_LEN] {
    regular_counter(count, CHUNK_TERMINATOR_LAST)
}

/// A decoded counter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterRecord {
    /// One-byte form: a single chunk of `count` events.
    Optimized {
        /// Event count, `1..=256`.
        count: u64,
    },
    /// Sixteen-byte form.
    Regular {
        /// Cumulative event count up to and including this chunk.
        count: u64,
        /// The chunk's terminator; [`CHUNK_TERMINATOR_LAST`] for the final
        /// chunk.
        terminator: u64,
    },
}

impl CounterRecord {
    /// Decodes a counter record, dispatching on length.
    pub fn decode(table: Table, addr: &[u8], v: &[u8]) -> IndexResult<Self> {
        match v.len() {
            1 => Ok(Self::Optimized { count: u64::from(v[0]) + 1 }),
            COUNTER_RECORD_LEN => {
                let count = u64::from_be_bytes(v[..8].try_into().expect("8 bytes"));
                let terminator = u64::from_be_bytes(v[8..].try_into().expect("8 bytes"));
                Ok(Self::Regular { count, terminator })
            }
            n => Err(IndexError::corruption(
                table,
                addr,
                format!("counter record of unexpected length {n}"),
            )),
        }
    }

    /// Cumulative event count up to and including this record's chunk.
    pub const fn count(&self) -> u64 {
        match self {
            Self::Optimized { count } | Self::Regular { count, .. } => *count,
        }
    }

    /// The chunk terminator this record points at. The optimized form
    /// always references the final chunk.
    pub const fn terminator(&self) -> u64 {
        match self {
            Self::Optimized { .. } => CHUNK_TERMINATOR_LAST,
            Self::Regular { terminator, .. } => *terminator,
        }
    }

    /// True for the one-byte optimized form.
    pub const fn is_optimized(&self) -> bool {
        matches!(self, Self::Optimized { .. })
    }

    /// Re-encodes the record to its stored bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Optimized { count } => optimized_counter(*count).to_vec(),
            Self::Regular { count, terminator } => regular_counter(*count, *terminator).to_vec(),
        }
    }
}
