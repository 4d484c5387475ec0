//! Chunk key and value layout.
//!
//! A chunk is keyed `addr (20 B) ‖ terminator (8 B, big-endian)`, where the
//! terminator is the chunk's last event id, or all-ones for the address's
//! final chunk. The value is the packed run of event ids, 8 bytes each,
//! strictly ascending, with no header.

use crate::{counter::CHUNK_TERMINATOR_LAST, IndexError, IndexResult};
use alloy_primitives::Address;
use explorer_kv::Table;

/// Byte length of an address.
pub const ADDR_LENGTH: usize = Address::len_bytes();

/// Byte length of a chunk key.
pub const CHUNK_KEY_LENGTH: usize = ADDR_LENGTH + 8;

/// Builds the chunk key for `addr` with the given terminator.
pub fn chunk_key(addr: Address, terminator: u64) -> [u8; CHUNK_KEY_LENGTH] {
    let mut key = [0u8; CHUNK_KEY_LENGTH];
    key[..ADDR_LENGTH].copy_from_slice(addr.as_slice());
    key[ADDR_LENGTH..].copy_from_slice(&terminator.to_be_bytes());
    key
}

/// Builds the key of `addr`'s final chunk.
pub fn last_chunk_key(addr: Address) -> [u8; CHUNK_KEY_LENGTH] {
    chunk_key(addr, CHUNK_TERMINATOR_LAST)
}

/// Splits a chunk key into its address and terminator.
pub fn split_chunk_key(table: Table, key: &[u8]) -> IndexResult<(Address, u64)> {
    if key.len() != CHUNK_KEY_LENGTH {
        return Err(IndexError::corruption(
            table,
            key,
            format!("chunk key of unexpected length {}", key.len()),
        ));
    }
    let addr = Address::from_slice(&key[..ADDR_LENGTH]);
    let terminator = u64::from_be_bytes(key[ADDR_LENGTH..].try_into().expect("8 bytes"));
    Ok((addr, terminator))
}

/// Packs event ids into a chunk value.
pub fn encode_ids(ids: impl IntoIterator<Item = u64>) -> Vec<u8> {
    let mut out = Vec::new();
    for id in ids {
        out.extend_from_slice(&id.to_be_bytes());
    }
    out
}

/// Unpacks a chunk value into event ids.
pub fn decode_ids(table: Table, key: &[u8], v: &[u8]) -> IndexResult<Vec<u64>> {
    if v.len() % 8 != 0 {
        return Err(IndexError::corruption(
            table,
            key,
            format!("chunk value length {} is not a multiple of 8", v.len()),
        ));
    }
    Ok(v.chunks_exact(8).map(|c| u64::from_be_bytes(c.try_into().expect("8 bytes"))).collect())
}
