//! Per-address classifier attribute bitmaps.
//!
//! Each address that matched at least one classifier carries a compressed
//! set of attribute bits (see the `ADDR_ATTR_*` constants in the table
//! catalog). Bits accumulate across classifier stages and are cleared
//! again when a classification is unwound.

use crate::{IndexError, IndexResult};
use alloy_primitives::Address;
use explorer_kv::{tables, KvRwTx, KvTx};
use roaring::RoaringTreemap;

fn decode(addr: Address, v: &[u8]) -> IndexResult<RoaringTreemap> {
    RoaringTreemap::deserialize_from(v).map_err(|_| {
        IndexError::corruption(tables::ADDR_ATTRIBUTES, addr.as_slice(), "malformed attribute bitmap")
    })
}

fn encode(bm: &RoaringTreemap) -> IndexResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(bm.serialized_size());
    bm.serialize_into(&mut buf).map_err(|e| IndexError::Bitmap(e.to_string()))?;
    Ok(buf)
}

/// The attribute set of `addr`; empty if it never matched a classifier.
pub fn read_attributes(tx: &dyn KvTx, addr: Address) -> IndexResult<RoaringTreemap> {
    match tx.get(tables::ADDR_ATTRIBUTES, addr.as_slice())? {
        Some(v) => decode(addr, &v),
        None => Ok(RoaringTreemap::new()),
    }
}

/// True if `addr` carries the attribute `bit`.
pub fn has_attribute(tx: &dyn KvTx, addr: Address, bit: u64) -> IndexResult<bool> {
    Ok(read_attributes(tx, addr)?.contains(bit))
}

/// Merges `bits` into `addr`'s attribute set.
pub fn merge_attributes(tx: &dyn KvRwTx, addr: Address, bits: &RoaringTreemap) -> IndexResult<()> {
    let mut bm = read_attributes(tx, addr)?;
    bm |= bits;
    tx.put(tables::ADDR_ATTRIBUTES, addr.as_slice(), &encode(&bm)?)
        .map_err(IndexError::from)
}

/// Removes `bits` from `addr`'s attribute set, deleting the record when
/// nothing remains.
pub fn remove_attributes(tx: &dyn KvRwTx, addr: Address, bits: &RoaringTreemap) -> IndexResult<()> {
    let mut bm = read_attributes(tx, addr)?;
    if bm.is_empty() {
        return Ok(());
    }
    bm -= bits;
    if bm.is_empty() {
        tx.delete(tables::ADDR_ATTRIBUTES, addr.as_slice(), None)?;
    } else {
        tx.put(tables::ADDR_ATTRIBUTES, addr.as_slice(), &encode(&bm)?)?;
    }
    Ok(())
}
