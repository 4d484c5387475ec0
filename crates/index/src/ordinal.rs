//! Dense global-ordinal tables.
//!
//! Contract classifier results are stored as `ordinal -> blockNum ‖ addr`,
//! where ordinals form the interval `[1, N]` in match order. Pagination
//! across *all* matches of a kind is then a single ordered lookup, and the
//! last key doubles as the total count.

use crate::{chunk::ADDR_LENGTH, IndexError, IndexResult};
use alloy_primitives::Address;
use explorer_kv::{Cursor as _, KvRwTx, KvTx, RwCursor as _, Table};

/// Max results a single page request may ask for.
pub const MAX_MATCH_COUNT: u64 = 500;

const ENTRY_LEN: usize = 8 + ADDR_LENGTH;

/// One decoded ordinal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrdinalEntry {
    /// 1-based position in the kind's match stream.
    pub ordinal: u64,
    /// Block the match was produced at.
    pub block_num: u64,
    /// The matched address.
    pub addr: Address,
}

fn decode_entry(table: Table, k: &[u8], v: &[u8]) -> IndexResult<OrdinalEntry> {
    if k.len() != 8 || v.len() < ENTRY_LEN {
        return Err(IndexError::corruption(
            table,
            k,
            format!("ordinal entry of unexpected shape (key {} B, value {} B)", k.len(), v.len()),
        ));
    }
    Ok(OrdinalEntry {
        ordinal: u64::from_be_bytes(k.try_into().expect("8 bytes")),
        block_num: u64::from_be_bytes(v[..8].try_into().expect("8 bytes")),
        addr: Address::from_slice(&v[8..ENTRY_LEN]),
    })
}

/// Total number of matches recorded for the kind.
pub fn ordinal_count(tx: &dyn KvTx, table: Table) -> IndexResult<u64> {
    let mut cur = tx.cursor(table)?;
    match cur.last()? {
        Some((k, _)) if k.len() == 8 => {
            Ok(u64::from_be_bytes(k[..].try_into().expect("8 bytes")))
        }
        Some((k, _)) => {
            Err(IndexError::corruption(table, &k, "ordinal key of unexpected length"))
        }
        None => Ok(0),
    }
}

/// Appends matches with dense, monotonically increasing ordinals.
#[derive(Debug)]
pub struct OrdinalAppender {
    table: Table,
    next: u64,
}

impl OrdinalAppender {
    /// Positions the appender after the kind's current last ordinal.
    pub fn new(tx: &dyn KvTx, table: Table) -> IndexResult<Self> {
        Ok(Self { table, next: ordinal_count(tx, table)? + 1 })
    }

    /// Appends one match and returns its ordinal.
    pub fn append(&mut self, tx: &dyn KvRwTx, block_num: u64, addr: Address) -> IndexResult<u64> {
        let ordinal = self.next;
        let mut v = [0u8; ENTRY_LEN];
        v[..8].copy_from_slice(&block_num.to_be_bytes());
        v[8..].copy_from_slice(addr.as_slice());
        tx.put(self.table, &ordinal.to_be_bytes(), &v)?;
        self.next += 1;
        Ok(ordinal)
    }
}

/// Matches `idx .. idx + count` (0-based) in match order.
pub fn ordinal_page(
    tx: &dyn KvTx,
    table: Table,
    idx: u64,
    count: u64,
) -> IndexResult<Vec<OrdinalEntry>> {
    if count > MAX_MATCH_COUNT {
        return Err(IndexError::PageLimit(MAX_MATCH_COUNT));
    }

    let mut cur = tx.cursor(table)?;
    let mut out = Vec::with_capacity(count as usize);
    let mut pair = cur.seek(&(idx + 1).to_be_bytes())?;
    while let Some((k, v)) = pair {
        if out.len() as u64 == count {
            break;
        }
        out.push(decode_entry(table, &k, &v)?);
        pair = cur.next()?;
    }
    Ok(out)
}

/// First ordinal whose entry's block is `>= block`, found by binary search
/// over the dense keyspace. `None` when every entry is older.
pub fn first_ordinal_at_block(
    tx: &dyn KvTx,
    table: Table,
    block: u64,
) -> IndexResult<Option<u64>> {
    let total = ordinal_count(tx, table)?;
    if total == 0 {
        return Ok(None);
    }
    let mut lo = 1u64;
    let mut hi = total;
    let mut found = None;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let v = tx.get(table, &mid.to_be_bytes())?.ok_or_else(|| {
            IndexError::corruption(table, &mid.to_be_bytes(), "hole in dense ordinal table")
        })?;
        let entry = decode_entry(table, &mid.to_be_bytes(), &v)?;
        if entry.block_num >= block {
            found = Some(mid);
            if mid == 1 {
                break;
            }
            hi = mid - 1;
        } else {
            lo = mid + 1;
        }
    }
    Ok(found)
}

/// Visits every entry whose block is within `[start_block, end_block]`,
/// in ordinal order.
pub fn for_each_in_block_range(
    tx: &dyn KvTx,
    table: Table,
    start_block: u64,
    end_block: u64,
    mut f: impl FnMut(OrdinalEntry) -> IndexResult<()>,
) -> IndexResult<()> {
    let Some(first) = first_ordinal_at_block(tx, table, start_block)? else { return Ok(()) };
    let mut cur = tx.cursor(table)?;
    let mut pair = cur.seek(&first.to_be_bytes())?;
    while let Some((k, v)) = pair {
        let entry = decode_entry(table, &k, &v)?;
        if entry.block_num > end_block {
            break;
        }
        f(entry)?;
        pair = cur.next()?;
    }
    Ok(())
}

/// Deletes every entry first seen after `block`, newest first, invoking
/// `on_drop` with each dropped address. Returns how many were dropped.
pub fn rewind_above_block(
    tx: &dyn KvRwTx,
    table: Table,
    block: u64,
    mut on_drop: impl FnMut(Address) -> IndexResult<()>,
) -> IndexResult<u64> {
    let mut cur = tx.cursor_rw(table)?;
    let mut dropped = 0u64;
    let mut pair = cur.last()?;
    while let Some((k, v)) = pair {
        let entry = decode_entry(table, &k, &v)?;
        if entry.block_num <= block {
            break;
        }
        cur.delete_current()?;
        on_drop(entry.addr)?;
        dropped += 1;
        pair = cur.prev()?;
    }
    Ok(dropped)
}
