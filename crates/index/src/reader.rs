//! Read policy over the chunked store: count and rank pagination.
//!
//! `count` is one dup-cursor seek plus a decode of the largest counter
//! record. `page_by_rank` walks counter records until the first whose
//! cumulative count covers the requested rank, then decodes chunks from
//! that point on, skipping into the first one.

use crate::{
    chunk::{chunk_key, decode_ids, ADDR_LENGTH},
    counter::CounterRecord,
    IndexError, IndexResult,
};
use alloy_primitives::Address;
use explorer_kv::{Cursor as _, DupCursor as _, KvTx, Table};

/// Number of events that touched `addr`.
pub fn address_count(tx: &dyn KvTx, counter_table: Table, addr: Address) -> IndexResult<u64> {
    let mut cur = tx.cursor_dup(counter_table)?;
    if cur.seek_exact(addr.as_slice())?.is_none() {
        return Ok(0);
    }
    let last = cur.last_dup()?.ok_or_else(|| {
        IndexError::corruption(counter_table, addr.as_slice(), "empty counter dup set")
    })?;
    Ok(CounterRecord::decode(counter_table, addr.as_slice(), &last)?.count())
}

/// Event ids of ranks `idx .. idx + take` for `addr`, in order of
/// occurrence. Returns fewer than `take` ids when the address's set ends.
pub fn page_by_rank(
    tx: &dyn KvTx,
    index_table: Table,
    counter_table: Table,
    addr: Address,
    idx: u64,
    take: u64,
) -> IndexResult<Vec<u64>> {
    if take == 0 {
        return Ok(Vec::new());
    }

    // Find the first counter record whose cumulative count covers rank idx.
    let mut counters = tx.cursor_dup(counter_table)?;
    let Some((_, first)) = counters.seek_exact(addr.as_slice())? else {
        return Ok(Vec::new());
    };
    let target = idx + 1;
    let mut prev_count = 0u64;
    let mut record = CounterRecord::decode(counter_table, addr.as_slice(), &first)?;
    loop {
        if record.count() >= target {
            break;
        }
        prev_count = record.count();
        match counters.next_dup()? {
            Some((_, v)) => {
                record = CounterRecord::decode(counter_table, addr.as_slice(), &v)?;
            }
            // idx is past the address's total count.
            None => return Ok(Vec::new()),
        }
    }

    // Decode chunks starting at the record's chunk, skipping into it.
    let mut out = Vec::with_capacity(take as usize);
    let mut skip = (idx - prev_count) as usize;
    let mut chunks = tx.cursor(index_table)?;
    let key = chunk_key(addr, record.terminator());
    let mut pair = chunks.seek_exact(&key)?.ok_or_else(|| {
        IndexError::corruption(
            index_table,
            addr.as_slice(),
            format!("missing chunk for counter terminator {:#x}", record.terminator()),
        )
    })?;

    loop {
        let ids = decode_ids(index_table, &pair.0, &pair.1)?;
        for id in ids.into_iter().skip(skip) {
            out.push(id);
            if out.len() as u64 == take {
                return Ok(out);
            }
        }
        skip = 0;

        // Successive chunks of the same address are key-adjacent.
        match chunks.next()? {
            Some(next) if next.0.len() > ADDR_LENGTH && next.0[..ADDR_LENGTH] == *addr.as_slice() => {
                pair = next;
            }
            _ => return Ok(out),
        }
    }
}
