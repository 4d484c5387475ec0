//! Reverse-direction primitives over the chunked store.
//!
//! When the canonical chain reorganizes, every id appended past the unwind
//! point must disappear so the index again matches a prefix of the event
//! stream. `unwind_address` is idempotent: repeating it with the same
//! event id leaves the state of the first call.

use crate::{
    chunk::{chunk_key, decode_ids, encode_ids, last_chunk_key},
    counter::{last_counter, optimized_counter, CounterRecord, CHUNK_TERMINATOR_LAST, OPTIMIZED_COUNTER_MAX},
    IndexError, IndexResult,
};
use alloy_primitives::Address;
use explorer_kv::{Cursor as _, DupCursor as _, KvRwTx, RwCursor, RwDupCursor, Table};

/// Unwinder over one index/counter table pair. Holds one write cursor per
/// table for its lifetime; dropping it releases them.
pub struct IndexUnwinder<'tx> {
    index_table: Table,
    counter_table: Table,
    target: Box<dyn RwCursor + 'tx>,
    counter: Box<dyn RwDupCursor + 'tx>,
}

impl std::fmt::Debug for IndexUnwinder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexUnwinder")
            .field("index_table", &self.index_table.name)
            .field("counter_table", &self.counter_table.name)
            .finish()
    }
}

impl<'tx> IndexUnwinder<'tx> {
    /// Opens cursors over the pair of tables.
    pub fn new(
        tx: &'tx dyn KvRwTx,
        index_table: Table,
        counter_table: Table,
    ) -> IndexResult<Self> {
        Ok(Self {
            index_table,
            counter_table,
            target: tx.cursor_rw(index_table)?,
            counter: tx.cursor_dup_rw(counter_table)?,
        })
    }

    /// Ensures `addr`'s chunk set contains no id `>= event_id`, shrinking
    /// chunks and counters accordingly.
    pub fn unwind_address(&mut self, addr: Address, event_id: u64) -> IndexResult<()> {
        let addr_b = addr.as_slice();

        // Counter records, chronological. An address with no counter has
        // no events; nothing to do.
        if self.counter.seek_exact(addr_b)?.is_none() {
            return Ok(());
        }
        let mut records: Vec<(Vec<u8>, CounterRecord)> = Vec::new();
        let mut pair = self.counter.seek_exact(addr_b)?;
        while let Some((_, v)) = pair {
            records.push((v.clone(), CounterRecord::decode(self.counter_table, addr_b, &v)?));
            pair = self.counter.next_dup()?;
        }
        if records.len() > 1 && records.iter().any(|(_, r)| r.is_optimized()) {
            return Err(IndexError::corruption(
                self.counter_table,
                addr_b,
                "optimized counter with duplicates",
            ));
        }

        // First chunk that can hold ids >= event_id. The final chunk's
        // terminator is the sentinel, so a boundary always exists.
        let mut prev_count = 0u64;
        let mut boundary = None;
        for (i, (_, rec)) in records.iter().enumerate() {
            if rec.terminator() >= event_id {
                boundary = Some(i);
                break;
            }
            prev_count = rec.count();
        }
        let Some(boundary) = boundary else { return Ok(()) };

        // Truncate the boundary chunk to ids below the unwind id.
        let bterm = records[boundary].1.terminator();
        let bkey = chunk_key(addr, bterm);
        let (_, bval) = self.target.seek_exact(&bkey)?.ok_or_else(|| {
            IndexError::corruption(
                self.index_table,
                addr_b,
                format!("missing chunk for counter terminator {bterm:#x}"),
            )
        })?;
        let kept: Vec<u64> =
            decode_ids(self.index_table, &bkey, &bval)?.into_iter().filter(|id| *id < event_id).collect();

        // Drop the boundary chunk and everything after it, counters included.
        for (raw, rec) in &records[boundary..] {
            let key = chunk_key(addr, rec.terminator());
            if self.target.seek_exact(&key)?.is_some() {
                self.target.delete_current()?;
            }
            self.counter.delete_exact(addr_b, raw)?;
        }

        if kept.is_empty() {
            if boundary == 0 {
                // Every event of the address was unwound.
                return Ok(());
            }
            // The chunk before the boundary becomes the new last chunk:
            // rewrite its key to the sentinel and its counter to match.
            let (prev_raw, prev_rec) = records[boundary - 1].clone();
            let prev_key = chunk_key(addr, prev_rec.terminator());
            let (_, prev_val) = self.target.seek_exact(&prev_key)?.ok_or_else(|| {
                IndexError::corruption(
                    self.index_table,
                    addr_b,
                    format!("missing chunk for counter terminator {:#x}", prev_rec.terminator()),
                )
            })?;
            self.target.delete_current()?;
            self.target.put(&last_chunk_key(addr), &prev_val)?;
            self.counter.delete_exact(addr_b, &prev_raw)?;
            self.write_last_counter(addr, prev_rec.count(), boundary == 1)?;
        } else {
            self.target.put(&last_chunk_key(addr), &encode_ids(kept.iter().copied()))?;
            let count = prev_count + kept.len() as u64;
            self.write_last_counter(addr, count, boundary == 0)?;
        }

        Ok(())
    }

    /// Writes the counter for the (new) last chunk, collapsing to the
    /// optimized form when a single small chunk remains.
    fn write_last_counter(&mut self, addr: Address, count: u64, is_only_chunk: bool) -> IndexResult<()> {
        let value = if is_only_chunk && count <= OPTIMIZED_COUNTER_MAX {
            optimized_counter(count).to_vec()
        } else {
            last_counter(count).to_vec()
        };
        self.counter.put(addr.as_slice(), &value)?;
        Ok(())
    }
}

/// Truncates a table keyed by big-endian `u64` to entries with key
/// `<= key`. Returns the largest surviving key, if any.
pub fn rewind_uint64_keyed(tx: &dyn KvRwTx, table: Table, key: u64) -> IndexResult<Option<u64>> {
    let mut cur = tx.cursor_rw(table)?;
    let mut pair = cur.last()?;
    while let Some((k, _)) = pair {
        if k.len() != 8 {
            return Err(IndexError::corruption(table, &k, "key of unexpected length"));
        }
        let current = u64::from_be_bytes(k[..].try_into().expect("8 bytes"));
        if current <= key {
            return Ok(Some(current));
        }
        cur.delete_current()?;
        pair = cur.prev()?;
    }
    Ok(None)
}

const _: () = {
    // The sentinel is the maximum u64; the boundary search in
    // `unwind_address` relies on it comparing greater-or-equal to every
    // event id.
    assert!(CHUNK_TERMINATOR_LAST == u64::MAX);
};
