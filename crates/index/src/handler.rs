//! Index handler: the staging pipeline between event analysis and the
//! chunked store.
//!
//! During a stage run the handler buffers touched event ids as in-memory
//! bitmaps keyed by address. Once the serialized size of the buffer passes
//! the flush threshold (or on the final forced flush), each pair is dumped
//! into the external sorter. The load phase drains the sorter in address
//! order and merges every delta into the live chunk and counter tables.

use crate::{
    chunk::{chunk_key, decode_ids, last_chunk_key},
    counter::{last_counter, optimized_counter, regular_counter, CounterRecord, CHUNK_TERMINATOR_LAST, OPTIMIZED_COUNTER_MAX},
    CancelToken, IndexError, IndexParams, IndexResult,
};
use alloy_primitives::Address;
use explorer_etl::Collector;
use explorer_kv::{Cursor as _, DupCursor as _, KvRwTx, KvTx as _, RwCursor as _, RwDupCursor as _, Table};
use roaring::RoaringTreemap;
use std::collections::HashMap;
use tracing::debug;

/// Capacity-aware part of the handler lifecycle: spill and batch-load.
pub trait ResourceAwareIndexHandler {
    /// Spills buffered bitmaps to the external sorter if `force` or the
    /// flush threshold is reached.
    fn flush(&mut self, force: bool) -> IndexResult<()>;
    /// Drains the sorter into the open transaction, merging and
    /// re-chunking every address.
    fn load(&mut self, tx: &dyn KvRwTx) -> IndexResult<()>;
}

/// An `IndexHandler` handles one session of address indexing.
pub trait IndexHandler: ResourceAwareIndexHandler {
    /// Appends `id` to `addr`'s buffered event set. Adding an id twice is
    /// a no-op.
    fn touch_index(&mut self, addr: Address, id: u64);
}

/// Standard implementation of [`IndexHandler`] over one index/counter
/// table pair. Not thread-safe; one stage run drives it from one thread.
pub struct StandardIndexHandler {
    prefix: &'static str,
    index_table: Table,
    counter_table: Table,
    params: IndexParams,
    collector: Collector,
    bitmaps: HashMap<Address, RoaringTreemap>,
    cancel: CancelToken,
}

impl std::fmt::Debug for StandardIndexHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardIndexHandler")
            .field("index_table", &self.index_table.name)
            .field("counter_table", &self.counter_table.name)
            .field("buffered_addrs", &self.bitmaps.len())
            .finish()
    }
}

impl StandardIndexHandler {
    /// Creates a handler writing to the given index/counter table pair.
    pub fn new(
        prefix: &'static str,
        index_table: Table,
        counter_table: Table,
        params: IndexParams,
        cancel: CancelToken,
    ) -> Self {
        Self {
            prefix,
            index_table,
            counter_table,
            params,
            collector: Collector::new(prefix, explorer_etl::BUFFER_OPTIMAL_SIZE),
            bitmaps: HashMap::new(),
            cancel,
        }
    }

    fn needs_flush(&self) -> bool {
        let mut size = 0u64;
        for bm in self.bitmaps.values() {
            size += bm.serialized_size() as u64;
            if size >= self.params.flush_threshold {
                return true;
            }
        }
        false
    }

    fn spill_bitmaps(&mut self) -> IndexResult<()> {
        let mut buf = Vec::new();
        for (addr, bm) in &self.bitmaps {
            buf.clear();
            bm.serialize_into(&mut buf).map_err(|e| IndexError::Bitmap(e.to_string()))?;
            self.collector.collect(addr.as_slice(), &buf)?;
        }
        self.bitmaps.clear();
        Ok(())
    }
}

impl IndexHandler for StandardIndexHandler {
    fn touch_index(&mut self, addr: Address, id: u64) {
        self.bitmaps.entry(addr).or_default().insert(id);
    }
}

impl ResourceAwareIndexHandler for StandardIndexHandler {
    fn flush(&mut self, force: bool) -> IndexResult<()> {
        if force || self.needs_flush() {
            self.spill_bitmaps()?;
        }
        Ok(())
    }

    fn load(&mut self, tx: &dyn KvRwTx) -> IndexResult<()> {
        let collector = std::mem::replace(
            &mut self.collector,
            Collector::new(self.prefix, explorer_etl::BUFFER_OPTIMAL_SIZE),
        );
        let mut counter_cur = tx.cursor_dup_rw(self.counter_table)?;

        let index_table = self.index_table;
        let counter_table = self.counter_table;
        let chunk_limit = self.params.chunk_limit;
        let cancel = self.cancel.clone();

        collector.load::<IndexError, _>(|k, v| {
            if cancel.is_cancelled() {
                return Err(IndexError::Stopped);
            }
            let addr = Address::from_slice(k);

            // Bitmap for the address key.
            let mut bm = RoaringTreemap::deserialize_from(v)
                .map_err(|e| IndexError::Bitmap(e.to_string()))?;

            // The last chunk may be partial; merging it is mandatory even
            // when the delta alone would fit a single chunk.
            merge_last_chunk(tx, index_table, addr, &mut bm)?;

            // Recover and delete the last counter; it is rewritten below.
            let mut prev_count = 0u64;
            let mut is_unique_chunk = false;
            let had_counter = counter_cur.seek_exact(addr.as_slice())?.is_some();
            if had_counter {
                let last = counter_cur.last_dup()?.ok_or_else(|| {
                    IndexError::corruption(counter_table, addr.as_slice(), "empty counter dup set")
                })?;
                let record = CounterRecord::decode(counter_table, addr.as_slice(), &last)?;
                match record {
                    CounterRecord::Optimized { .. } => {
                        // The optimized form must be an address's only record.
                        if counter_cur.count_duplicates()? != 1 {
                            return Err(IndexError::corruption(
                                counter_table,
                                addr.as_slice(),
                                "optimized counter with duplicates",
                            ));
                        }
                        is_unique_chunk = true;
                    }
                    CounterRecord::Regular { terminator, .. } => {
                        if terminator != CHUNK_TERMINATOR_LAST {
                            return Err(IndexError::corruption(
                                counter_table,
                                addr.as_slice(),
                                format!("last counter chunk is not the sentinel: {terminator:#x}"),
                            ));
                        }
                    }
                }

                counter_cur.delete_current()?;

                // Regular chunk: rewind to the counter before the deleted one.
                if !is_unique_chunk {
                    if let Some((_, prev)) = counter_cur.prev_dup()? {
                        prev_count =
                            CounterRecord::decode(counter_table, addr.as_slice(), &prev)?.count();
                    }
                }
            }

            // Write the chunk(s); cut to fit under the page restriction.
            if (!had_counter || is_unique_chunk) && prev_count + bm.len() <= OPTIMIZED_COUNTER_MAX {
                write_optimized_chunk_and_counter(
                    tx,
                    index_table,
                    counter_table,
                    addr,
                    &bm,
                    prev_count,
                )?;
            } else {
                write_regular_chunks_and_counters(
                    tx,
                    index_table,
                    counter_table,
                    addr,
                    &bm,
                    prev_count,
                    chunk_limit,
                )?;
            }

            Ok(())
        })?;

        debug!(target: "index::handler", prefix = self.prefix, "loaded sorted bitmaps");
        Ok(())
    }
}

/// Reads the last index chunk for `addr` (if any) and merges its ids into
/// the bitmap being processed.
fn merge_last_chunk(
    tx: &dyn KvRwTx,
    index_table: Table,
    addr: Address,
    bm: &mut RoaringTreemap,
) -> IndexResult<()> {
    let key = last_chunk_key(addr);
    let Some(v) = tx.get(index_table, &key)? else { return Ok(()) };
    for id in decode_ids(index_table, &key, &v)? {
        bm.insert(id);
    }
    Ok(())
}

fn write_optimized_chunk_and_counter(
    tx: &dyn KvRwTx,
    index_table: Table,
    counter_table: Table,
    addr: Address,
    bm: &RoaringTreemap,
    prev_count: u64,
) -> IndexResult<()> {
    let mut buf = Vec::with_capacity(bm.len() as usize * 8);
    for id in bm {
        buf.extend_from_slice(&id.to_be_bytes());
    }
    tx.put(index_table, &last_chunk_key(addr), &buf)?;

    let count = prev_count + (buf.len() / 8) as u64;
    tx.put(counter_table, addr.as_slice(), &optimized_counter(count))?;
    Ok(())
}

fn write_regular_chunks_and_counters(
    tx: &dyn KvRwTx,
    index_table: Table,
    counter_table: Table,
    addr: Address,
    bm: &RoaringTreemap,
    mut prev_count: u64,
    chunk_limit: usize,
) -> IndexResult<()> {
    let total = bm.len();
    let mut seen = 0u64;
    let mut buf = Vec::with_capacity(chunk_limit + 8);
    for id in bm {
        seen += 1;
        buf.extend_from_slice(&id.to_be_bytes());

        // cut?
        let is_last = seen == total;
        if is_last || buf.len() >= chunk_limit {
            let terminator = if is_last { CHUNK_TERMINATOR_LAST } else { id };
            tx.put(index_table, &chunk_key(addr, terminator), &buf)?;

            prev_count += (buf.len() / 8) as u64;
            let counter = if is_last {
                last_counter(prev_count)
            } else {
                regular_counter(prev_count, terminator)
            };
            tx.put(counter_table, addr.as_slice(), &counter)?;

            buf.clear();
        }
    }
    Ok(())
}
