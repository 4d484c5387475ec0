use alloy_primitives::Address;
use explorer_index::{
    chunk::{decode_ids, split_chunk_key, ADDR_LENGTH},
    CancelToken, IndexHandler, IndexParams, ResourceAwareIndexHandler, StandardIndexHandler,
};
use explorer_kv::{mem::MemDb, tables, Cursor as _, DupCursor as _, KvDb, KvRwTx, KvTx as _, Table};

pub(crate) const INDEX: Table = tables::ERC20_TRANSFER_INDEX;
pub(crate) const COUNTER: Table = tables::ERC20_TRANSFER_COUNTER;

pub(crate) fn addr(b: u8) -> Address {
    Address::repeat_byte(b)
}

pub(crate) fn handler(params: IndexParams) -> StandardIndexHandler {
    StandardIndexHandler::new("test", INDEX, COUNTER, params, CancelToken::new())
}

/// Touches every `(addr, id)` pair and runs the flush+load cycle in one
/// committed transaction.
pub(crate) fn ingest(db: &MemDb, params: IndexParams, touches: &[(Address, u64)]) {
    let mut h = handler(params);
    for (a, id) in touches {
        h.touch_index(*a, *id);
    }
    let tx = db.begin_rw().unwrap();
    h.flush(true).unwrap();
    h.load(&*tx).unwrap();
    tx.commit().unwrap();
}

/// All chunks of `a` in key order as `(terminator, ids)`.
pub(crate) fn chunks_of(tx: &dyn KvRwTx, a: Address) -> Vec<(u64, Vec<u64>)> {
    let mut cur = tx.cursor(INDEX).unwrap();
    let mut out = Vec::new();
    let mut pair = cur.seek(a.as_slice()).unwrap();
    while let Some((k, v)) = pair {
        if !k.starts_with(a.as_slice()) || k.len() != ADDR_LENGTH + 8 {
            break;
        }
        let (_, term) = split_chunk_key(INDEX, &k).unwrap();
        out.push((term, decode_ids(INDEX, &k, &v).unwrap()));
        pair = cur.next().unwrap();
    }
    out
}

/// All raw counter records of `a` in dup order.
pub(crate) fn counters_of(tx: &dyn KvRwTx, a: Address) -> Vec<Vec<u8>> {
    let mut cur = tx.cursor_dup(COUNTER).unwrap();
    let mut out = Vec::new();
    let mut pair = cur.seek_exact(a.as_slice()).unwrap();
    while let Some((_, v)) = pair {
        out.push(v);
        pair = cur.next_dup().unwrap();
    }
    out
}
