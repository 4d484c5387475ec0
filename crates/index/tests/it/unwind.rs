//! Reverse-path scenarios: address unwind, holdings, table rewind.

use crate::utils::{addr, chunks_of, counters_of, ingest, COUNTER, INDEX};
use alloy_primitives::Address;
use explorer_index::{
    counter::last_counter,
    holdings::{list_holdings, record_holding, unwind_holding, Holding},
    reader::address_count,
    rewind_uint64_keyed, IndexError, IndexParams, IndexUnwinder, CHUNK_TERMINATOR_LAST,
};
use explorer_kv::{mem::MemDb, tables, Cursor as _, KvDb, KvRwTx as _, KvTx as _};

fn unwind(db: &MemDb, a: Address, event_id: u64) {
    let tx = db.begin_rw().unwrap();
    let mut u = IndexUnwinder::new(&*tx, INDEX, COUNTER).unwrap();
    u.unwind_address(a, event_id).unwrap();
    drop(u);
    tx.commit().unwrap();
}

#[test]
fn merge_then_unwind_drops_the_tail() {
    let db = MemDb::new();
    let a = addr(0xaa);
    ingest(&db, IndexParams::default(), &[(a, 5), (a, 10)]);
    ingest(&db, IndexParams::default(), &[(a, 7), (a, 20)]);

    unwind(&db, a, 11);

    let tx = db.begin_rw().unwrap();
    assert_eq!(chunks_of(&*tx, a), vec![(CHUNK_TERMINATOR_LAST, vec![5, 7, 10])]);
    assert_eq!(counters_of(&*tx, a), vec![vec![0x02]]);
}

#[test]
fn unwind_to_first_id_restores_identity() {
    let db = MemDb::new();
    let a = addr(0xaa);
    let params = IndexParams::with_chunk_limit(64);
    let touches: Vec<_> = (10..=50u64).map(|id| (a, id)).collect();
    ingest(&db, params, &touches);

    unwind(&db, a, 10);

    let tx = db.begin_rw().unwrap();
    assert_eq!(chunks_of(&*tx, a), vec![]);
    assert_eq!(counters_of(&*tx, a), Vec::<Vec<u8>>::new());
    assert_eq!(address_count(&*tx, COUNTER, a).unwrap(), 0);
}

#[test]
fn unwind_is_idempotent() {
    let db = MemDb::new();
    let a = addr(0xaa);
    let params = IndexParams::with_chunk_limit(64);
    let touches: Vec<_> = (1..=30u64).map(|id| (a, id)).collect();
    ingest(&db, params, &touches);

    unwind(&db, a, 17);
    let tx = db.begin_rw().unwrap();
    let chunks_once = chunks_of(&*tx, a);
    let counters_once = counters_of(&*tx, a);
    drop(tx);

    unwind(&db, a, 17);
    let tx = db.begin_rw().unwrap();
    assert_eq!(chunks_of(&*tx, a), chunks_once);
    assert_eq!(counters_of(&*tx, a), counters_once);
}

#[test]
fn unwind_truncates_the_boundary_chunk() {
    let db = MemDb::new();
    let a = addr(0xaa);
    let params = IndexParams::with_chunk_limit(64); // 8-id chunks
    let touches: Vec<_> = (1..=30u64).map(|id| (a, id)).collect();
    ingest(&db, params, &touches);

    // Ids 1..=30 in chunks of 8: cut points at 8, 16, 24. Unwinding at 20
    // keeps 1..=19; the third chunk {17..24} truncates to {17,18,19} and
    // becomes the last chunk.
    unwind(&db, a, 20);

    let tx = db.begin_rw().unwrap();
    let chunks = chunks_of(&*tx, a);
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].0, 8);
    assert_eq!(chunks[1].0, 16);
    assert_eq!(chunks[2].0, CHUNK_TERMINATOR_LAST);
    assert_eq!(chunks[2].1, vec![17, 18, 19]);

    let counters = counters_of(&*tx, a);
    assert_eq!(counters.len(), 3);
    // Count 19 in a 3-chunk address: sentinel regular form.
    assert_eq!(&counters[2], &last_counter(19).to_vec());
}

#[test]
fn unwind_promotes_the_previous_chunk() {
    let db = MemDb::new();
    let a = addr(0xaa);
    let params = IndexParams::with_chunk_limit(64);
    let touches: Vec<_> = (1..=30u64).map(|id| (a, id)).collect();
    ingest(&db, params, &touches);

    // Unwinding at 17 empties the third chunk and the tail; chunk {9..16}
    // is promoted to last. Two chunks of 16 ids remain, so the sentinel
    // form stays (it is not a single chunk).
    unwind(&db, a, 17);

    let tx = db.begin_rw().unwrap();
    let chunks = chunks_of(&*tx, a);
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].0, 8);
    assert_eq!(chunks[1].0, CHUNK_TERMINATOR_LAST);
    assert_eq!(chunks[1].1, (9..=16).collect::<Vec<_>>());
    assert_eq!(counters_of(&*tx, a).last().unwrap(), &last_counter(16).to_vec());
}

#[test]
fn unwind_collapses_single_small_chunk_to_optimized() {
    let db = MemDb::new();
    let a = addr(0xaa);
    let params = IndexParams::with_chunk_limit(64);
    let touches: Vec<_> = (1..=30u64).map(|id| (a, id)).collect();
    ingest(&db, params, &touches);

    // Unwinding at 9 leaves only {1..8}: one chunk of 8 ids, optimized.
    unwind(&db, a, 9);

    let tx = db.begin_rw().unwrap();
    assert_eq!(chunks_of(&*tx, a), vec![(CHUNK_TERMINATOR_LAST, (1..=8).collect())]);
    assert_eq!(counters_of(&*tx, a), vec![vec![0x07]]);
}

#[test]
fn unwind_of_untouched_address_is_a_noop() {
    let db = MemDb::new();
    let a = addr(0xaa);
    ingest(&db, IndexParams::default(), &[(a, 5)]);

    unwind(&db, addr(0xbb), 1);

    let tx = db.begin_rw().unwrap();
    assert_eq!(chunks_of(&*tx, a), vec![(CHUNK_TERMINATOR_LAST, vec![5])]);
}

#[test]
fn unwind_above_all_ids_changes_nothing() {
    let db = MemDb::new();
    let a = addr(0xaa);
    ingest(&db, IndexParams::default(), &[(a, 5), (a, 10)]);

    unwind(&db, a, 1000);

    let tx = db.begin_rw().unwrap();
    assert_eq!(chunks_of(&*tx, a), vec![(CHUNK_TERMINATOR_LAST, vec![5, 10])]);
    assert_eq!(counters_of(&*tx, a), vec![vec![0x01]]);
}

#[test]
fn holdings_keep_first_acquisition() {
    let db = MemDb::new();
    let table = tables::ERC20_HOLDINGS;
    let holder = addr(0x01);
    let token = addr(0x02);

    let tx = db.begin_rw().unwrap();
    assert!(record_holding(&*tx, table, holder, token, 100).unwrap());
    // A later touch does not regress the record.
    assert!(!record_holding(&*tx, table, holder, token, 200).unwrap());
    assert_eq!(
        list_holdings(&*tx, table, holder).unwrap(),
        vec![Holding { token, first_eth_tx: 100 }]
    );

    // Unwinding a later touch is a no-op.
    unwind_holding(&*tx, table, holder, token, 200).unwrap();
    assert_eq!(list_holdings(&*tx, table, holder).unwrap().len(), 1);

    // Unwinding an earlier touch is a corruption signal.
    assert!(matches!(
        unwind_holding(&*tx, table, holder, token, 50),
        Err(IndexError::DbCorruption { .. })
    ));

    // Unwinding the recorded acquisition deletes it.
    unwind_holding(&*tx, table, holder, token, 100).unwrap();
    assert_eq!(list_holdings(&*tx, table, holder).unwrap(), vec![]);
}

#[test]
fn uint64_table_rewind() {
    let db = MemDb::new();
    let table = tables::WITHDRAWAL_IDX_2_BLOCK;
    let tx = db.begin_rw().unwrap();
    for idx in [10u64, 20, 30, 40] {
        tx.put(table, &idx.to_be_bytes(), &(idx * 100).to_be_bytes()).unwrap();
    }

    assert_eq!(rewind_uint64_keyed(&*tx, table, 25).unwrap(), Some(20));
    assert_eq!(rewind_uint64_keyed(&*tx, table, 20).unwrap(), Some(20));
    assert_eq!(rewind_uint64_keyed(&*tx, table, 5).unwrap(), None);
    let mut cur = tx.cursor(table).unwrap();
    assert_eq!(cur.first().unwrap(), None);
}
