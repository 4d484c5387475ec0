//! Forward-path scenarios: buffering, flush/load, merge-and-rechunk.

use crate::utils::{addr, chunks_of, counters_of, handler, ingest, COUNTER, INDEX};
use explorer_index::{
    counter::last_counter, reader::address_count, CancelToken, IndexError, IndexHandler,
    IndexParams, ResourceAwareIndexHandler, StandardIndexHandler, CHUNK_TERMINATOR_LAST,
};
use explorer_kv::{mem::MemDb, KvDb};
use std::collections::BTreeSet;

#[test]
fn tiny_address_collapses_to_optimized() {
    let db = MemDb::new();
    let a = addr(0xaa);
    ingest(&db, IndexParams::default(), &[(a, 7), (a, 42), (a, 99)]);

    let tx = db.begin_rw().unwrap();
    let chunks = chunks_of(&*tx, a);
    assert_eq!(chunks, vec![(CHUNK_TERMINATOR_LAST, vec![7, 42, 99])]);
    assert_eq!(counters_of(&*tx, a), vec![vec![0x02]]);
}

#[test]
fn exactly_256_events_stay_optimized() {
    let db = MemDb::new();
    let a = addr(0xaa);
    let touches: Vec<_> = (1..=256u64).map(|id| (a, id)).collect();
    ingest(&db, IndexParams::default(), &touches);

    let tx = db.begin_rw().unwrap();
    let chunks = chunks_of(&*tx, a);
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].0, CHUNK_TERMINATOR_LAST);
    assert_eq!(chunks[0].1.len(), 256);
    assert_eq!(counters_of(&*tx, a), vec![vec![0xff]]);
}

#[test]
fn events_past_256_go_regular_in_one_chunk() {
    let db = MemDb::new();
    let a = addr(0xaa);
    let touches: Vec<_> = (1..=257u64).map(|id| (a, id)).collect();
    ingest(&db, IndexParams::default(), &touches);

    let tx = db.begin_rw().unwrap();
    let chunks = chunks_of(&*tx, a);
    // 257 ids = 2056 bytes, still under the chunk limit: one sentinel chunk.
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].0, CHUNK_TERMINATOR_LAST);
    assert_eq!(chunks[0].1.len(), 257);
    assert_eq!(counters_of(&*tx, a), vec![last_counter(257).to_vec()]);
}

#[test]
fn cutter_splits_past_chunk_limit() {
    let db = MemDb::new();
    let a = addr(0xaa);
    // 145-id chunks.
    let params = IndexParams::with_chunk_limit(145 * 8);
    let touches: Vec<_> = (1..=300u64).map(|id| (a, id)).collect();
    ingest(&db, params, &touches);

    let tx = db.begin_rw().unwrap();
    let chunks = chunks_of(&*tx, a);
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].0, 145);
    assert_eq!(chunks[0].1, (1..=145).collect::<Vec<_>>());
    assert_eq!(chunks[1].0, 290);
    assert_eq!(chunks[1].1, (146..=290).collect::<Vec<_>>());
    assert_eq!(chunks[2].0, CHUNK_TERMINATOR_LAST);
    assert_eq!(chunks[2].1, (291..=300).collect::<Vec<_>>());

    let counters = counters_of(&*tx, a);
    assert_eq!(counters.len(), 3);
    assert_eq!(&counters[0][..8], &145u64.to_be_bytes());
    assert_eq!(&counters[0][8..], &145u64.to_be_bytes());
    assert_eq!(&counters[1][..8], &290u64.to_be_bytes());
    assert_eq!(&counters[2], &last_counter(300).to_vec());
}

#[test]
fn later_flush_merges_into_last_chunk() {
    let db = MemDb::new();
    let a = addr(0xaa);
    ingest(&db, IndexParams::default(), &[(a, 5), (a, 10)]);
    ingest(&db, IndexParams::default(), &[(a, 7), (a, 20)]);

    let tx = db.begin_rw().unwrap();
    let chunks = chunks_of(&*tx, a);
    assert_eq!(chunks, vec![(CHUNK_TERMINATOR_LAST, vec![5, 7, 10, 20])]);
    assert_eq!(counters_of(&*tx, a), vec![vec![0x03]]);
}

#[test]
fn merge_crossing_the_optimized_boundary() {
    let db = MemDb::new();
    let a = addr(0xaa);
    let first: Vec<_> = (1..=200u64).map(|id| (a, id)).collect();
    ingest(&db, IndexParams::default(), &first);
    let second: Vec<_> = (201..=400u64).map(|id| (a, id)).collect();
    ingest(&db, IndexParams::default(), &second);

    let tx = db.begin_rw().unwrap();
    assert_eq!(address_count(&*tx, COUNTER, a).unwrap(), 400);
    let chunks = chunks_of(&*tx, a);
    // 400 ids = 3200 bytes: cut at 320 ids under the default limit.
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].0, 320);
    assert_eq!(chunks[1].0, CHUNK_TERMINATOR_LAST);
    assert_eq!(chunks[1].1, (321..=400).collect::<Vec<_>>());
}

#[test]
fn multi_chunk_address_grows_at_the_tail() {
    let db = MemDb::new();
    let a = addr(0xbb);
    let params = IndexParams::with_chunk_limit(64); // 8-id chunks
    let touches: Vec<_> = (1..=20u64).map(|id| (a, id)).collect();
    ingest(&db, params.clone(), &touches);

    let tx = db.begin_rw().unwrap();
    assert_eq!(
        chunks_of(&*tx, a).iter().map(|(_, ids)| ids.len()).collect::<Vec<_>>(),
        vec![8, 8, 4]
    );
    drop(tx);

    // The delta merges with the partial tail chunk only; closed chunks
    // are untouched.
    let more: Vec<_> = (21..=24u64).map(|id| (a, id)).collect();
    ingest(&db, params, &more);

    let tx = db.begin_rw().unwrap();
    let chunks = chunks_of(&*tx, a);
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].1, (1..=8).collect::<Vec<_>>());
    assert_eq!(chunks[1].1, (9..=16).collect::<Vec<_>>());
    assert_eq!(chunks[2].1, (17..=24).collect::<Vec<_>>());
    let counters = counters_of(&*tx, a);
    assert_eq!(&counters[2], &last_counter(24).to_vec());
}

#[test]
fn touch_is_idempotent_and_streams_compare_to_reference() {
    let db = MemDb::new();
    let params = IndexParams::with_chunk_limit(64);
    let mut h = handler(params);

    // A reference model next to the real pipeline.
    let mut reference: std::collections::HashMap<_, BTreeSet<u64>> = Default::default();
    let ids = [3u64, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5, 8, 9, 7, 9, 3, 2, 3, 8, 4];
    for (i, id) in ids.iter().enumerate() {
        let a = addr((i % 3) as u8 + 1);
        h.touch_index(a, *id);
        reference.entry(a).or_default().insert(*id);
    }

    let tx = db.begin_rw().unwrap();
    h.flush(true).unwrap();
    h.load(&*tx).unwrap();

    for (a, want) in reference {
        let got: Vec<u64> =
            chunks_of(&*tx, a).into_iter().flat_map(|(_, ids)| ids).collect();
        assert_eq!(got, want.into_iter().collect::<Vec<_>>());
        // Strictly ascending, no duplicates.
        assert!(got.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn flush_only_spills_past_threshold_unless_forced() {
    let mut h = StandardIndexHandler::new(
        "test",
        INDEX,
        COUNTER,
        IndexParams::default(),
        CancelToken::new(),
    );
    h.touch_index(addr(1), 1);
    // Below the 256 MiB threshold: a soft flush keeps the buffer.
    h.flush(false).unwrap();

    let db = MemDb::new();
    let tx = db.begin_rw().unwrap();
    h.load(&*tx).unwrap();
    assert_eq!(chunks_of(&*tx, addr(1)), vec![]);

    // Forced flush spills.
    h.touch_index(addr(1), 1);
    h.flush(true).unwrap();
    h.load(&*tx).unwrap();
    assert_eq!(chunks_of(&*tx, addr(1)), vec![(CHUNK_TERMINATOR_LAST, vec![1])]);
}

#[test]
fn cancelled_load_returns_stopped() {
    let cancel = CancelToken::new();
    let mut h = StandardIndexHandler::new(
        "test",
        INDEX,
        COUNTER,
        IndexParams::default(),
        cancel.clone(),
    );
    h.touch_index(addr(1), 1);
    h.flush(true).unwrap();

    cancel.cancel();
    let db = MemDb::new();
    let tx = db.begin_rw().unwrap();
    assert!(matches!(h.load(&*tx), Err(IndexError::Stopped)));
}
