//! Rank pagination and global ordinal lookups.

use crate::utils::{addr, ingest, COUNTER, INDEX};
use alloy_primitives::Address;
use explorer_index::{
    ordinal::{
        first_ordinal_at_block, ordinal_count, ordinal_page, rewind_above_block, OrdinalAppender,
        MAX_MATCH_COUNT,
    },
    reader::{address_count, page_by_rank},
    IndexError, IndexParams,
};
use explorer_kv::{mem::MemDb, tables, KvDb};

#[test]
fn count_of_unknown_address_is_zero() {
    let db = MemDb::new();
    let tx = db.begin_ro().unwrap();
    assert_eq!(address_count(&*tx, COUNTER, addr(0x01)).unwrap(), 0);
}

#[test]
fn page_by_rank_returns_kth_smallest() {
    let db = MemDb::new();
    let a = addr(0xaa);
    let ids: Vec<u64> = (0..100).map(|i| i * 3 + 1).collect();
    let touches: Vec<_> = ids.iter().map(|id| (a, *id)).collect();
    ingest(&db, IndexParams::default(), &touches);

    let tx = db.begin_ro().unwrap();
    assert_eq!(address_count(&*tx, COUNTER, a).unwrap(), 100);
    for k in [0u64, 1, 42, 99] {
        let page = page_by_rank(&*tx, INDEX, COUNTER, a, k, 1).unwrap();
        assert_eq!(page, vec![ids[k as usize]], "rank {k}");
    }
    // Past the end.
    assert_eq!(page_by_rank(&*tx, INDEX, COUNTER, a, 100, 1).unwrap(), vec![]);
}

#[test]
fn pagination_crosses_chunk_boundaries() {
    let db = MemDb::new();
    let a = addr(0xaa);
    // 145-id chunks; 300 contiguous ids starting at 1.
    let params = IndexParams::with_chunk_limit(145 * 8);
    let touches: Vec<_> = (1..=300u64).map(|id| (a, id)).collect();
    ingest(&db, params, &touches);

    let tx = db.begin_ro().unwrap();
    // Ranks 144, 145, 146 straddle the first cut.
    assert_eq!(page_by_rank(&*tx, INDEX, COUNTER, a, 144, 3).unwrap(), vec![145, 146, 147]);
    // A window larger than the tail truncates.
    assert_eq!(page_by_rank(&*tx, INDEX, COUNTER, a, 297, 10).unwrap(), vec![298, 299, 300]);
    // A window spanning all three chunks.
    assert_eq!(
        page_by_rank(&*tx, INDEX, COUNTER, a, 140, 160).unwrap(),
        (141..=300).collect::<Vec<_>>()
    );
}

#[test]
fn rank_pagination_on_optimized_address() {
    let db = MemDb::new();
    let a = addr(0xaa);
    ingest(&db, IndexParams::default(), &[(a, 7), (a, 42), (a, 99)]);

    let tx = db.begin_ro().unwrap();
    assert_eq!(page_by_rank(&*tx, INDEX, COUNTER, a, 1, 2).unwrap(), vec![42, 99]);
}

#[test]
fn ordinals_are_dense_and_pageable() {
    let db = MemDb::new();
    let table = tables::ERC20_CONTRACTS;
    let tx = db.begin_rw().unwrap();

    let mut appender = OrdinalAppender::new(&*tx, table).unwrap();
    for i in 0..10u64 {
        let ord = appender.append(&*tx, 100 + i, Address::with_last_byte(i as u8)).unwrap();
        assert_eq!(ord, i + 1);
    }
    tx.commit().unwrap();

    let tx = db.begin_ro().unwrap();
    assert_eq!(ordinal_count(&*tx, table).unwrap(), 10);

    let page = ordinal_page(&*tx, table, 3, 4).unwrap();
    assert_eq!(page.len(), 4);
    assert_eq!(page[0].ordinal, 4);
    assert_eq!(page[0].block_num, 103);
    assert_eq!(page[0].addr, Address::with_last_byte(3));

    assert!(matches!(
        ordinal_page(&*tx, table, 0, MAX_MATCH_COUNT + 1),
        Err(IndexError::PageLimit(_))
    ));

    assert_eq!(first_ordinal_at_block(&*tx, table, 105).unwrap(), Some(6));
    assert_eq!(first_ordinal_at_block(&*tx, table, 100).unwrap(), Some(1));
    assert_eq!(first_ordinal_at_block(&*tx, table, 200).unwrap(), None);
}

#[test]
fn ordinal_rewind_drops_newest_first() {
    let db = MemDb::new();
    let table = tables::ERC20_CONTRACTS;
    let tx = db.begin_rw().unwrap();
    let mut appender = OrdinalAppender::new(&*tx, table).unwrap();
    for i in 0..10u64 {
        appender.append(&*tx, 100 + i, Address::with_last_byte(i as u8)).unwrap();
    }

    let mut dropped = Vec::new();
    let n = rewind_above_block(&*tx, table, 104, |a| {
        dropped.push(a);
        Ok(())
    })
    .unwrap();
    assert_eq!(n, 5);
    assert_eq!(dropped[0], Address::with_last_byte(9));
    assert_eq!(ordinal_count(&*tx, table).unwrap(), 5);

    // A fresh appender continues densely after the rewind.
    let mut appender = OrdinalAppender::new(&*tx, table).unwrap();
    assert_eq!(appender.append(&*tx, 104, Address::with_last_byte(0xfe)).unwrap(), 6);
}
