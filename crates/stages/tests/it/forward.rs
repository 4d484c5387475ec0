//! End-to-end forward sync over the full stage catalog.

use crate::utils::{addr, fixture};
use explorer_index::{
    attributes::read_attributes,
    holdings::{list_holdings, Holding},
    ordinal::{ordinal_count, ordinal_page},
    reader::{address_count, page_by_rank},
};
use explorer_kv::{tables, KvDb, KvTx as _};
use explorer_stages::{stage_progress, StageId};

#[test]
fn full_catalog_first_sync() {
    let f = fixture();
    f.run_forward();

    let tx = f.db.begin_ro().unwrap();

    // Every stage caught up to its parent chain tip.
    for id in [
        StageId::CONTRACT_INDEXER,
        StageId::ERC20_INDEXER,
        StageId::ERC721_INDEXER,
        StageId::ERC20_721_TRANSFERS,
        StageId::BLOCKS_REWARDED,
        StageId::WITHDRAWALS,
    ] {
        assert_eq!(stage_progress(&*tx, id).unwrap(), 10, "{id}");
    }

    // Contract classification: dense ordinal tables per kind.
    assert_eq!(ordinal_count(&*tx, tables::ALL_CONTRACTS).unwrap(), 5);
    assert_eq!(ordinal_count(&*tx, tables::ERC20_CONTRACTS).unwrap(), 2); // token + vault
    assert_eq!(ordinal_count(&*tx, tables::ERC165_CONTRACTS).unwrap(), 2);
    assert_eq!(ordinal_count(&*tx, tables::ERC721_CONTRACTS).unwrap(), 1);
    assert_eq!(ordinal_count(&*tx, tables::ERC1155_CONTRACTS).unwrap(), 1);
    assert_eq!(ordinal_count(&*tx, tables::ERC1167_CONTRACTS).unwrap(), 1);
    assert_eq!(ordinal_count(&*tx, tables::ERC4626_CONTRACTS).unwrap(), 1);

    let erc20s = ordinal_page(&*tx, tables::ERC20_CONTRACTS, 0, 10).unwrap();
    assert_eq!(erc20s[0].addr, f.token20);
    assert_eq!(erc20s[0].block_num, 1);
    assert_eq!(erc20s[1].addr, f.vault);

    // Attribute bitmaps accumulate across classifiers.
    let attrs = read_attributes(&*tx, f.token721).unwrap();
    assert!(attrs.contains(tables::ADDR_ATTR_ERC165));
    assert!(attrs.contains(tables::ADDR_ATTR_ERC721));
    assert!(attrs.contains(tables::ADDR_ATTR_ERC721_MD));
    assert!(!attrs.contains(tables::ADDR_ATTR_ERC20));

    let attrs = read_attributes(&*tx, f.vault).unwrap();
    assert!(attrs.contains(tables::ADDR_ATTR_ERC20));
    assert!(attrs.contains(tables::ADDR_ATTR_ERC4626));

    assert!(read_attributes(&*tx, f.proxy).unwrap().contains(tables::ADDR_ATTR_ERC1167));
    assert!(read_attributes(&*tx, f.alice).unwrap().is_empty());

    // Transfer indexes: both sides of each transfer, by tx ordinal.
    assert_eq!(address_count(&*tx, tables::ERC20_TRANSFER_COUNTER, f.alice).unwrap(), 2);
    assert_eq!(address_count(&*tx, tables::ERC20_TRANSFER_COUNTER, f.bob).unwrap(), 2);
    assert_eq!(
        page_by_rank(
            &*tx,
            tables::ERC20_TRANSFER_INDEX,
            tables::ERC20_TRANSFER_COUNTER,
            f.alice,
            0,
            10
        )
        .unwrap(),
        vec![106, 108]
    );
    assert_eq!(address_count(&*tx, tables::ERC721_TRANSFER_COUNTER, f.alice).unwrap(), 1);
    assert_eq!(
        page_by_rank(
            &*tx,
            tables::ERC721_TRANSFER_INDEX,
            tables::ERC721_TRANSFER_COUNTER,
            f.bob,
            0,
            10
        )
        .unwrap(),
        vec![107]
    );

    // Holdings: first acquisition only.
    assert_eq!(
        list_holdings(&*tx, tables::ERC20_HOLDINGS, f.bob).unwrap(),
        vec![Holding { token: f.token20, first_eth_tx: 106 }]
    );
    assert_eq!(
        list_holdings(&*tx, tables::ERC20_HOLDINGS, f.alice).unwrap(),
        vec![Holding { token: f.token20, first_eth_tx: 108 }]
    );
    assert_eq!(
        list_holdings(&*tx, tables::ERC721_HOLDINGS, f.alice).unwrap(),
        vec![Holding { token: f.token721, first_eth_tx: 107 }]
    );

    // Blocks rewarded: block-parity coinbases.
    assert_eq!(address_count(&*tx, tables::BLOCKS_REWARDED_COUNTER, addr(0xc1)).unwrap(), 5);
    assert_eq!(
        page_by_rank(
            &*tx,
            tables::BLOCKS_REWARDED_INDEX,
            tables::BLOCKS_REWARDED_COUNTER,
            addr(0xc2),
            0,
            10
        )
        .unwrap(),
        vec![2, 4, 6, 8, 10]
    );

    // Withdrawals: indexed by withdrawal index, plus the idx2block table.
    assert_eq!(address_count(&*tx, tables::WITHDRAWALS_COUNTER, f.alice).unwrap(), 2);
    assert_eq!(
        page_by_rank(
            &*tx,
            tables::WITHDRAWALS_INDEX,
            tables::WITHDRAWALS_COUNTER,
            f.bob,
            0,
            10
        )
        .unwrap(),
        vec![2, 3, 4]
    );
    assert_eq!(
        tx.get(tables::WITHDRAWAL_IDX_2_BLOCK, &2u64.to_be_bytes()).unwrap(),
        Some(9u64.to_be_bytes().to_vec())
    );
    assert_eq!(
        tx.get(tables::WITHDRAWAL_IDX_2_BLOCK, &4u64.to_be_bytes()).unwrap(),
        Some(10u64.to_be_bytes().to_vec())
    );
}

#[test]
fn incremental_run_after_first_sync() {
    let mut f = fixture();
    f.run_forward();

    // Two more blocks arrive: another ERC20 transfer and a withdrawal.
    f.chain.add_block(11, addr(0xc1));
    f.chain.add_block(12, addr(0xc2));
    f.chain.add_tx_logs(
        11,
        111,
        vec![explorer_stages::test_utils::transfer_log(
            f.token20,
            explorer_stages::transfers::TRANSFER_TOPIC,
            f.alice,
            f.bob,
            false,
        )],
    );
    f.chain.add_withdrawals(12, vec![crate::utils::withdrawal(5, f.alice)]);

    let tx = f.db.begin_rw().unwrap();
    explorer_stages::stage::save_stage_progress(&*tx, StageId::BODIES, 12).unwrap();
    tx.commit().unwrap();

    f.run_forward();

    let tx = f.db.begin_ro().unwrap();
    assert_eq!(address_count(&*tx, tables::ERC20_TRANSFER_COUNTER, f.alice).unwrap(), 3);
    assert_eq!(
        page_by_rank(
            &*tx,
            tables::ERC20_TRANSFER_INDEX,
            tables::ERC20_TRANSFER_COUNTER,
            f.alice,
            2,
            1
        )
        .unwrap(),
        vec![111]
    );
    assert_eq!(address_count(&*tx, tables::WITHDRAWALS_COUNTER, f.alice).unwrap(), 3);
    assert_eq!(
        tx.get(tables::WITHDRAWAL_IDX_2_BLOCK, &5u64.to_be_bytes()).unwrap(),
        Some(12u64.to_be_bytes().to_vec())
    );
}
