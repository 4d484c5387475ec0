//! Reorg scenarios: stage unwind across every stream.

use crate::utils::fixture;
use explorer_index::{
    attributes::read_attributes,
    holdings::list_holdings,
    ordinal::ordinal_count,
    reader::{address_count, page_by_rank},
};
use explorer_kv::{tables, Cursor as _, KvDb, KvTx as _};
use explorer_stages::{stage_progress, StageId};

#[test]
fn unwind_rewinds_every_stream() {
    let f = fixture();
    f.run_forward();
    // Reorg from 10 back to 6: drops the ERC721 transfer (tx 107 @7), the
    // second ERC20 transfer (tx 108 @8) and all withdrawals (@9, @10).
    f.unwind_to(6);

    let tx = f.db.begin_ro().unwrap();

    for id in [StageId::ERC20_721_TRANSFERS, StageId::WITHDRAWALS, StageId::BLOCKS_REWARDED] {
        assert_eq!(stage_progress(&*tx, id).unwrap(), 6, "{id}");
    }

    // The first ERC20 transfer (tx 106 @6) survives; the rest is gone.
    assert_eq!(address_count(&*tx, tables::ERC20_TRANSFER_COUNTER, f.alice).unwrap(), 1);
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
        vec![106]
    );
    assert_eq!(address_count(&*tx, tables::ERC721_TRANSFER_COUNTER, f.alice).unwrap(), 0);
    assert_eq!(address_count(&*tx, tables::ERC721_TRANSFER_COUNTER, f.bob).unwrap(), 0);

    // Holdings: bob's ERC20 acquisition at tx 106 survives; alice's at tx
    // 108 and her ERC721 at tx 107 are gone.
    assert_eq!(list_holdings(&*tx, tables::ERC20_HOLDINGS, f.bob).unwrap().len(), 1);
    assert_eq!(list_holdings(&*tx, tables::ERC20_HOLDINGS, f.alice).unwrap(), vec![]);
    assert_eq!(list_holdings(&*tx, tables::ERC721_HOLDINGS, f.alice).unwrap(), vec![]);

    // Blocks rewarded shrink to blocks <= 6.
    assert_eq!(
        page_by_rank(
            &*tx,
            tables::BLOCKS_REWARDED_INDEX,
            tables::BLOCKS_REWARDED_COUNTER,
            crate::utils::addr(0xc2),
            0,
            10
        )
        .unwrap(),
        vec![2, 4, 6]
    );

    // All withdrawals were above the unwind point.
    assert_eq!(address_count(&*tx, tables::WITHDRAWALS_COUNTER, f.alice).unwrap(), 0);
    assert_eq!(address_count(&*tx, tables::WITHDRAWALS_COUNTER, f.bob).unwrap(), 0);
    let mut cur = tx.cursor(tables::WITHDRAWAL_IDX_2_BLOCK).unwrap();
    assert_eq!(cur.first().unwrap(), None);

    // Contracts deployed at or before 6 keep their classification.
    assert_eq!(ordinal_count(&*tx, tables::ALL_CONTRACTS).unwrap(), 5);
    assert_eq!(ordinal_count(&*tx, tables::ERC20_CONTRACTS).unwrap(), 2);
    assert!(read_attributes(&*tx, f.token721).unwrap().contains(tables::ADDR_ATTR_ERC721));
}

#[test]
fn unwind_drops_reorged_contract_matches() {
    let f = fixture();
    f.run_forward();
    // Reorg past the vault (@5) and the proxy (@4).
    f.unwind_to(3);

    let tx = f.db.begin_ro().unwrap();
    assert_eq!(ordinal_count(&*tx, tables::ALL_CONTRACTS).unwrap(), 3);
    assert_eq!(ordinal_count(&*tx, tables::ERC20_CONTRACTS).unwrap(), 1);
    assert_eq!(ordinal_count(&*tx, tables::ERC4626_CONTRACTS).unwrap(), 0);
    assert_eq!(ordinal_count(&*tx, tables::ERC1167_CONTRACTS).unwrap(), 0);

    // The dropped matches lose their attribute bits; earlier ones keep
    // theirs.
    assert!(read_attributes(&*tx, f.vault).unwrap().is_empty());
    assert!(read_attributes(&*tx, f.proxy).unwrap().is_empty());
    assert!(read_attributes(&*tx, f.token20).unwrap().contains(tables::ADDR_ATTR_ERC20));
    assert!(read_attributes(&*tx, f.token1155).unwrap().contains(tables::ADDR_ATTR_ERC1155));
}

#[test]
fn unwind_then_resync_converges() {
    let f = fixture();
    f.run_forward();
    f.unwind_to(6);

    // Re-advancing the parent replays the reorged interval; the index
    // converges back to the full-sync state.
    let tx = f.db.begin_rw().unwrap();
    explorer_stages::stage::save_stage_progress(&*tx, StageId::BODIES, 10).unwrap();
    tx.commit().unwrap();
    f.run_forward();

    let tx = f.db.begin_ro().unwrap();
    assert_eq!(address_count(&*tx, tables::ERC20_TRANSFER_COUNTER, f.alice).unwrap(), 2);
    assert_eq!(address_count(&*tx, tables::ERC721_TRANSFER_COUNTER, f.bob).unwrap(), 1);
    assert_eq!(address_count(&*tx, tables::WITHDRAWALS_COUNTER, f.bob).unwrap(), 3);
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
    assert_eq!(list_holdings(&*tx, tables::ERC20_HOLDINGS, f.alice).unwrap().len(), 1);
}
