//! The stage catalog: a constant data table wiring every index stage to
//! its parent, forward executor and unwind executor. Constructed once at
//! startup; if opted in, the stages run before the host's finish stage.

use crate::{
    body_indexer::withdrawals_executor,
    contract_indexer::{
        deployment_indexer_executor, run_classifier_executor, run_classifier_unwind,
        ClassifierSpec,
    },
    driver::{ExecCtx, Stage},
    header_indexer::blocks_rewarded_executor,
    log_indexer::{run_concurrent_log_indexer_executor, run_incremental_log_indexer_executor},
    probe::{
        new_erc1155_prober, new_erc1167_prober, new_erc165_prober, new_erc20_prober,
        new_erc4626_prober, new_erc721_prober,
    },
    stage::{StageId, StageState},
    ticker::Ticker,
    transfers::{
        MultiLogIndexerHandler, TransferHoldingsUnwinder, TransferLogAnalyzer,
        TransferLogHolderHandler, TransferLogIndexerHandler, TransferMatch,
    },
    unwind::{
        run_blocks_rewarded_unwind, run_transfer_log_unwind, run_withdrawals_unwind,
        TransferIndexUnwinder, TransferUnwindHandler,
    },
    StageError,
};
use explorer_index::{IndexParams, IndexUnwinder};
use explorer_kv::{tables, Table};
use roaring::RoaringTreemap;

fn bitmap_of(bits: &[u64]) -> RoaringTreemap {
    let mut bm = RoaringTreemap::new();
    for b in bits {
        bm.insert(*b);
    }
    bm
}

fn classifier_stage(
    id: StageId,
    description: &'static str,
    parent: StageId,
    spec: ClassifierSpec,
) -> Stage {
    let unwind_target = spec.target;
    let unwind_bits = spec.attr_bits.clone();
    Stage {
        id,
        description,
        parent,
        forward: Box::new(move |ctx, s, start, end, short, ticker| {
            run_classifier_executor(ctx, s, start, end, short, ticker, &spec)
        }),
        unwind: Box::new(move |ctx, u, _short, ticker| {
            run_classifier_unwind(ctx, u, ticker, unwind_target, Some(&unwind_bits))
        }),
    }
}

fn transfer_log_executor(
    ctx: &ExecCtx<'_>,
    s: &StageState,
    start: u64,
    end: u64,
    short: bool,
    ticker: &mut Ticker,
    params: &IndexParams,
) -> Result<u64, StageError> {
    let analyzer = TransferLogAnalyzer::new();
    let mut handler = MultiLogIndexerHandler::new(vec![
        Box::new(TransferLogIndexerHandler::new(
            "Erc20Transfers",
            tables::ERC20_TRANSFER_INDEX,
            tables::ERC20_TRANSFER_COUNTER,
            false,
            params.clone(),
            ctx.cancel.clone(),
        )),
        Box::new(TransferLogIndexerHandler::new(
            "Erc721Transfers",
            tables::ERC721_TRANSFER_INDEX,
            tables::ERC721_TRANSFER_COUNTER,
            true,
            params.clone(),
            ctx.cancel.clone(),
        )),
    ]);

    if start == 0 && ctx.is_internal_tx {
        run_concurrent_log_indexer_executor::<TransferMatch>(
            ctx,
            s,
            start,
            end,
            short,
            ticker,
            &analyzer,
            &mut handler,
        )
    } else {
        run_incremental_log_indexer_executor::<TransferMatch>(
            ctx,
            s,
            start,
            end,
            short,
            ticker,
            &analyzer,
            &mut handler,
        )
    }
}

fn holdings_log_executor(
    ctx: &ExecCtx<'_>,
    s: &StageState,
    start: u64,
    end: u64,
    short: bool,
    ticker: &mut Ticker,
) -> Result<u64, StageError> {
    let analyzer = TransferLogAnalyzer::new();
    let mut handler = MultiLogIndexerHandler::new(vec![
        Box::new(TransferLogHolderHandler::new("Erc20Holdings", tables::ERC20_HOLDINGS, false)),
        Box::new(TransferLogHolderHandler::new("Erc721Holdings", tables::ERC721_HOLDINGS, true)),
    ]);

    if start == 0 && ctx.is_internal_tx {
        run_concurrent_log_indexer_executor::<TransferMatch>(
            ctx,
            s,
            start,
            end,
            short,
            ticker,
            &analyzer,
            &mut handler,
        )
    } else {
        run_incremental_log_indexer_executor::<TransferMatch>(
            ctx,
            s,
            start,
            end,
            short,
            ticker,
            &analyzer,
            &mut handler,
        )
    }
}

fn transfer_unwind(
    ctx: &ExecCtx<'_>,
    u: &crate::stage::UnwindState,
    ticker: &mut Ticker,
) -> Result<(), StageError> {
    let analyzer = TransferLogAnalyzer::new();
    let mut erc20 = TransferIndexUnwinder::new(
        ctx.tx,
        tables::ERC20_TRANSFER_INDEX,
        tables::ERC20_TRANSFER_COUNTER,
        false,
    )?;
    let mut erc721 = TransferIndexUnwinder::new(
        ctx.tx,
        tables::ERC721_TRANSFER_INDEX,
        tables::ERC721_TRANSFER_COUNTER,
        true,
    )?;
    let mut handlers: [&mut dyn TransferUnwindHandler; 2] = [&mut erc20, &mut erc721];
    run_transfer_log_unwind(ctx, u, ticker, &analyzer, &mut handlers)
}

fn holdings_unwind(
    ctx: &ExecCtx<'_>,
    u: &crate::stage::UnwindState,
    ticker: &mut Ticker,
) -> Result<(), StageError> {
    let analyzer = TransferLogAnalyzer::new();
    let mut erc20 = TransferHoldingsUnwinder::new(tables::ERC20_HOLDINGS, false);
    let mut erc721 = TransferHoldingsUnwinder::new(tables::ERC721_HOLDINGS, true);
    let mut handlers: [&mut dyn TransferUnwindHandler; 2] = [&mut erc20, &mut erc721];
    run_transfer_log_unwind(ctx, u, ticker, &analyzer, &mut handlers)
}

fn block_index_unwind(
    ctx: &ExecCtx<'_>,
    u: &crate::stage::UnwindState,
    ticker: &mut Ticker,
    index_table: Table,
    counter_table: Table,
    withdrawals: bool,
) -> Result<(), StageError> {
    let mut unwinder = IndexUnwinder::new(ctx.tx, index_table, counter_table)?;
    if withdrawals {
        run_withdrawals_unwind(ctx, u, ticker, &mut unwinder)
    } else {
        run_blocks_rewarded_unwind(ctx, u, ticker, &mut unwinder)
    }
}

/// Standard index stages, in execution order. If opted in, they must be
/// inserted before the host's finish stage.
pub fn standard_stages(params: IndexParams) -> Vec<Stage> {
    let p = params;
    vec![
        Stage {
            id: StageId::CONTRACT_INDEXER,
            description: "Index contract creation",
            parent: StageId::BODIES,
            forward: Box::new(deployment_indexer_executor),
            unwind: Box::new(|ctx, u, _short, ticker| {
                run_classifier_unwind(ctx, u, ticker, tables::ALL_CONTRACTS, None)
            }),
        },
        classifier_stage(
            StageId::ERC20_INDEXER,
            "ERC20 token indexer",
            StageId::CONTRACT_INDEXER,
            ClassifierSpec {
                source: tables::ALL_CONTRACTS,
                target: tables::ERC20_CONTRACTS,
                attr_bits: bitmap_of(&[tables::ADDR_ATTR_ERC20]),
                prober: new_erc20_prober,
            },
        ),
        classifier_stage(
            StageId::ERC165_INDEXER,
            "ERC165 indexer",
            StageId::CONTRACT_INDEXER,
            ClassifierSpec {
                source: tables::ALL_CONTRACTS,
                target: tables::ERC165_CONTRACTS,
                attr_bits: bitmap_of(&[tables::ADDR_ATTR_ERC165]),
                prober: new_erc165_prober,
            },
        ),
        classifier_stage(
            StageId::ERC721_INDEXER,
            "ERC721 token indexer",
            StageId::ERC165_INDEXER,
            ClassifierSpec {
                source: tables::ERC165_CONTRACTS,
                target: tables::ERC721_CONTRACTS,
                // The metadata extension is a distinct bit set by the same
                // prober; both are cleared on unwind.
                attr_bits: bitmap_of(&[tables::ADDR_ATTR_ERC721, tables::ADDR_ATTR_ERC721_MD]),
                prober: new_erc721_prober,
            },
        ),
        classifier_stage(
            StageId::ERC1155_INDEXER,
            "ERC1155 token indexer",
            StageId::ERC165_INDEXER,
            ClassifierSpec {
                source: tables::ERC165_CONTRACTS,
                target: tables::ERC1155_CONTRACTS,
                attr_bits: bitmap_of(&[tables::ADDR_ATTR_ERC1155]),
                prober: new_erc1155_prober,
            },
        ),
        classifier_stage(
            StageId::ERC1167_INDEXER,
            "ERC1167 proxy indexer",
            StageId::CONTRACT_INDEXER,
            ClassifierSpec {
                source: tables::ALL_CONTRACTS,
                target: tables::ERC1167_CONTRACTS,
                attr_bits: bitmap_of(&[tables::ADDR_ATTR_ERC1167]),
                prober: new_erc1167_prober,
            },
        ),
        classifier_stage(
            StageId::ERC4626_INDEXER,
            "ERC4626 token indexer",
            StageId::ERC20_INDEXER,
            ClassifierSpec {
                source: tables::ERC20_CONTRACTS,
                target: tables::ERC4626_CONTRACTS,
                attr_bits: bitmap_of(&[tables::ADDR_ATTR_ERC4626]),
                prober: new_erc4626_prober,
            },
        ),
        Stage {
            id: StageId::ERC20_721_TRANSFERS,
            description: "ERC20/721 token transfer indexer",
            // Binds to the ERC721 classifier as the parent on purpose so
            // both the ERC20 and ERC721 classifications are in place.
            parent: StageId::ERC721_INDEXER,
            forward: {
                let params = p.clone();
                Box::new(move |ctx, s, start, end, short, ticker| {
                    transfer_log_executor(ctx, s, start, end, short, ticker, &params)
                })
            },
            unwind: Box::new(|ctx, u, _short, ticker| transfer_unwind(ctx, u, ticker)),
        },
        Stage {
            id: StageId::ERC20_721_HOLDINGS,
            description: "ERC20/721 token holdings indexer",
            parent: StageId::ERC721_INDEXER,
            forward: Box::new(holdings_log_executor),
            unwind: Box::new(|ctx, u, _short, ticker| holdings_unwind(ctx, u, ticker)),
        },
        Stage {
            id: StageId::BLOCKS_REWARDED,
            description: "Blocks rewarded indexer",
            parent: StageId::BODIES,
            forward: {
                let params = p.clone();
                Box::new(move |ctx, s, start, end, short, ticker| {
                    blocks_rewarded_executor(ctx, s, start, end, short, ticker, &params)
                })
            },
            unwind: Box::new(|ctx, u, _short, ticker| {
                block_index_unwind(
                    ctx,
                    u,
                    ticker,
                    tables::BLOCKS_REWARDED_INDEX,
                    tables::BLOCKS_REWARDED_COUNTER,
                    false,
                )
            }),
        },
        Stage {
            id: StageId::WITHDRAWALS,
            description: "CL withdrawals indexer",
            parent: StageId::BODIES,
            forward: {
                let params = p;
                Box::new(move |ctx, s, start, end, short, ticker| {
                    withdrawals_executor(ctx, s, start, end, short, ticker, &params)
                })
            },
            unwind: Box::new(|ctx, u, _short, ticker| {
                block_index_unwind(
                    ctx,
                    u,
                    ticker,
                    tables::WITHDRAWALS_INDEX,
                    tables::WITHDRAWALS_COUNTER,
                    true,
                )
            }),
        },
    ]
}
