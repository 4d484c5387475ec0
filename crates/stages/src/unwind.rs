//! Per-stream unwind walkers.
//!
//! Each event source has a companion walker that drives the chunked-store
//! unwind primitives over the reorged interval `]unwind_point, tip]`.

use crate::{
    log_indexer::{analyze_logs, LogAnalyzer},
    stage::UnwindState,
    ticker::Ticker,
    transfers::TransferMatch,
    driver::ExecCtx,
    StageError,
};
use explorer_index::{rewind_uint64_keyed, IndexError, IndexUnwinder};
use explorer_kv::{tables, Cursor as _, KvRwTx, RwCursor as _};
use tracing::info;

/// Unwinds the blocks-rewarded index: one `unwind_address(coinbase,
/// blockNum)` per reorged block.
pub fn run_blocks_rewarded_unwind(
    ctx: &ExecCtx<'_>,
    u: &UnwindState,
    log_ticker: &mut Ticker,
    unwinder: &mut IndexUnwinder<'_>,
) -> Result<(), StageError> {
    let start_block = u.unwind_point + 1;
    for block_num in start_block..=u.current_block {
        let header =
            ctx.chain.header(block_num)?.ok_or(StageError::MissingHeader(block_num))?;
        unwinder.unwind_address(header.beneficiary, header.number)?;

        if ctx.cancel.is_cancelled() {
            return Err(StageError::Stopped);
        }
        if log_ticker.tick() {
            info!(
                target: "sync::stages",
                block = block_num,
                "[{}] Unwinding blocks rewarded indexer", u.log_prefix()
            );
        }
    }
    Ok(())
}

/// Unwinds the withdrawals index and the `withdrawalIndex -> blockNum`
/// side table.
pub fn run_withdrawals_unwind(
    ctx: &ExecCtx<'_>,
    u: &UnwindState,
    log_ticker: &mut Ticker,
    unwinder: &mut IndexUnwinder<'_>,
) -> Result<(), StageError> {
    let start_block = u.unwind_point + 1;

    // The idx2block rewind target is the last withdrawal index still
    // canonical: search backward from the unwind point for a block that
    // carries withdrawals.
    let mut survivor = None;
    let mut block_num = u.unwind_point;
    while block_num > 0 {
        let withdrawals = ctx.chain.withdrawals(block_num)?;
        if let Some(last) = withdrawals.last() {
            survivor = Some(last.index);
            break;
        }
        block_num -= 1;
    }

    match survivor {
        Some(idx) => {
            let unwound_to = rewind_uint64_keyed(ctx.tx, tables::WITHDRAWAL_IDX_2_BLOCK, idx)?;
            // The surviving index must itself be present; anything else is
            // a DB inconsistency.
            if unwound_to != Some(idx) {
                return Err(IndexError::corruption(
                    tables::WITHDRAWAL_IDX_2_BLOCK,
                    &idx.to_be_bytes(),
                    "rewind target index not found",
                )
                .into());
            }
        }
        None => {
            // No withdrawal survives at or below the unwind point; the
            // whole mapping goes.
            clear_idx2block(ctx.tx)?;
        }
    }

    for block_num in start_block..=u.current_block {
        let withdrawals = ctx.chain.withdrawals(block_num)?;
        for w in &withdrawals {
            unwinder.unwind_address(w.address, w.index)?;
        }

        if ctx.cancel.is_cancelled() {
            return Err(StageError::Stopped);
        }
        if log_ticker.tick() {
            info!(
                target: "sync::stages",
                block = block_num,
                "[{}] Unwinding withdrawals indexer", u.log_prefix()
            );
        }
    }
    Ok(())
}

fn clear_idx2block(tx: &dyn KvRwTx) -> Result<(), StageError> {
    let mut cur = tx.cursor_rw(tables::WITHDRAWAL_IDX_2_BLOCK)?;
    let mut pair = cur.last()?;
    while pair.is_some() {
        cur.delete_current()?;
        pair = cur.prev()?;
    }
    Ok(())
}

/// A transfer-stream unwind target: one per index family fed by the same
/// log scan (ERC20 and ERC721 transfer indexes, holdings).
pub trait TransferUnwindHandler {
    /// Unwinds every match of one reorged transaction.
    fn unwind(
        &mut self,
        tx: &dyn KvRwTx,
        results: &[TransferMatch],
        eth_tx: u64,
    ) -> Result<(), StageError>;
}

/// Re-analyzes the logs of every reorged block and routes the matches to
/// the unwind handlers.
pub fn run_transfer_log_unwind(
    ctx: &ExecCtx<'_>,
    u: &UnwindState,
    log_ticker: &mut Ticker,
    analyzer: &dyn LogAnalyzer<TransferMatch>,
    handlers: &mut [&mut dyn TransferUnwindHandler],
) -> Result<(), StageError> {
    let start_block = u.unwind_point + 1;
    for block_num in start_block..=u.current_block {
        for tx_logs in ctx.chain.tx_logs(block_num)? {
            let results = analyze_logs(ctx.tx, analyzer, &tx_logs.logs)?;
            if results.is_empty() {
                continue;
            }
            for handler in handlers.iter_mut() {
                handler.unwind(ctx.tx, &results, tx_logs.eth_tx)?;
            }
        }

        if ctx.cancel.is_cancelled() {
            return Err(StageError::Stopped);
        }
        if log_ticker.tick() {
            info!(
                target: "sync::stages",
                block = block_num,
                "[{}] Unwinding transfer indexer", u.log_prefix()
            );
        }
    }
    Ok(())
}

/// Unwinds one transfer index family through the chunked-store primitive.
pub struct TransferIndexUnwinder<'tx> {
    inner: IndexUnwinder<'tx>,
    nft: bool,
}

impl std::fmt::Debug for TransferIndexUnwinder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferIndexUnwinder").field("nft", &self.nft).finish()
    }
}

impl<'tx> TransferIndexUnwinder<'tx> {
    /// Opens the unwinder over a transfer index/counter table pair.
    pub fn new(
        tx: &'tx dyn KvRwTx,
        index_table: explorer_kv::Table,
        counter_table: explorer_kv::Table,
        nft: bool,
    ) -> Result<Self, StageError> {
        Ok(Self { inner: IndexUnwinder::new(tx, index_table, counter_table)?, nft })
    }
}

impl TransferUnwindHandler for TransferIndexUnwinder<'_> {
    fn unwind(
        &mut self,
        _tx: &dyn KvRwTx,
        results: &[TransferMatch],
        eth_tx: u64,
    ) -> Result<(), StageError> {
        for r in results {
            if r.nft != self.nft {
                continue;
            }
            self.inner.unwind_address(r.from, eth_tx)?;
            self.inner.unwind_address(r.to, eth_tx)?;
        }
        Ok(())
    }
}

impl TransferUnwindHandler for crate::transfers::TransferHoldingsUnwinder {
    fn unwind(
        &mut self,
        tx: &dyn KvRwTx,
        results: &[TransferMatch],
        eth_tx: u64,
    ) -> Result<(), StageError> {
        // The match drives the holdings removal and calls back into this
        // unwinder as the visitor.
        for r in results {
            r.unwind_holding(tx, self.nft, self, eth_tx)?;
        }
        Ok(())
    }
}
