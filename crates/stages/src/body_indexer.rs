//! Body-mode indexing: events extracted from block bodies.

use crate::{
    driver::ExecCtx,
    stage::StageState,
    ticker::{Ticker, FLUSH_INTERVAL},
    StageError,
};
use alloy_eips::eip4895::Withdrawal;
use explorer_index::{
    CancelToken, IndexHandler, IndexParams, IndexResult, ResourceAwareIndexHandler,
    StandardIndexHandler,
};
use explorer_kv::{tables, KvRwTx};
use tracing::info;

/// Handler fed the withdrawals of one block at a time.
pub trait BodyIndexerHandler: ResourceAwareIndexHandler {
    /// Consumes one block's withdrawals (possibly empty).
    fn handle_match(&mut self, block_num: u64, withdrawals: &[Withdrawal]) -> IndexResult<()>;
}

/// Walks `[start_block, end_block]` bodies through `handler`.
pub fn run_incremental_body_indexer_executor(
    ctx: &ExecCtx<'_>,
    s: &StageState,
    start_block: u64,
    end_block: u64,
    is_short_interval: bool,
    log_ticker: &mut Ticker,
    handler: &mut dyn BodyIndexerHandler,
) -> Result<u64, StageError> {
    let mut total_blocks = 0u64;
    let mut total_match = 0u64;
    let mut flush_ticker = Ticker::new(FLUSH_INTERVAL);

    for block_num in start_block..=end_block {
        let withdrawals = ctx.chain.withdrawals(block_num)?;

        total_blocks += 1;
        if !withdrawals.is_empty() {
            total_match += 1;
        }
        handler.handle_match(block_num, &withdrawals)?;

        if ctx.cancel.is_cancelled() {
            return Err(StageError::Stopped);
        }
        if log_ticker.tick() {
            info!(
                target: "sync::stages",
                block = block_num,
                matches = total_match,
                blocks = total_blocks,
                "[{}] Scanning blocks", s.log_prefix()
            );
        }
        if flush_ticker.tick() {
            handler.flush(false)?;
        }
    }

    handler.flush(true)?;
    handler.load(ctx.tx)?;

    if !is_short_interval && total_blocks > 0 {
        info!(
            target: "sync::stages",
            matches = total_match,
            blocks = total_blocks,
            "[{}] Totals", s.log_prefix()
        );
    }

    Ok(end_block)
}

/// Indexes consensus-layer withdrawals: `addr -> withdrawal index` (not
/// the block number), plus the `withdrawalIndex -> blockNum` side table.
#[derive(Debug)]
pub struct WithdrawalsIndexerHandler {
    inner: StandardIndexHandler,
    // One (lastWithdrawalIndex, blockNum) pair per block with withdrawals;
    // written at load time so everything lands in the stage transaction.
    idx2block: Vec<(u64, u64)>,
}

impl WithdrawalsIndexerHandler {
    /// Creates the handler over the withdrawals table pair.
    pub fn new(params: IndexParams, cancel: CancelToken) -> Self {
        Self {
            inner: StandardIndexHandler::new(
                "Withdrawals",
                tables::WITHDRAWALS_INDEX,
                tables::WITHDRAWALS_COUNTER,
                params,
                cancel,
            ),
            idx2block: Vec::new(),
        }
    }
}

impl ResourceAwareIndexHandler for WithdrawalsIndexerHandler {
    fn flush(&mut self, force: bool) -> IndexResult<()> {
        self.inner.flush(force)
    }

    fn load(&mut self, tx: &dyn KvRwTx) -> IndexResult<()> {
        for (idx, block_num) in self.idx2block.drain(..) {
            tx.put(tables::WITHDRAWAL_IDX_2_BLOCK, &idx.to_be_bytes(), &block_num.to_be_bytes())?;
        }
        self.inner.load(tx)
    }
}

impl BodyIndexerHandler for WithdrawalsIndexerHandler {
    fn handle_match(&mut self, block_num: u64, withdrawals: &[Withdrawal]) -> IndexResult<()> {
        let Some(last) = withdrawals.last() else { return Ok(()) };
        self.idx2block.push((last.index, block_num));

        for w in withdrawals {
            self.inner.touch_index(w.address, w.index);
        }
        Ok(())
    }
}

/// Forward executor of the withdrawals stage.
pub fn withdrawals_executor(
    ctx: &ExecCtx<'_>,
    s: &StageState,
    start_block: u64,
    end_block: u64,
    is_short_interval: bool,
    log_ticker: &mut Ticker,
    params: &IndexParams,
) -> Result<u64, StageError> {
    let mut handler = WithdrawalsIndexerHandler::new(params.clone(), ctx.cancel.clone());
    run_incremental_body_indexer_executor(
        ctx,
        s,
        start_block,
        end_block,
        is_short_interval,
        log_ticker,
        &mut handler,
    )
}
