//! Header-mode indexing: one event per block header.

use crate::{
    driver::ExecCtx,
    stage::StageState,
    ticker::{Ticker, FLUSH_INTERVAL},
    StageError,
};
use alloy_consensus::Header;
use explorer_index::{
    CancelToken, IndexHandler, IndexParams, ResourceAwareIndexHandler, StandardIndexHandler,
};
use explorer_kv::tables;
use tracing::info;

/// Handler fed one canonical header per block.
pub trait HeaderIndexerHandler: ResourceAwareIndexHandler {
    /// Consumes the header of one block in the range.
    fn handle_match(&mut self, header: &Header);
}

/// Walks `[start_block, end_block]` headers through `handler`, ticking the
/// soft-flush timer, then runs the forced flush + load cycle.
pub fn run_incremental_header_indexer_executor(
    ctx: &ExecCtx<'_>,
    s: &StageState,
    start_block: u64,
    end_block: u64,
    is_short_interval: bool,
    log_ticker: &mut Ticker,
    handler: &mut dyn HeaderIndexerHandler,
) -> Result<u64, StageError> {
    let mut total_blocks = 0u64;
    let mut flush_ticker = Ticker::new(FLUSH_INTERVAL);

    for block_num in start_block..=end_block {
        let header =
            ctx.chain.header(block_num)?.ok_or(StageError::MissingHeader(block_num))?;

        total_blocks += 1;
        handler.handle_match(&header);

        if ctx.cancel.is_cancelled() {
            return Err(StageError::Stopped);
        }
        if log_ticker.tick() {
            info!(
                target: "sync::stages",
                block = block_num,
                blocks = total_blocks,
                "[{}] Scanning headers", s.log_prefix()
            );
        }
        if flush_ticker.tick() {
            handler.flush(false)?;
        }
    }

    // Last (forced) flush and batch load.
    handler.flush(true)?;
    handler.load(ctx.tx)?;

    if !is_short_interval && total_blocks > 0 {
        info!(target: "sync::stages", blocks = total_blocks, "[{}] Totals", s.log_prefix());
    }

    Ok(end_block)
}

/// Indexes fee recipients: `coinbase -> blockNum`.
#[derive(Debug)]
pub struct BlocksRewardedIndexerHandler {
    inner: StandardIndexHandler,
}

impl BlocksRewardedIndexerHandler {
    /// Creates the handler over the blocks-rewarded table pair.
    pub fn new(params: IndexParams, cancel: CancelToken) -> Self {
        Self {
            inner: StandardIndexHandler::new(
                "BlocksRewarded",
                tables::BLOCKS_REWARDED_INDEX,
                tables::BLOCKS_REWARDED_COUNTER,
                params,
                cancel,
            ),
        }
    }
}

impl ResourceAwareIndexHandler for BlocksRewardedIndexerHandler {
    fn flush(&mut self, force: bool) -> explorer_index::IndexResult<()> {
        self.inner.flush(force)
    }

    fn load(&mut self, tx: &dyn explorer_kv::KvRwTx) -> explorer_index::IndexResult<()> {
        self.inner.load(tx)
    }
}

impl HeaderIndexerHandler for BlocksRewardedIndexerHandler {
    fn handle_match(&mut self, header: &Header) {
        self.inner.touch_index(header.beneficiary, header.number);
    }
}

/// Forward executor of the blocks-rewarded stage.
pub fn blocks_rewarded_executor(
    ctx: &ExecCtx<'_>,
    s: &StageState,
    start_block: u64,
    end_block: u64,
    is_short_interval: bool,
    log_ticker: &mut Ticker,
    params: &IndexParams,
) -> Result<u64, StageError> {
    let mut handler = BlocksRewardedIndexerHandler::new(params.clone(), ctx.cancel.clone());
    run_incremental_header_indexer_executor(
        ctx,
        s,
        start_block,
        end_block,
        is_short_interval,
        log_ticker,
        &mut handler,
    )
}
