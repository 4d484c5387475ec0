//! Log-mode indexing: typed matches extracted from transaction logs.
//!
//! An analyzer inspects each log of a transaction and emits zero or more
//! typed match records; a handler routes the records of matching
//! transactions into index handlers. On first sync, analysis fans out
//! across worker threads reading per-worker snapshots, joined back into
//! the single-consumer handler channel.

use crate::{
    driver::ExecCtx,
    provider::TxLogs,
    stage::StageState,
    ticker::{Ticker, FLUSH_INTERVAL},
    StageError,
};
use alloy_primitives::Log;
use explorer_index::ResourceAwareIndexHandler;
use explorer_kv::{KvDb as _, KvTx};
use std::sync::{mpsc, Arc, Mutex};
use tracing::info;

/// Given a log entry, answers whether the transaction it belongs to
/// deserves to be indexed.
///
/// The type parameter is the analysis result, implementation-specific;
/// e.g. which addresses a token transfer touches. Instances are reused
/// across the whole range and may cache.
pub trait LogAnalyzer<T>: Send + Sync {
    /// Inspects one log entry. `None` means it does not pass the
    /// analyzer's criteria and contributes nothing.
    fn inspect(&self, tx: &dyn KvTx, log: &Log) -> Result<Option<T>, StageError>;
}

/// A transaction that matched, with every record its logs produced.
#[derive(Debug, Clone)]
pub struct TxMatchedLogs<T> {
    /// Block the transaction was included in.
    pub block_num: u64,
    /// Global transaction ordinal.
    pub eth_tx: u64,
    /// Match records, one or more.
    pub matches: Vec<T>,
}

/// Handles the log-indexer lifecycle for one target index family.
pub trait LogIndexerHandler<T>: ResourceAwareIndexHandler {
    /// Routes the records of one matched transaction.
    fn handle_match(&mut self, matched: &TxMatchedLogs<T>);
}

/// Runs `analyzer` over every log of one transaction.
pub fn analyze_logs<T>(
    tx: &dyn KvTx,
    analyzer: &dyn LogAnalyzer<T>,
    logs: &[Log],
) -> Result<Vec<T>, StageError> {
    let mut results = Vec::new();
    for log in logs {
        if let Some(res) = analyzer.inspect(tx, log)? {
            results.push(res);
        }
    }
    Ok(results)
}

/// Sequential log executor sharing the stage's write transaction.
#[allow(clippy::too_many_arguments)]
pub fn run_incremental_log_indexer_executor<T>(
    ctx: &ExecCtx<'_>,
    s: &StageState,
    start_block: u64,
    end_block: u64,
    is_short_interval: bool,
    log_ticker: &mut Ticker,
    analyzer: &dyn LogAnalyzer<T>,
    handler: &mut dyn LogIndexerHandler<T>,
) -> Result<u64, StageError> {
    let mut tx_count = 0u64;
    let mut total_match = 0u64;
    let mut flush_ticker = Ticker::new(FLUSH_INTERVAL);

    for block_num in start_block..=end_block {
        for tx_logs in ctx.chain.tx_logs(block_num)? {
            tx_count += 1;
            let matches = analyze_logs(ctx.tx, analyzer, &tx_logs.logs)?;
            if matches.is_empty() {
                continue;
            }
            total_match += 1;
            handler.handle_match(&TxMatchedLogs {
                block_num: tx_logs.block_num,
                eth_tx: tx_logs.eth_tx,
                matches,
            });
        }

        if ctx.cancel.is_cancelled() {
            return Err(StageError::Stopped);
        }
        if log_ticker.tick() {
            info!(
                target: "sync::stages",
                block = block_num,
                matches = total_match,
                txs = tx_count,
                "[{}] Scanning logs", s.log_prefix()
            );
        }
        if flush_ticker.tick() {
            handler.flush(false)?;
        }
    }

    handler.flush(true)?;
    handler.load(ctx.tx)?;

    if !is_short_interval && tx_count > 0 {
        info!(
            target: "sync::stages",
            matches = total_match,
            txs = tx_count,
            "[{}] Totals", s.log_prefix()
        );
    }

    Ok(end_block)
}

/// Concurrent log executor for the first sync.
///
/// Safe only while no other writer touches the target tables, which holds
/// when progress is 0 and the driver owns the transaction. Workers analyze
/// independent transactions against read-only snapshots; matches join the
/// handler through a single-consumer channel.
#[allow(clippy::too_many_arguments)]
pub fn run_concurrent_log_indexer_executor<T: Send>(
    ctx: &ExecCtx<'_>,
    s: &StageState,
    start_block: u64,
    end_block: u64,
    is_short_interval: bool,
    log_ticker: &mut Ticker,
    analyzer: &dyn LogAnalyzer<T>,
    handler: &mut dyn LogIndexerHandler<T>,
) -> Result<u64, StageError> {
    if !is_short_interval {
        info!(target: "sync::stages", "[{}] Using concurrent executor", s.log_prefix());
    }

    let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

    let mut tx_count = 0u64;
    let mut total_match = 0u64;

    std::thread::scope(|scope| -> Result<(), StageError> {
        // Channels live inside the scope body: an early consumer error
        // drops the receivers before the scope joins, unblocking any
        // producer stuck on a full channel.
        let (in_send, in_recv) = mpsc::sync_channel::<TxLogs>(workers * 4);
        let in_recv = Arc::new(Mutex::new(in_recv));
        let (out_send, out_recv) = mpsc::sync_channel::<TxMatchedLogs<T>>(workers * 4);

        let cancel = ctx.cancel;
        let chain = ctx.chain;
        let db = ctx.db;

        // Feeder: walks the range in order and closes the input channel
        // when done.
        let feeder = scope.spawn(move || -> Result<(), StageError> {
            for block_num in start_block..=end_block {
                if cancel.is_cancelled() {
                    return Err(StageError::Stopped);
                }
                for tx_logs in chain.tx_logs(block_num)? {
                    if in_send.send(tx_logs).is_err() {
                        // Consumer side went away; its error wins.
                        return Ok(());
                    }
                }
            }
            Ok(())
        });

        // Analyzer workers, each over its own snapshot.
        let mut analyzers = Vec::with_capacity(workers);
        for _ in 0..workers {
            let in_recv = Arc::clone(&in_recv);
            let out_send = out_send.clone();
            analyzers.push(scope.spawn(move || -> Result<(), StageError> {
                let snapshot = db.begin_ro()?;
                loop {
                    if cancel.is_cancelled() {
                        return Err(StageError::Stopped);
                    }
                    let received = in_recv
                        .lock()
                        .map_err(|_| StageError::Provider("poisoned input channel".into()))?
                        .recv();
                    let Ok(tx_logs) = received else { return Ok(()) };

                    let matches = analyze_logs(&*snapshot, analyzer, &tx_logs.logs)?;
                    if matches.is_empty() {
                        continue;
                    }
                    let matched = TxMatchedLogs {
                        block_num: tx_logs.block_num,
                        eth_tx: tx_logs.eth_tx,
                        matches,
                    };
                    if out_send.send(matched).is_err() {
                        return Ok(());
                    }
                }
            }));
        }
        drop(out_send);

        // Single consumer: this thread feeds the handler.
        let mut flush_ticker = Ticker::new(FLUSH_INTERVAL);
        for matched in out_recv.iter() {
            tx_count += 1;
            total_match += 1;
            handler.handle_match(&matched);

            if log_ticker.tick() {
                info!(
                    target: "sync::stages",
                    block = matched.block_num,
                    matches = total_match,
                    "[{}] Scanning logs", s.log_prefix()
                );
            }
            if flush_ticker.tick() {
                handler.flush(false)?;
            }
        }

        feeder.join().map_err(|_| StageError::Provider("feeder thread panicked".into()))??;
        for worker in analyzers {
            worker.join().map_err(|_| StageError::Provider("analyzer thread panicked".into()))??;
        }
        Ok(())
    })?;

    handler.flush(true)?;
    handler.load(ctx.tx)?;

    if !is_short_interval {
        info!(
            target: "sync::stages",
            matches = total_match,
            txs = tx_count,
            "[{}] Totals", s.log_prefix()
        );
    }

    Ok(end_block)
}
