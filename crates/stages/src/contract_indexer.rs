//! Contract classifier stages.
//!
//! The deployment indexer walks the upstream `Deployments` table and
//! records every contract creation in the all-contracts ordinal table.
//! Classifier stages then walk a source kind's ordinal entries over the
//! block range, probe each address, and on match append to their own
//! ordinal table and merge the kind's attribute bits.
//!
//! On first sync (progress 0, driver-owned transaction), probing fans out
//! across worker threads; results are re-sequenced before hitting the
//! ordinal appender so match order stays chronological.

use crate::{
    driver::ExecCtx,
    probe::ProberFactory,
    stage::{StageState, UnwindState},
    ticker::Ticker,
    StageError,
};
use alloy_primitives::Address;
use explorer_index::{
    attributes::{merge_attributes, remove_attributes},
    ordinal::{for_each_in_block_range, rewind_above_block, OrdinalAppender, OrdinalEntry},
    IndexError,
};
use explorer_kv::{tables, Cursor as _, DupCursor as _, KvTx as _, Table};
use roaring::RoaringTreemap;
use std::{
    collections::BTreeMap,
    sync::{mpsc, Arc, Mutex},
};
use tracing::info;

/// Wiring of one classifier stage.
#[derive(Debug, Clone)]
pub struct ClassifierSpec {
    /// Ordinal table of the source kind whose matches get probed.
    pub source: Table,
    /// Ordinal table receiving this kind's matches.
    pub target: Table,
    /// Attribute bits recorded for matches (and cleared on unwind).
    pub attr_bits: RoaringTreemap,
    /// Per-worker prober factory.
    pub prober: ProberFactory,
}

/// Forward executor of the deployment indexer: every `Deployments` entry
/// in the range becomes an all-contracts ordinal entry.
pub fn deployment_indexer_executor(
    ctx: &ExecCtx<'_>,
    s: &StageState,
    start_block: u64,
    end_block: u64,
    _is_short_interval: bool,
    log_ticker: &mut Ticker,
) -> Result<u64, StageError> {
    let mut appender = OrdinalAppender::new(ctx.tx, tables::ALL_CONTRACTS)?;
    let mut cur = ctx.tx.cursor_dup(tables::DEPLOYMENTS)?;

    let mut total = 0u64;
    let mut pair = cur.seek(&start_block.to_be_bytes())?;
    while let Some((k, v)) = pair {
        if k.len() != 8 {
            return Err(IndexError::corruption(tables::DEPLOYMENTS, &k, "malformed key").into());
        }
        let block_num = u64::from_be_bytes(k[..].try_into().expect("8 bytes"));
        if block_num > end_block {
            break;
        }
        let addr = Address::from_slice(&v[..20]);
        appender.append(ctx.tx, block_num, addr)?;
        total += 1;

        if ctx.cancel.is_cancelled() {
            return Err(StageError::Stopped);
        }
        if log_ticker.tick() {
            info!(
                target: "sync::stages",
                block = block_num,
                contracts = total,
                "[{}] Indexing deployments", s.log_prefix()
            );
        }
        pair = cur.next()?;
    }

    Ok(end_block)
}

/// Forward executor of a classifier stage. Picks the concurrent fan-out
/// on first sync, the sequential path otherwise.
pub fn run_classifier_executor(
    ctx: &ExecCtx<'_>,
    s: &StageState,
    start_block: u64,
    end_block: u64,
    is_short_interval: bool,
    log_ticker: &mut Ticker,
    spec: &ClassifierSpec,
) -> Result<u64, StageError> {
    // Source entries are cheap (28 bytes); materialize the work list.
    let mut work: Vec<OrdinalEntry> = Vec::new();
    for_each_in_block_range(ctx.tx, spec.source, start_block, end_block, |entry| {
        work.push(entry);
        Ok(())
    })?;

    if work.is_empty() {
        return Ok(end_block);
    }

    if s.block_number == 0 && ctx.is_internal_tx {
        run_concurrent_classifier(ctx, s, is_short_interval, log_ticker, spec, work)?;
    } else {
        run_sequential_classifier(ctx, s, log_ticker, spec, work)?;
    }
    Ok(end_block)
}

// Probers may report more than the stage's own bits (e.g. the ERC721
// metadata extension); all reported bits are recorded.
fn record_match(
    ctx: &ExecCtx<'_>,
    appender: &mut OrdinalAppender,
    entry: OrdinalEntry,
    attrs: &RoaringTreemap,
) -> Result<(), StageError> {
    appender.append(ctx.tx, entry.block_num, entry.addr)?;
    merge_attributes(ctx.tx, entry.addr, attrs)?;
    Ok(())
}

fn run_sequential_classifier(
    ctx: &ExecCtx<'_>,
    s: &StageState,
    log_ticker: &mut Ticker,
    spec: &ClassifierSpec,
    work: Vec<OrdinalEntry>,
) -> Result<(), StageError> {
    let prober = (spec.prober)();
    let mut vm = ctx.vms.probe_vm()?;
    let mut appender = OrdinalAppender::new(ctx.tx, spec.target)?;

    let mut total_match = 0u64;
    let total = work.len();
    for (i, entry) in work.into_iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            return Err(StageError::Stopped);
        }

        if let Some(attrs) = prober.probe(&mut *vm, entry.block_num, entry.addr, &[], &[])? {
            total_match += 1;
            record_match(ctx, &mut appender, entry, &attrs)?;
        }

        if log_ticker.tick() {
            info!(
                target: "sync::stages",
                probed = i + 1,
                of = total,
                matches = total_match,
                "[{}] Probing contracts", s.log_prefix()
            );
        }
    }
    Ok(())
}

fn run_concurrent_classifier(
    ctx: &ExecCtx<'_>,
    s: &StageState,
    is_short_interval: bool,
    log_ticker: &mut Ticker,
    spec: &ClassifierSpec,
    work: Vec<OrdinalEntry>,
) -> Result<(), StageError> {
    if !is_short_interval {
        info!(target: "sync::stages", "[{}] Using concurrent executor", s.log_prefix());
    }

    let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let mut appender = OrdinalAppender::new(ctx.tx, spec.target)?;
    let mut total_match = 0u64;

    std::thread::scope(|scope| -> Result<(), StageError> {
        type Probed = (usize, OrdinalEntry, Option<RoaringTreemap>);
        let (in_send, in_recv) = mpsc::sync_channel::<(usize, OrdinalEntry)>(workers * 4);
        let in_recv = Arc::new(Mutex::new(in_recv));
        let (out_send, out_recv) = mpsc::sync_channel::<Probed>(workers * 4);

        let cancel = ctx.cancel;
        let vms = ctx.vms;
        let prober_factory = spec.prober;

        let total = work.len();
        let feeder = scope.spawn(move || -> Result<(), StageError> {
            for job in work.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    return Err(StageError::Stopped);
                }
                if in_send.send(job).is_err() {
                    return Ok(());
                }
            }
            Ok(())
        });

        let mut probers = Vec::with_capacity(workers);
        for _ in 0..workers {
            let in_recv = Arc::clone(&in_recv);
            let out_send = out_send.clone();
            probers.push(scope.spawn(move || -> Result<(), StageError> {
                let prober = prober_factory();
                let mut vm = vms.probe_vm()?;
                loop {
                    if cancel.is_cancelled() {
                        return Err(StageError::Stopped);
                    }
                    let received = in_recv
                        .lock()
                        .map_err(|_| StageError::Provider("poisoned input channel".into()))?
                        .recv();
                    let Ok((seq, entry)) = received else { return Ok(()) };

                    let attrs =
                        prober.probe(&mut *vm, entry.block_num, entry.addr, &[], &[])?;
                    if out_send.send((seq, entry, attrs)).is_err() {
                        return Ok(());
                    }
                }
            }));
        }
        drop(out_send);

        // Single consumer: re-sequence the out-of-order worker results so
        // ordinals stay in match order.
        let mut pending: BTreeMap<usize, (OrdinalEntry, Option<RoaringTreemap>)> = BTreeMap::new();
        let mut next_seq = 0usize;
        for (seq, entry, attrs) in out_recv.iter() {
            pending.insert(seq, (entry, attrs));
            while let Some((entry, attrs)) = pending.remove(&next_seq) {
                next_seq += 1;
                if let Some(attrs) = attrs {
                    total_match += 1;
                    record_match(ctx, &mut appender, entry, &attrs)?;
                }
                if log_ticker.tick() {
                    info!(
                        target: "sync::stages",
                        probed = next_seq,
                        of = total,
                        matches = total_match,
                        "[{}] Probing contracts", s.log_prefix()
                    );
                }
            }
        }

        feeder.join().map_err(|_| StageError::Provider("feeder thread panicked".into()))??;
        for worker in probers {
            worker.join().map_err(|_| StageError::Provider("prober thread panicked".into()))??;
        }
        Ok(())
    })?;

    if !is_short_interval {
        info!(target: "sync::stages", matches = total_match, "[{}] Totals", s.log_prefix());
    }
    Ok(())
}

/// Unwind executor of deployment and classifier stages: drop every match
/// first seen past the unwind point and clear its attribute bits.
pub fn run_classifier_unwind(
    ctx: &ExecCtx<'_>,
    u: &UnwindState,
    log_ticker: &mut Ticker,
    target: Table,
    attr_bits: Option<&RoaringTreemap>,
) -> Result<(), StageError> {
    let dropped = rewind_above_block(ctx.tx, target, u.unwind_point, |addr| {
        if let Some(bits) = attr_bits {
            remove_attributes(ctx.tx, addr, bits)?;
        }
        if ctx.cancel.is_cancelled() {
            return Err(IndexError::Stopped);
        }
        Ok(())
    })?;

    if dropped > 0 || log_ticker.tick() {
        info!(
            target: "sync::stages",
            dropped,
            "[{}] Unwound contract matches", u.log_prefix()
        );
    }
    Ok(())
}
