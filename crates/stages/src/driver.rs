//! Generic stage forward/unwind drivers.
//!
//! The drivers own the cross-cutting tasks of every stage invocation:
//! computing the block range from the parent stage's progress, suppressing
//! verbose logs on short ranges, running the plugged-in executor, saving
//! the progress cursor and committing. Business logic lives in the
//! executor functions wired by the stage catalog.

use crate::{
    probe::VmFactory,
    stage::{save_stage_progress, stage_progress, StageId, StageState, UnwindState},
    ticker::{Ticker, LOG_INTERVAL, SHORT_RANGE_EXECUTION_THRESHOLD},
    ChainReader, StageError,
};
use explorer_index::CancelToken;
use explorer_kv::{KvDb, KvRwTx};
use tracing::info;

/// Everything an executor may reach during one stage invocation.
///
/// `db` is provided for the specific first-sync use case of spawning
/// read-only worker snapshots; everything else goes through `tx`.
pub struct ExecCtx<'a> {
    /// Database handle, for concurrent executors only.
    pub db: &'a dyn KvDb,
    /// The stage's write transaction.
    pub tx: &'a dyn KvRwTx,
    /// True when the driver owns `tx` (no outer transaction); concurrent
    /// first-sync executors require this.
    pub is_internal_tx: bool,
    /// Canonical chain data.
    pub chain: &'a dyn ChainReader,
    /// Per-worker VM factory for contract probing.
    pub vms: &'a dyn VmFactory,
    /// Cooperative cancellation signal.
    pub cancel: &'a CancelToken,
}

impl std::fmt::Debug for ExecCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx").field("is_internal_tx", &self.is_internal_tx).finish()
    }
}

/// A stage's forward executor. Returns the last finished block.
pub type ExecFn = Box<
    dyn Fn(&ExecCtx<'_>, &StageState, u64, u64, bool, &mut Ticker) -> Result<u64, StageError>
        + Send
        + Sync,
>;

/// A stage's unwind executor.
pub type UnwindFn = Box<
    dyn Fn(&ExecCtx<'_>, &UnwindState, bool, &mut Ticker) -> Result<(), StageError> + Send + Sync,
>;

/// One entry of the stage catalog.
pub struct Stage {
    /// Stage identity, log prefix and progress key.
    pub id: StageId,
    /// Human-readable description.
    pub description: &'static str,
    /// The stage whose progress bounds this stage's range.
    pub parent: StageId,
    /// Forward executor.
    pub forward: ExecFn,
    /// Unwind executor.
    pub unwind: UnwindFn,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("description", &self.description)
            .finish()
    }
}

/// Shared collaborators for running stages.
#[derive(Clone, Copy)]
pub struct StageRunner<'a> {
    /// Database handle; the runner begins and commits one write
    /// transaction per stage invocation.
    pub db: &'a dyn KvDb,
    /// Canonical chain data.
    pub chain: &'a dyn ChainReader,
    /// VM factory for contract probing.
    pub vms: &'a dyn VmFactory,
    /// Cancellation signal threaded into every executor.
    pub cancel: &'a CancelToken,
}

impl std::fmt::Debug for StageRunner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner").finish()
    }
}

impl StageRunner<'_> {
    /// Runs `stage` forward up to its parent's progress and commits.
    ///
    /// On error or cancellation the transaction is dropped and the
    /// progress cursor keeps its previous value.
    pub fn run(&self, stage: &Stage) -> Result<(), StageError> {
        let tx = self.db.begin_rw()?;

        // A saved block number of 0 means the stage never ran and must
        // start at genesis; otherwise continue after the cursor. The end
        // bound is the parent stage's progress; a parent behind us means
        // the parent was forcefully reset, so skip silently.
        let progress = stage_progress(&*tx, stage.id)?;
        let start_block = if progress > 0 { progress + 1 } else { 0 };
        let end_block = stage_progress(&*tx, stage.parent)?;
        if start_block > end_block {
            return Ok(());
        }

        let is_short_interval = end_block - start_block + 1 <= SHORT_RANGE_EXECUTION_THRESHOLD;
        if !is_short_interval {
            info!(target: "sync::stages", from = start_block, to = end_block, "[{}] Started", stage.id);
        }

        let ctx = ExecCtx {
            db: self.db,
            tx: &*tx,
            is_internal_tx: true,
            chain: self.chain,
            vms: self.vms,
            cancel: self.cancel,
        };
        let state = StageState { id: stage.id, block_number: progress };
        let mut log_ticker = Ticker::new(LOG_INTERVAL);

        let last_finished =
            (stage.forward)(&ctx, &state, start_block, end_block, is_short_interval, &mut log_ticker)?;

        if !is_short_interval {
            info!(target: "sync::stages", latest = last_finished, "[{}] Finished", stage.id);
        }

        save_stage_progress(&*tx, stage.id, last_finished)?;
        tx.commit()?;
        Ok(())
    }

    /// Unwinds `stage` to `unwind_point` and commits.
    pub fn unwind(&self, stage: &Stage, unwind_point: u64) -> Result<(), StageError> {
        let tx = self.db.begin_rw()?;

        let current_block = stage_progress(&*tx, stage.id)?;
        if current_block <= unwind_point {
            return Ok(());
        }

        let is_short_interval = current_block - unwind_point <= SHORT_RANGE_EXECUTION_THRESHOLD;
        if !is_short_interval {
            info!(
                target: "sync::stages",
                from = current_block,
                to = unwind_point,
                "[{}] Unwind started", stage.id
            );
        }

        let ctx = ExecCtx {
            db: self.db,
            tx: &*tx,
            is_internal_tx: true,
            chain: self.chain,
            vms: self.vms,
            cancel: self.cancel,
        };
        let state = UnwindState { id: stage.id, unwind_point, current_block };
        let mut log_ticker = Ticker::new(LOG_INTERVAL);

        (stage.unwind)(&ctx, &state, is_short_interval, &mut log_ticker)?;

        if !is_short_interval {
            info!(target: "sync::stages", latest = unwind_point, "[{}] Unwind finished", stage.id);
        }

        save_stage_progress(&*tx, stage.id, unwind_point)?;
        tx.commit()?;
        Ok(())
    }
}
