//! Event-source seam between the host node and the stage executors.
//!
//! The stages only need three views of a canonical block: its header, its
//! withdrawals, and its per-transaction logs annotated with the global
//! transaction ordinal. The host implements this against its block store;
//! tests use the mock in [`crate::test_utils`].

use crate::StageError;
use alloy_consensus::Header;
use alloy_eips::eip4895::Withdrawal;
use alloy_primitives::Log;

/// All raw logs of one transaction, annotated with its position.
#[derive(Debug, Clone)]
pub struct TxLogs {
    /// Block the transaction was included in.
    pub block_num: u64,
    /// Global transaction ordinal (`baseTxId` of the block plus the
    /// transaction's index within it).
    pub eth_tx: u64,
    /// The transaction's logs, in emission order.
    pub logs: Vec<Log>,
}

/// Read access to canonical chain data.
pub trait ChainReader: Send + Sync {
    /// Canonical header at `block_num`.
    fn header(&self, block_num: u64) -> Result<Option<Header>, StageError>;

    /// Withdrawals of the canonical block at `block_num`; empty before the
    /// fork that introduced them.
    fn withdrawals(&self, block_num: u64) -> Result<Vec<Withdrawal>, StageError>;

    /// Per-transaction logs of the canonical block at `block_num`.
    /// Transactions without logs may be omitted.
    fn tx_logs(&self, block_num: u64) -> Result<Vec<TxLogs>, StageError>;
}
