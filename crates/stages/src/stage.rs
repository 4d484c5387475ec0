//! Stage identities and progress cursors.

use crate::StageError;
use explorer_kv::{tables, KvRwTx, KvTx};
use std::fmt;

/// Identifies a stage; doubles as its log prefix and progress key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(pub &'static str);

impl StageId {
    /// Host stage producing canonical blocks; parent of the root indexers.
    pub const BODIES: Self = Self("Bodies");
    /// Contract creation indexer.
    pub const CONTRACT_INDEXER: Self = Self("ContractIndexer");
    /// ERC20 token classifier.
    pub const ERC20_INDEXER: Self = Self("Erc20Indexer");
    /// ERC165 classifier.
    pub const ERC165_INDEXER: Self = Self("Erc165Indexer");
    /// ERC721 token classifier.
    pub const ERC721_INDEXER: Self = Self("Erc721Indexer");
    /// ERC1155 token classifier.
    pub const ERC1155_INDEXER: Self = Self("Erc1155Indexer");
    /// ERC1167 proxy classifier.
    pub const ERC1167_INDEXER: Self = Self("Erc1167Indexer");
    /// ERC4626 vault classifier.
    pub const ERC4626_INDEXER: Self = Self("Erc4626Indexer");
    /// ERC20/721 transfer indexer.
    pub const ERC20_721_TRANSFERS: Self = Self("Erc20And721Transfers");
    /// ERC20/721 holdings indexer.
    pub const ERC20_721_HOLDINGS: Self = Self("Erc20And721Holdings");
    /// Blocks-rewarded indexer.
    pub const BLOCKS_REWARDED: Self = Self("BlocksRewarded");
    /// Consensus-layer withdrawals indexer.
    pub const WITHDRAWALS: Self = Self("Withdrawals");
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Last fully processed block of `id`, or 0 if the stage never ran.
pub fn stage_progress(tx: &dyn KvTx, id: StageId) -> Result<u64, StageError> {
    match tx.get(tables::SYNC_STAGE_PROGRESS, id.0.as_bytes())? {
        Some(v) if v.len() == 8 => {
            Ok(u64::from_be_bytes(v[..].try_into().expect("8 bytes")))
        }
        Some(_) => Err(StageError::Provider(format!("malformed progress record for stage {id}"))),
        None => Ok(0),
    }
}

/// Saves the progress cursor of `id`.
pub fn save_stage_progress(tx: &dyn KvRwTx, id: StageId, block: u64) -> Result<(), StageError> {
    tx.put(tables::SYNC_STAGE_PROGRESS, id.0.as_bytes(), &block.to_be_bytes())?;
    Ok(())
}

/// Forward-execution state handed to executors.
#[derive(Debug, Clone, Copy)]
pub struct StageState {
    /// The executing stage.
    pub id: StageId,
    /// Progress cursor before this invocation.
    pub block_number: u64,
}

impl StageState {
    /// Log prefix for this stage.
    pub const fn log_prefix(&self) -> &'static str {
        self.id.0
    }
}

/// Unwind state handed to unwind executors. The unwind interval is
/// `]unwind_point, current_block]`.
#[derive(Debug, Clone, Copy)]
pub struct UnwindState {
    /// The unwinding stage.
    pub id: StageId,
    /// Height to rewind to; everything above it is removed.
    pub unwind_point: u64,
    /// The stage's progress before the unwind.
    pub current_block: u64,
}

impl UnwindState {
    /// Log prefix for this stage.
    pub const fn log_prefix(&self) -> &'static str {
        self.id.0
    }
}
