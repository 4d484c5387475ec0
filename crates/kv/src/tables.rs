//! Table catalog for the explorer indexes.
//!
//! Every per-stream index is a pair of tables: the chunk table
//! (`addr ‖ terminator -> packed event ids`) and its dup-sorted counter
//! table (`addr -> cumulative count ‖ terminator`). Contract classifier
//! results live in dense ordinal tables (`ordinal -> blockNum ‖ addr`).
//! All multi-byte integers are big-endian.

use std::fmt;

/// Whether a table holds a single value per key or an ordered set of
/// duplicate values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// One value per key.
    Plain,
    /// Multiple values per key, values sorted bytewise.
    DupSort,
}

/// A named table with its sort kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Table {
    /// Table name, unique within the database.
    pub name: &'static str,
    /// Plain or dup-sorted.
    pub kind: TableKind,
}

impl Table {
    /// Declares a plain table.
    pub const fn plain(name: &'static str) -> Self {
        Self { name, kind: TableKind::Plain }
    }

    /// Declares a dup-sorted table.
    pub const fn dup(name: &'static str) -> Self {
        Self { name, kind: TableKind::DupSort }
    }

    /// Returns true for dup-sorted tables.
    pub const fn is_dup_sort(&self) -> bool {
        matches!(self.kind, TableKind::DupSort)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// ERC20 transfer chunks: `addr ‖ terminator -> packed ethTx ids`.
pub const ERC20_TRANSFER_INDEX: Table = Table::plain("Erc20TransferIndex");
/// ERC20 transfer counters: `addr -> cumCount ‖ terminator` (dup-sorted).
pub const ERC20_TRANSFER_COUNTER: Table = Table::dup("Erc20TransferCounter");
/// ERC721 transfer chunks.
pub const ERC721_TRANSFER_INDEX: Table = Table::plain("Erc721TransferIndex");
/// ERC721 transfer counters.
pub const ERC721_TRANSFER_COUNTER: Table = Table::dup("Erc721TransferCounter");
/// Blocks-rewarded chunks: `coinbase ‖ terminator -> packed block numbers`.
pub const BLOCKS_REWARDED_INDEX: Table = Table::plain("BlocksRewardedIndex");
/// Blocks-rewarded counters.
pub const BLOCKS_REWARDED_COUNTER: Table = Table::dup("BlocksRewardedCounter");
/// Withdrawals chunks: `addr ‖ terminator -> packed withdrawal indices`.
pub const WITHDRAWALS_INDEX: Table = Table::plain("WithdrawalsIndex");
/// Withdrawals counters.
pub const WITHDRAWALS_COUNTER: Table = Table::dup("WithdrawalsCounter");
/// `withdrawalIndex -> blockNum`, one entry per block carrying withdrawals
/// (keyed by the block's last withdrawal index).
pub const WITHDRAWAL_IDX_2_BLOCK: Table = Table::plain("WithdrawalIdx2Block");

/// ERC20 holdings: `holder -> token ‖ firstEthTx` (dup-sorted).
pub const ERC20_HOLDINGS: Table = Table::dup("Erc20Holdings");
/// ERC721 holdings.
pub const ERC721_HOLDINGS: Table = Table::dup("Erc721Holdings");

/// Per-address classifier attribute bitmaps.
pub const ADDR_ATTRIBUTES: Table = Table::plain("AddrAttributes");

/// Contract creations discovered by the upstream deployment stage:
/// `blockNum -> addr` (dup-sorted).
pub const DEPLOYMENTS: Table = Table::dup("Deployments");

/// All contracts, in creation order: `ordinal -> blockNum ‖ addr`.
pub const ALL_CONTRACTS: Table = Table::plain("AllContracts");
/// ERC20 token contracts, in match order.
pub const ERC20_CONTRACTS: Table = Table::plain("Erc20Contracts");
/// ERC165 contracts, in match order.
pub const ERC165_CONTRACTS: Table = Table::plain("Erc165Contracts");
/// ERC721 token contracts, in match order.
pub const ERC721_CONTRACTS: Table = Table::plain("Erc721Contracts");
/// ERC1155 token contracts, in match order.
pub const ERC1155_CONTRACTS: Table = Table::plain("Erc1155Contracts");
/// ERC1167 minimal proxies, in match order.
pub const ERC1167_CONTRACTS: Table = Table::plain("Erc1167Contracts");
/// ERC4626 vault contracts, in match order.
pub const ERC4626_CONTRACTS: Table = Table::plain("Erc4626Contracts");

/// Stage progress: `stage id -> last processed block`.
pub const SYNC_STAGE_PROGRESS: Table = Table::plain("SyncStageProgress");

/// Attribute bit: address is an ERC20 token.
pub const ADDR_ATTR_ERC20: u64 = 0;
/// Attribute bit: address implements ERC165.
pub const ADDR_ATTR_ERC165: u64 = 1;
/// Attribute bit: address is an ERC721 token.
pub const ADDR_ATTR_ERC721: u64 = 2;
/// Attribute bit: address implements the ERC721 metadata interface.
pub const ADDR_ATTR_ERC721_MD: u64 = 3;
/// Attribute bit: address is an ERC1155 token.
pub const ADDR_ATTR_ERC1155: u64 = 4;
/// Attribute bit: address is an ERC1167 minimal proxy.
pub const ADDR_ATTR_ERC1167: u64 = 5;
/// Attribute bit: address is an ERC4626 vault.
pub const ADDR_ATTR_ERC4626: u64 = 6;
