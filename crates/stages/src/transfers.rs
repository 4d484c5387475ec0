//! Token transfer analysis and the handlers it feeds.
//!
//! One analyzer recognizes the canonical `Transfer` event for both ERC20
//! and ERC721 (the signatures collide; the indexed-argument count and the
//! token's recorded attributes tell them apart). Its matches fan out to
//! the per-standard transfer index handlers and the holdings handlers
//! through a multi-handler.

use crate::{
    log_indexer::{LogAnalyzer, LogIndexerHandler, TxMatchedLogs},
    StageError,
};
use alloy_primitives::{b256, Address, Log, B256};
use explorer_etl::Collector;
use explorer_index::{
    attributes::read_attributes,
    holdings::{record_holding, unwind_holding},
    CancelToken, IndexHandler, IndexParams, IndexResult, ResourceAwareIndexHandler,
    StandardIndexHandler,
};
use explorer_kv::{
    tables::{ADDR_ATTR_ERC20, ADDR_ATTR_ERC721},
    KvRwTx, KvTx, Table,
};
use std::collections::HashMap;

/// `keccak256("Transfer(address,address,uint256)")`; shared by ERC20 and
/// ERC721.
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// One recognized token transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferMatch {
    /// The token contract that emitted the log.
    pub token: Address,
    /// Sender.
    pub from: Address,
    /// Recipient.
    pub to: Address,
    /// True for ERC721 transfers.
    pub nft: bool,
}

/// A visitor over the holdings store, passed into
/// [`TransferMatch::unwind_holding`] so the match does not hold a back
/// pointer to its unwinder.
pub trait HoldingsUnwindVisitor {
    /// Removes the `(holder, token)` record iff it was first acquired at
    /// `eth_tx`.
    fn unwind_address_holding(
        &self,
        tx: &dyn KvRwTx,
        holder: Address,
        token: Address,
        eth_tx: u64,
    ) -> Result<(), StageError>;
}

impl TransferMatch {
    /// Drives the holdings unwind for this match through `visitor`.
    pub fn unwind_holding(
        &self,
        tx: &dyn KvRwTx,
        is_nft: bool,
        visitor: &dyn HoldingsUnwindVisitor,
        eth_tx: u64,
    ) -> Result<(), StageError> {
        if self.nft != is_nft {
            return Ok(());
        }
        visitor.unwind_address_holding(tx, self.to, self.token, eth_tx)
    }
}

/// Recognizes ERC20/ERC721 `Transfer` logs.
///
/// Topic arity alone is ambiguous for hostile contracts, so the emitting
/// address must also carry the matching classifier attribute: 2 indexed
/// arguments from an ERC20 token, 3 from an ERC721 token. Anything else
/// is ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransferLogAnalyzer;

impl TransferLogAnalyzer {
    /// Creates the analyzer.
    pub const fn new() -> Self {
        Self
    }
}

impl LogAnalyzer<TransferMatch> for TransferLogAnalyzer {
    fn inspect(&self, tx: &dyn KvTx, log: &Log) -> Result<Option<TransferMatch>, StageError> {
        let topics = log.topics();
        if topics.first() != Some(&TRANSFER_TOPIC) {
            return Ok(None);
        }

        let nft = match topics.len() {
            3 => false,
            4 => true,
            _ => return Ok(None),
        };

        let attrs = read_attributes(tx, log.address)?;
        let expected_bit = if nft { ADDR_ATTR_ERC721 } else { ADDR_ATTR_ERC20 };
        if !attrs.contains(expected_bit) {
            return Ok(None);
        }

        Ok(Some(TransferMatch {
            token: log.address,
            from: Address::from_word(topics[1]),
            to: Address::from_word(topics[2]),
            nft,
        }))
    }
}

/// Fans one analyzer's matches out to several handlers (e.g. ERC20 and
/// ERC721 transfer indexes fed from the same log scan).
pub struct MultiLogIndexerHandler<T> {
    handlers: Vec<Box<dyn LogIndexerHandler<T>>>,
}

impl<T> std::fmt::Debug for MultiLogIndexerHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiLogIndexerHandler").field("handlers", &self.handlers.len()).finish()
    }
}

impl<T> MultiLogIndexerHandler<T> {
    /// Aggregates `handlers`.
    pub fn new(handlers: Vec<Box<dyn LogIndexerHandler<T>>>) -> Self {
        Self { handlers }
    }
}

impl<T> ResourceAwareIndexHandler for MultiLogIndexerHandler<T> {
    fn flush(&mut self, force: bool) -> IndexResult<()> {
        for h in &mut self.handlers {
            h.flush(force)?;
        }
        Ok(())
    }

    fn load(&mut self, tx: &dyn KvRwTx) -> IndexResult<()> {
        for h in &mut self.handlers {
            h.load(tx)?;
        }
        Ok(())
    }
}

impl<T> LogIndexerHandler<T> for MultiLogIndexerHandler<T> {
    fn handle_match(&mut self, matched: &TxMatchedLogs<T>) {
        for h in &mut self.handlers {
            h.handle_match(matched);
        }
    }
}

/// Indexes token transfers: the transaction's ordinal is appended to both
/// the sender's and the recipient's index.
#[derive(Debug)]
pub struct TransferLogIndexerHandler {
    inner: StandardIndexHandler,
    nft: bool,
}

impl TransferLogIndexerHandler {
    /// Creates the handler over the given transfer table pair.
    pub fn new(
        prefix: &'static str,
        index_table: Table,
        counter_table: Table,
        nft: bool,
        params: IndexParams,
        cancel: CancelToken,
    ) -> Self {
        Self {
            inner: StandardIndexHandler::new(prefix, index_table, counter_table, params, cancel),
            nft,
        }
    }
}

impl ResourceAwareIndexHandler for TransferLogIndexerHandler {
    fn flush(&mut self, force: bool) -> IndexResult<()> {
        self.inner.flush(force)
    }

    fn load(&mut self, tx: &dyn KvRwTx) -> IndexResult<()> {
        self.inner.load(tx)
    }
}

impl LogIndexerHandler<TransferMatch> for TransferLogIndexerHandler {
    fn handle_match(&mut self, matched: &TxMatchedLogs<TransferMatch>) {
        for res in &matched.matches {
            if res.nft != self.nft {
                continue;
            }
            self.inner.touch_index(res.from, matched.eth_tx);
            self.inner.touch_index(res.to, matched.eth_tx);
        }
    }
}

/// Records first acquisitions: `holder -> token ‖ firstEthTx`.
pub struct TransferLogHolderHandler {
    table: Table,
    nft: bool,
    collector: Collector,
    // (holder, token) -> earliest ethTx seen since the last spill.
    buffered: HashMap<(Address, Address), u64>,
}

impl std::fmt::Debug for TransferLogHolderHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferLogHolderHandler")
            .field("table", &self.table.name)
            .field("nft", &self.nft)
            .finish()
    }
}

impl TransferLogHolderHandler {
    /// Creates the handler over the given holdings table.
    pub fn new(prefix: &'static str, table: Table, nft: bool) -> Self {
        Self {
            table,
            nft,
            collector: Collector::new(prefix, explorer_etl::BUFFER_OPTIMAL_SIZE),
            buffered: HashMap::new(),
        }
    }
}

impl ResourceAwareIndexHandler for TransferLogHolderHandler {
    fn flush(&mut self, force: bool) -> IndexResult<()> {
        if !force && self.buffered.len() < 1_000_000 {
            return Ok(());
        }
        let mut key = [0u8; 40];
        for ((holder, token), eth_tx) in self.buffered.drain() {
            key[..20].copy_from_slice(holder.as_slice());
            key[20..].copy_from_slice(token.as_slice());
            self.collector.collect(&key, &eth_tx.to_be_bytes())?;
        }
        Ok(())
    }

    fn load(&mut self, tx: &dyn KvRwTx) -> IndexResult<()> {
        let collector = std::mem::replace(
            &mut self.collector,
            Collector::new("holdings", explorer_etl::BUFFER_OPTIMAL_SIZE),
        );
        let table = self.table;
        collector.load::<explorer_index::IndexError, _>(|k, v| {
            let holder = Address::from_slice(&k[..20]);
            let token = Address::from_slice(&k[20..40]);
            let eth_tx = u64::from_be_bytes(v.try_into().map_err(|_| {
                explorer_index::IndexError::corruption(table, k, "holding value of unexpected length")
            })?);
            // First write wins; the earliest acquisition stands.
            record_holding(tx, table, holder, token, eth_tx)?;
            Ok(())
        })
    }
}

impl LogIndexerHandler<TransferMatch> for TransferLogHolderHandler {
    fn handle_match(&mut self, matched: &TxMatchedLogs<TransferMatch>) {
        for res in &matched.matches {
            if res.nft != self.nft {
                continue;
            }
            self.buffered
                .entry((res.to, res.token))
                .and_modify(|e| *e = (*e).min(matched.eth_tx))
                .or_insert(matched.eth_tx);
        }
    }
}

/// The holdings unwinder is its own visitor (the match calls back into it).
#[derive(Debug)]
pub struct TransferHoldingsUnwinder {
    table: Table,
    /// Which transfer family this unwinder handles.
    pub nft: bool,
}

impl TransferHoldingsUnwinder {
    /// Creates the unwinder over the given holdings table.
    pub const fn new(table: Table, nft: bool) -> Self {
        Self { table, nft }
    }
}

impl HoldingsUnwindVisitor for TransferHoldingsUnwinder {
    fn unwind_address_holding(
        &self,
        tx: &dyn KvRwTx,
        holder: Address,
        token: Address,
        eth_tx: u64,
    ) -> Result<(), StageError> {
        unwind_holding(tx, self.table, holder, token, eth_tx)?;
        Ok(())
    }
}
