//! Staged-sync drivers feeding the explorer secondary indexes.
//!
//! A stage is a resumable batch job keyed by a parent stage and a
//! progress cursor. On each invocation the driver computes the block
//! range from the parent's progress, walks it in one of three modes
//! (headers, bodies, per-transaction logs), routes events into the index
//! handlers, and commits atomically. Every stage has a companion unwind
//! executor that rewinds its tables when the canonical chain reorganizes.
//!
//! The [`catalog::standard_stages`] table wires the whole family:
//! contract classifiers (ERC20/165/721/1155/1167/4626), transfer and
//! holdings indexers, blocks-rewarded and withdrawals.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod body_indexer;
pub mod catalog;
pub mod contract_indexer;
mod driver;
mod error;
pub mod header_indexer;
pub mod log_indexer;
pub mod probe;
mod provider;
pub mod stage;
mod ticker;
pub mod transfers;
pub mod unwind;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use driver::{ExecCtx, ExecFn, Stage, StageRunner, UnwindFn};
pub use error::StageError;
pub use provider::{ChainReader, TxLogs};
pub use stage::{stage_progress, StageId, StageState, UnwindState};
pub use ticker::{Ticker, FLUSH_INTERVAL, LOG_INTERVAL, SHORT_RANGE_EXECUTION_THRESHOLD};
