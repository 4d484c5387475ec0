//! Ordered key-value substrate for the explorer secondary indexes.
//!
//! This crate defines the storage contract the index code is written
//! against: an ordered map with read cursors, dup-sorted tables whose
//! values are themselves ordered, and write transactions with atomic
//! commit/rollback. The traits mirror what an MDBX-style store provides;
//! [`mem::MemDb`] is an in-memory engine implementing the same contract,
//! used by tests and tooling. A persistent engine is a drop-in behind the
//! same traits.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod error;
pub mod mem;
pub mod tables;
mod traits;

pub use error::{KvError, KvResult};
pub use tables::{Table, TableKind};
pub use traits::{Cursor, DupCursor, KvDb, KvRwTx, KvTx, Pair, RwCursor, RwDupCursor};
