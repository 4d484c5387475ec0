//! Chunked append-only per-address index.
//!
//! For each address this index maintains an ordered, monotonically growing
//! sequence of event ids (transaction ordinals, block numbers, withdrawal
//! indices) and answers two queries in sub-linear time: how many events
//! touched the address, and which ids sit at ranks `k..k+n`.
//!
//! ## Layout
//!
//! An address's event set is split into chunks sized to the backing
//! store's pages, keyed `addr ‖ terminator` ([`chunk`]); a parallel
//! dup-sorted counter stream ([`counter`]) carries cumulative counts so
//! rank lookups skip straight to the right chunk. Addresses with a single
//! chunk of at most 256 events collapse to a one-byte optimized counter.
//!
//! ## Pipeline
//!
//! The [`handler`] buffers touches as roaring bitmaps, spills them through
//! an external sorter, and merges the sorted stream into the live tables,
//! re-chunking as needed. The [`unwind`] primitives run the same structure
//! backwards after a chain reorganization.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

pub mod attributes;
mod cancel;
pub mod chunk;
pub mod counter;
mod error;
pub mod handler;
pub mod holdings;
pub mod ordinal;
mod params;
pub mod reader;
pub mod unwind;

pub use cancel::CancelToken;
pub use counter::{CHUNK_TERMINATOR_LAST, OPTIMIZED_COUNTER_MAX};
pub use error::{IndexError, IndexResult};
pub use handler::{IndexHandler, ResourceAwareIndexHandler, StandardIndexHandler};
pub use params::{IndexParams, DEFAULT_CHUNK_LIMIT, DEFAULT_FLUSH_THRESHOLD};
pub use unwind::{rewind_uint64_keyed, IndexUnwinder};
