use alloy_primitives::hex;
use explorer_etl::EtlError;
use explorer_kv::{KvError, Table};

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors surfaced by the index core.
///
/// Corruption and invariant variants are fatal: the surrounding
/// transaction must be aborted. [`IndexError::Stopped`] is the
/// distinguished cancellation signal and carries no side effects.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A stored record contradicts the on-disk format invariants.
    #[error("db possibly corrupted: table={table} addr={addr}: {details}")]
    DbCorruption {
        /// Table holding the offending record.
        table: &'static str,
        /// Address (or raw key) the record belongs to, hex-encoded.
        addr: String,
        /// What was found, including the offending bytes where useful.
        details: String,
    },

    /// An arithmetic or bounds invariant was violated in-memory.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A serialized bitmap could not be decoded.
    #[error("malformed bitmap: {0}")]
    Bitmap(String),

    /// A page request exceeded the allowed result window.
    #[error("maximum allowed results: {0}")]
    PageLimit(u64),

    /// Cooperative cancellation.
    #[error("stopped")]
    Stopped,

    /// Storage substrate failure, surfaced as-is.
    #[error(transparent)]
    Kv(#[from] KvError),

    /// External sorter failure.
    #[error(transparent)]
    Etl(#[from] EtlError),
}

impl IndexError {
    /// Builds a corruption error with the offending key hex-encoded.
    pub fn corruption(table: Table, addr: &[u8], details: impl Into<String>) -> Self {
        Self::DbCorruption {
            table: table.name,
            addr: hex::encode_prefixed(addr),
            details: details.into(),
        }
    }
}
