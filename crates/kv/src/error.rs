use crate::Table;

/// Result type for key-value operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors surfaced by the key-value substrate.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// A dup-sort operation was issued against a plain table, or vice versa.
    #[error("table {0} does not support this operation")]
    WrongTableKind(&'static str),

    /// A cursor operation required a positioned cursor.
    #[error("cursor is not positioned on table {0}")]
    NotPositioned(&'static str),

    /// The engine rejected the operation.
    #[error("storage engine: {0}")]
    Engine(String),
}

impl KvError {
    /// Wrong-kind error for `table`.
    pub const fn wrong_kind(table: Table) -> Self {
        Self::WrongTableKind(table.name)
    }
}
