use explorer_index::IndexError;
use explorer_kv::KvError;

/// Errors surfaced by stage execution.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    /// Cooperative cancellation; the stage's transaction is discarded and
    /// its progress cursor stays at the last committed block.
    #[error("stopped")]
    Stopped,

    /// A block the parent stage promised is missing.
    #[error("missing canonical header for block {0}")]
    MissingHeader(u64),

    /// Index core failure (corruption, invariant violation, sorter I/O).
    #[error(transparent)]
    Index(IndexError),

    /// Storage substrate failure, surfaced as-is.
    #[error(transparent)]
    Kv(#[from] KvError),

    /// Event source failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// Internal VM failure during probing. Per-contract probe failures are
    /// not errors; only the machinery itself reports here.
    #[error("vm error: {0}")]
    Vm(String),
}

impl From<IndexError> for StageError {
    fn from(err: IndexError) -> Self {
        // Keep cancellation distinguishable wherever it bubbles from.
        match err {
            IndexError::Stopped => Self::Stopped,
            other => Self::Index(other),
        }
    }
}
