use serde::{Deserialize, Serialize};

/// Maximum byte size of a single chunk value.
///
/// A chunk record is `key (28 B) + value (<= chunk_limit)`; the default
/// keeps the record inside a 4 KiB page with dup-sort overhead to spare.
/// Must be a multiple of 8 so the cutter always cuts at an id boundary.
pub const DEFAULT_CHUNK_LIMIT: usize = 2560;

/// Serialized-bitmap memory bound at which the handler spills to the
/// external sorter.
pub const DEFAULT_FLUSH_THRESHOLD: u64 = 256 * 1024 * 1024;

/// Tuning parameters for the chunked index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    /// Maximum chunk value size in bytes.
    pub chunk_limit: usize,
    /// Buffered-bitmap size at which `flush(false)` actually spills.
    pub flush_threshold: u64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self { chunk_limit: DEFAULT_CHUNK_LIMIT, flush_threshold: DEFAULT_FLUSH_THRESHOLD }
    }
}

impl IndexParams {
    /// Parameters with a small chunk limit, for tests that need to force
    /// chunk cuts with few ids.
    pub const fn with_chunk_limit(chunk_limit: usize) -> Self {
        Self { chunk_limit, flush_threshold: DEFAULT_FLUSH_THRESHOLD }
    }
}
