use crate::{KvResult, Table};

/// A key/value pair as returned by cursor positioning operations.
pub type Pair = (Vec<u8>, Vec<u8>);

/// A read cursor over one table.
///
/// Navigation over dup-sorted tables iterates every `(key, value)`
/// combination; dup-specific movement lives on [`DupCursor`].
pub trait Cursor {
    /// Positions at the first entry.
    fn first(&mut self) -> KvResult<Option<Pair>>;
    /// Positions at the last entry.
    fn last(&mut self) -> KvResult<Option<Pair>>;
    /// Positions at the first entry with key `>= key`.
    fn seek(&mut self, key: &[u8]) -> KvResult<Option<Pair>>;
    /// Positions at `key` exactly, or returns `None`.
    fn seek_exact(&mut self, key: &[u8]) -> KvResult<Option<Pair>>;
    /// Advances to the next entry.
    fn next(&mut self) -> KvResult<Option<Pair>>;
    /// Steps back to the previous entry.
    fn prev(&mut self) -> KvResult<Option<Pair>>;
}

/// A read cursor over a dup-sorted table.
pub trait DupCursor: Cursor {
    /// Positions at key `key`, first duplicate `>= value`. Returns the
    /// matched duplicate, or `None` when the key is absent or no duplicate
    /// is `>=` the probe.
    fn seek_both_range(&mut self, key: &[u8], value: &[u8]) -> KvResult<Option<Vec<u8>>>;
    /// Next duplicate under the current key.
    fn next_dup(&mut self) -> KvResult<Option<Pair>>;
    /// Previous duplicate under the current key.
    fn prev_dup(&mut self) -> KvResult<Option<Pair>>;
    /// Last duplicate under the current key.
    fn last_dup(&mut self) -> KvResult<Option<Vec<u8>>>;
    /// First duplicate of the next key.
    fn next_no_dup(&mut self) -> KvResult<Option<Pair>>;
    /// Number of duplicates under the current key.
    fn count_duplicates(&mut self) -> KvResult<u64>;
}

/// A write cursor over one table.
pub trait RwCursor: Cursor {
    /// Inserts `value` under `key`; plain tables replace the existing value.
    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()>;
    /// Deletes the entry the cursor is positioned on. The cursor keeps its
    /// logical position as an anchor for further navigation.
    fn delete_current(&mut self) -> KvResult<()>;
}

/// A write cursor over a dup-sorted table.
pub trait RwDupCursor: DupCursor + RwCursor {
    /// Deletes the exact `(key, value)` duplicate if present.
    fn delete_exact(&mut self, key: &[u8], value: &[u8]) -> KvResult<()>;
}

/// A read-only transaction: a consistent snapshot of the database.
pub trait KvTx: Send {
    /// Point lookup; on dup-sorted tables returns the first duplicate.
    fn get(&self, table: Table, key: &[u8]) -> KvResult<Option<Vec<u8>>>;
    /// Opens a read cursor.
    fn cursor<'tx>(&'tx self, table: Table) -> KvResult<Box<dyn Cursor + 'tx>>;
    /// Opens a read cursor with dup-sort navigation.
    fn cursor_dup<'tx>(&'tx self, table: Table) -> KvResult<Box<dyn DupCursor + 'tx>>;
}

/// A write transaction. Mutations are invisible to concurrent readers
/// until [`KvRwTx::commit`]; dropping the transaction discards them.
pub trait KvRwTx: KvTx {
    /// Inserts `value` under `key`; plain tables replace the existing value.
    fn put(&self, table: Table, key: &[u8], value: &[u8]) -> KvResult<()>;
    /// Deletes by key, or a single exact duplicate when `value` is given.
    fn delete(&self, table: Table, key: &[u8], value: Option<&[u8]>) -> KvResult<()>;
    /// Opens a write cursor.
    fn cursor_rw<'tx>(&'tx self, table: Table) -> KvResult<Box<dyn RwCursor + 'tx>>;
    /// Opens a write cursor with dup-sort navigation.
    fn cursor_dup_rw<'tx>(&'tx self, table: Table) -> KvResult<Box<dyn RwDupCursor + 'tx>>;
    /// Atomically publishes the transaction's writes.
    fn commit(self: Box<Self>) -> KvResult<()>;
}

/// Handle to a database: a factory of transactions.
///
/// Callers must not run more than one write transaction at a time; the
/// engine does not arbitrate between concurrent writers.
pub trait KvDb: Send + Sync {
    /// Begins a read-only snapshot transaction.
    fn begin_ro(&self) -> KvResult<Box<dyn KvTx>>;
    /// Begins a write transaction.
    fn begin_rw(&self) -> KvResult<Box<dyn KvRwTx>>;
}
