//! In-memory engine implementing the key-value contract.
//!
//! Transactions are copy-on-write snapshots of the whole database: readers
//! get an immutable snapshot, a writer mutates a private copy that is
//! swapped in atomically on commit. This gives the same isolation shape as
//! an MDBX-style store at test/tooling scale.

use crate::{
    Cursor, DupCursor, KvDb, KvError, KvResult, KvRwTx, KvTx, Pair, RwCursor, RwDupCursor, Table,
    TableKind,
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    ops::Bound,
    sync::{Arc, Mutex, MutexGuard, RwLock},
};

type DupSet = BTreeSet<Vec<u8>>;

#[derive(Debug, Default, Clone)]
struct TableData {
    rows: BTreeMap<Vec<u8>, DupSet>,
}

impl TableData {
    fn first(&self) -> Option<Pair> {
        self.rows.iter().next().and_then(|(k, set)| set.iter().next().map(|v| (k.clone(), v.clone())))
    }

    fn last(&self) -> Option<Pair> {
        self.rows
            .iter()
            .next_back()
            .and_then(|(k, set)| set.iter().next_back().map(|v| (k.clone(), v.clone())))
    }

    fn seek(&self, key: &[u8]) -> Option<Pair> {
        self.rows
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
            .and_then(|(k, set)| set.iter().next().map(|v| (k.clone(), v.clone())))
    }

    fn seek_exact(&self, key: &[u8]) -> Option<Pair> {
        self.rows.get(key).and_then(|set| set.iter().next().map(|v| (key.to_vec(), v.clone())))
    }

    /// Next `(key, value)` combination after the anchor, crossing keys.
    fn next_after(&self, key: &[u8], value: &[u8]) -> Option<Pair> {
        if let Some(set) = self.rows.get(key) {
            if let Some(v) =
                set.range::<[u8], _>((Bound::Excluded(value), Bound::Unbounded)).next()
            {
                return Some((key.to_vec(), v.clone()));
            }
        }
        self.rows
            .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .and_then(|(k, set)| set.iter().next().map(|v| (k.clone(), v.clone())))
    }

    /// Previous `(key, value)` combination before the anchor, crossing keys.
    fn prev_before(&self, key: &[u8], value: &[u8]) -> Option<Pair> {
        if let Some(set) = self.rows.get(key) {
            if let Some(v) = set.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(value))).next_back()
            {
                return Some((key.to_vec(), v.clone()));
            }
        }
        self.rows
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
            .and_then(|(k, set)| set.iter().next_back().map(|v| (k.clone(), v.clone())))
    }

    fn put(&mut self, kind: TableKind, key: &[u8], value: &[u8]) {
        match kind {
            TableKind::Plain => {
                let mut set = DupSet::new();
                set.insert(value.to_vec());
                self.rows.insert(key.to_vec(), set);
            }
            TableKind::DupSort => {
                self.rows.entry(key.to_vec()).or_default().insert(value.to_vec());
            }
        }
    }

    fn delete(&mut self, key: &[u8], value: Option<&[u8]>) {
        match value {
            Some(v) => {
                if let Some(set) = self.rows.get_mut(key) {
                    set.remove(v);
                    if set.is_empty() {
                        self.rows.remove(key);
                    }
                }
            }
            None => {
                self.rows.remove(key);
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
struct DbState {
    tables: HashMap<&'static str, TableData>,
}

impl DbState {
    fn table(&self, table: Table) -> Option<&TableData> {
        self.tables.get(table.name)
    }

    fn table_mut(&mut self, table: Table) -> &mut TableData {
        self.tables.entry(table.name).or_default()
    }
}

fn lock(state: &Mutex<DbState>) -> KvResult<MutexGuard<'_, DbState>> {
    state.lock().map_err(|_| KvError::Engine("poisoned state lock".into()))
}

/// In-memory database handle.
#[derive(Debug, Default, Clone)]
pub struct MemDb {
    state: Arc<RwLock<DbState>>,
}

impl MemDb {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> KvResult<DbState> {
        self.state
            .read()
            .map(|s| s.clone())
            .map_err(|_| KvError::Engine("poisoned database lock".into()))
    }
}

impl KvDb for MemDb {
    fn begin_ro(&self) -> KvResult<Box<dyn KvTx>> {
        Ok(Box::new(MemTx { state: Arc::new(Mutex::new(self.snapshot()?)) }))
    }

    fn begin_rw(&self) -> KvResult<Box<dyn KvRwTx>> {
        Ok(Box::new(MemRwTx {
            origin: Arc::clone(&self.state),
            work: Arc::new(Mutex::new(self.snapshot()?)),
        }))
    }
}

/// Read-only snapshot transaction.
#[derive(Debug)]
pub struct MemTx {
    state: Arc<Mutex<DbState>>,
}

/// Write transaction over a private copy of the database.
#[derive(Debug)]
pub struct MemRwTx {
    origin: Arc<RwLock<DbState>>,
    work: Arc<Mutex<DbState>>,
}

fn get_impl(state: &Mutex<DbState>, table: Table, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
    let state = lock(state)?;
    Ok(state.table(table).and_then(|t| t.seek_exact(key)).map(|(_, v)| v))
}

impl KvTx for MemTx {
    fn get(&self, table: Table, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        get_impl(&self.state, table, key)
    }

    fn cursor<'tx>(&'tx self, table: Table) -> KvResult<Box<dyn Cursor + 'tx>> {
        Ok(Box::new(MemCursor::new(Arc::clone(&self.state), table)))
    }

    fn cursor_dup<'tx>(&'tx self, table: Table) -> KvResult<Box<dyn DupCursor + 'tx>> {
        if !table.is_dup_sort() {
            return Err(KvError::wrong_kind(table));
        }
        Ok(Box::new(MemCursor::new(Arc::clone(&self.state), table)))
    }
}

impl KvTx for MemRwTx {
    fn get(&self, table: Table, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        get_impl(&self.work, table, key)
    }

    fn cursor<'tx>(&'tx self, table: Table) -> KvResult<Box<dyn Cursor + 'tx>> {
        Ok(Box::new(MemCursor::new(Arc::clone(&self.work), table)))
    }

    fn cursor_dup<'tx>(&'tx self, table: Table) -> KvResult<Box<dyn DupCursor + 'tx>> {
        if !table.is_dup_sort() {
            return Err(KvError::wrong_kind(table));
        }
        Ok(Box::new(MemCursor::new(Arc::clone(&self.work), table)))
    }
}

impl KvRwTx for MemRwTx {
    fn put(&self, table: Table, key: &[u8], value: &[u8]) -> KvResult<()> {
        let mut state = lock(&self.work)?;
        state.table_mut(table).put(table.kind, key, value);
        Ok(())
    }

    fn delete(&self, table: Table, key: &[u8], value: Option<&[u8]>) -> KvResult<()> {
        let mut state = lock(&self.work)?;
        let value = if table.is_dup_sort() { value } else { None };
        state.table_mut(table).delete(key, value);
        Ok(())
    }

    fn cursor_rw<'tx>(&'tx self, table: Table) -> KvResult<Box<dyn RwCursor + 'tx>> {
        Ok(Box::new(MemCursor::new(Arc::clone(&self.work), table)))
    }

    fn cursor_dup_rw<'tx>(&'tx self, table: Table) -> KvResult<Box<dyn RwDupCursor + 'tx>> {
        if !table.is_dup_sort() {
            return Err(KvError::wrong_kind(table));
        }
        Ok(Box::new(MemCursor::new(Arc::clone(&self.work), table)))
    }

    fn commit(self: Box<Self>) -> KvResult<()> {
        let work = {
            let mut guard = lock(&self.work)?;
            std::mem::take(&mut *guard)
        };
        let mut origin = self
            .origin
            .write()
            .map_err(|_| KvError::Engine("poisoned database lock".into()))?;
        *origin = work;
        Ok(())
    }
}

/// Cursor over one table. The cursor navigates by value anchor, so it
/// stays usable after `delete_current`.
#[derive(Debug)]
struct MemCursor {
    state: Arc<Mutex<DbState>>,
    table: Table,
    pos: Option<Pair>,
}

impl MemCursor {
    fn new(state: Arc<Mutex<DbState>>, table: Table) -> Self {
        Self { state, table, pos: None }
    }

    fn update(&mut self, pair: Option<Pair>) -> KvResult<Option<Pair>> {
        if let Some(p) = &pair {
            self.pos = Some(p.clone());
        }
        Ok(pair)
    }

    fn anchor(&self) -> KvResult<&Pair> {
        self.pos.as_ref().ok_or(KvError::NotPositioned(self.table.name))
    }
}

impl Cursor for MemCursor {
    fn first(&mut self) -> KvResult<Option<Pair>> {
        let pair = lock(&self.state)?.table(self.table).and_then(TableData::first);
        self.update(pair)
    }

    fn last(&mut self) -> KvResult<Option<Pair>> {
        let pair = lock(&self.state)?.table(self.table).and_then(TableData::last);
        self.update(pair)
    }

    fn seek(&mut self, key: &[u8]) -> KvResult<Option<Pair>> {
        let pair = lock(&self.state)?.table(self.table).and_then(|t| t.seek(key));
        self.update(pair)
    }

    fn seek_exact(&mut self, key: &[u8]) -> KvResult<Option<Pair>> {
        let pair = lock(&self.state)?.table(self.table).and_then(|t| t.seek_exact(key));
        self.update(pair)
    }

    fn next(&mut self) -> KvResult<Option<Pair>> {
        let Some((k, v)) = self.pos.clone() else { return self.first() };
        let pair = lock(&self.state)?.table(self.table).and_then(|t| t.next_after(&k, &v));
        self.update(pair)
    }

    fn prev(&mut self) -> KvResult<Option<Pair>> {
        let Some((k, v)) = self.pos.clone() else { return self.last() };
        let pair = lock(&self.state)?.table(self.table).and_then(|t| t.prev_before(&k, &v));
        self.update(pair)
    }
}

impl DupCursor for MemCursor {
    fn seek_both_range(&mut self, key: &[u8], value: &[u8]) -> KvResult<Option<Vec<u8>>> {
        let found = lock(&self.state)?.table(self.table).and_then(|t| {
            t.rows.get(key).and_then(|set| {
                set.range::<[u8], _>((Bound::Included(value), Bound::Unbounded))
                    .next()
                    .cloned()
            })
        });
        match found {
            Some(v) => {
                self.pos = Some((key.to_vec(), v.clone()));
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }

    fn next_dup(&mut self) -> KvResult<Option<Pair>> {
        let (k, v) = self.anchor()?.clone();
        let pair = lock(&self.state)?.table(self.table).and_then(|t| {
            t.rows.get(&k).and_then(|set| {
                set.range::<[u8], _>((Bound::Excluded(&v[..]), Bound::Unbounded))
                    .next()
                    .map(|nv| (k.clone(), nv.clone()))
            })
        });
        self.update(pair)
    }

    fn prev_dup(&mut self) -> KvResult<Option<Pair>> {
        let (k, v) = self.anchor()?.clone();
        let pair = lock(&self.state)?.table(self.table).and_then(|t| {
            t.rows.get(&k).and_then(|set| {
                set.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(&v[..])))
                    .next_back()
                    .map(|pv| (k.clone(), pv.clone()))
            })
        });
        self.update(pair)
    }

    fn last_dup(&mut self) -> KvResult<Option<Vec<u8>>> {
        let (k, _) = self.anchor()?.clone();
        let found = lock(&self.state)?
            .table(self.table)
            .and_then(|t| t.rows.get(&k).and_then(|set| set.iter().next_back().cloned()));
        if let Some(v) = &found {
            self.pos = Some((k, v.clone()));
        }
        Ok(found)
    }

    fn next_no_dup(&mut self) -> KvResult<Option<Pair>> {
        let (k, _) = self.anchor()?.clone();
        let pair = lock(&self.state)?.table(self.table).and_then(|t| {
            t.rows
                .range::<[u8], _>((Bound::Excluded(&k[..]), Bound::Unbounded))
                .next()
                .and_then(|(nk, set)| set.iter().next().map(|v| (nk.clone(), v.clone())))
        });
        self.update(pair)
    }

    fn count_duplicates(&mut self) -> KvResult<u64> {
        let (k, _) = self.anchor()?.clone();
        Ok(lock(&self.state)?
            .table(self.table)
            .and_then(|t| t.rows.get(&k))
            .map(|set| set.len() as u64)
            .unwrap_or(0))
    }
}

impl RwCursor for MemCursor {
    fn put(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let mut state = lock(&self.state)?;
        state.table_mut(self.table).put(self.table.kind, key, value);
        drop(state);
        self.pos = Some((key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn delete_current(&mut self) -> KvResult<()> {
        let (k, v) = self.anchor()?.clone();
        let mut state = lock(&self.state)?;
        state.table_mut(self.table).delete(&k, Some(&v));
        Ok(())
    }
}

impl RwDupCursor for MemCursor {
    fn delete_exact(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        let mut state = lock(&self.state)?;
        state.table_mut(self.table).delete(key, Some(value));
        Ok(())
    }
}
