//! External sort/merge collector.
//!
//! The staging pipeline accumulates key/value pairs out of key order,
//! spills sorted runs to temp files once a memory budget is exceeded, and
//! replays the whole set back sorted by key. Duplicate keys are preserved
//! and delivered in collection order, which is what the index loader
//! relies on when the same address is flushed more than once.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
};
use tracing::debug;

/// Default in-memory buffer budget before a run is spilled, in bytes.
pub const BUFFER_OPTIMAL_SIZE: usize = 256 * 1024 * 1024;

/// Errors from the collector.
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    /// Spill file I/O failed.
    #[error("collector i/o: {0}")]
    Io(#[from] std::io::Error),
    /// A spill file was truncated or otherwise unreadable.
    #[error("corrupted spill file: {0}")]
    CorruptedSpill(String),
}

/// Accumulates key/value pairs and replays them sorted by key.
///
/// `collect` never blocks on I/O unless the buffer budget is exceeded, in
/// which case the buffered run is sorted and written to a temp file. The
/// temp files live for the lifetime of the collector.
pub struct Collector {
    prefix: &'static str,
    buffer: Vec<(Vec<u8>, Vec<u8>)>,
    buffer_bytes: usize,
    buffer_limit: usize,
    runs: Vec<BufReader<File>>,
}

impl Collector {
    /// Creates a collector with the given log prefix and buffer budget.
    pub fn new(prefix: &'static str, buffer_limit: usize) -> Self {
        Self { prefix, buffer: Vec::new(), buffer_bytes: 0, buffer_limit, runs: Vec::new() }
    }

    /// Buffers one pair, spilling a sorted run if the budget is exceeded.
    pub fn collect(&mut self, key: &[u8], value: &[u8]) -> Result<(), EtlError> {
        self.buffer_bytes += key.len() + value.len();
        self.buffer.push((key.to_vec(), value.to_vec()));
        if self.buffer_bytes >= self.buffer_limit {
            self.spill()?;
        }
        Ok(())
    }

    /// Number of pairs collected into the in-memory buffer since the last
    /// spill. Only meaningful for tests and diagnostics.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn spill(&mut self) -> Result<(), EtlError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.buffer.sort_by(|a, b| a.0.cmp(&b.0));

        let file = tempfile::tempfile()?;
        let mut w = BufWriter::new(file);
        for (k, v) in self.buffer.drain(..) {
            write_entry(&mut w, &k, &v)?;
        }
        let mut file = w.into_inner().map_err(|e| EtlError::Io(e.into_error()))?;
        file.flush()?;
        debug!(target: "etl", prefix = self.prefix, run = self.runs.len(), "spilled sorted run");

        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(0))?;
        self.runs.push(BufReader::new(file));
        self.buffer_bytes = 0;
        Ok(())
    }

    /// Drains the collector, invoking `f` for every pair in key order.
    ///
    /// Pairs with equal keys arrive in the order they were collected.
    pub fn load<E, F>(mut self, mut f: F) -> Result<(), E>
    where
        E: From<EtlError>,
        F: FnMut(&[u8], &[u8]) -> Result<(), E>,
    {
        // The still-buffered tail becomes the final run so the merge only
        // has one code path.
        self.spill().map_err(E::from)?;

        let mut sources = Vec::with_capacity(self.runs.len());
        for (run_idx, mut reader) in self.runs.into_iter().enumerate() {
            if let Some((k, v)) = read_entry(&mut reader).map_err(E::from)? {
                sources.push(RunHead { key: k, value: v, run_idx, reader });
            }
        }

        let mut heap: BinaryHeap<RunHead> = sources.into();
        while let Some(mut head) = heap.pop() {
            f(&head.key, &head.value)?;
            if let Some((k, v)) = read_entry(&mut head.reader).map_err(E::from)? {
                head.key = k;
                head.value = v;
                heap.push(head);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("prefix", &self.prefix)
            .field("buffered", &self.buffer.len())
            .field("runs", &self.runs.len())
            .finish()
    }
}

struct RunHead {
    key: Vec<u8>,
    value: Vec<u8>,
    run_idx: usize,
    reader: BufReader<File>,
}

// BinaryHeap is a max-heap; reverse so the smallest (key, run) pops first.
// Ties on key resolve to the earliest run, preserving collection order.
impl Ord for RunHead {
    fn cmp(&self, other: &Self) -> Ordering {
        (&other.key, other.run_idx).cmp(&(&self.key, self.run_idx))
    }
}

impl PartialOrd for RunHead {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RunHead {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.run_idx == other.run_idx
    }
}

impl Eq for RunHead {}

fn write_entry(w: &mut impl Write, key: &[u8], value: &[u8]) -> Result<(), EtlError> {
    w.write_all(&(key.len() as u32).to_be_bytes())?;
    w.write_all(&(value.len() as u32).to_be_bytes())?;
    w.write_all(key)?;
    w.write_all(value)?;
    Ok(())
}

#[allow(clippy::type_complexity)]
fn read_entry(r: &mut impl Read) -> Result<Option<(Vec<u8>, Vec<u8>)>, EtlError> {
    let mut lens = [0u8; 8];
    match r.read_exact(&mut lens[..1]) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    r.read_exact(&mut lens[1..])
        .map_err(|_| EtlError::CorruptedSpill("truncated entry header".into()))?;
    let klen = u32::from_be_bytes(lens[..4].try_into().expect("4 bytes")) as usize;
    let vlen = u32::from_be_bytes(lens[4..].try_into().expect("4 bytes")) as usize;

    let mut key = vec![0u8; klen];
    r.read_exact(&mut key).map_err(|_| EtlError::CorruptedSpill("truncated key".into()))?;
    let mut value = vec![0u8; vlen];
    r.read_exact(&mut value).map_err(|_| EtlError::CorruptedSpill("truncated value".into()))?;
    Ok(Some((key, value)))
}
