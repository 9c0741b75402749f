//! KV store and transaction traits.

use crate::error::KvResult;

/// Options for an ordered scan.
///
/// All bounds are byte-lexicographic. `prefix` restricts the scan to keys
/// starting with the given bytes; `start`/`end` further narrow the range
/// (`start` inclusive, `end` exclusive).
#[derive(Debug, Clone, Default)]
pub struct ScanOpts {
    /// Restrict the scan to keys with this prefix.
    pub prefix: Option<Vec<u8>>,
    /// Inclusive lower bound.
    pub start: Option<Vec<u8>>,
    /// Exclusive upper bound.
    pub end: Option<Vec<u8>>,
    /// Iterate in descending key order.
    pub reverse: bool,
}

impl ScanOpts {
    /// Creates scan options covering exactly one key prefix.
    #[must_use]
    pub fn prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }
}

/// An ordered key-value store with transactional writes.
///
/// # Invariants
///
/// - Iteration order equals byte-lexicographic key order
/// - A commit applies all of a transaction's writes or none of them
/// - Commits detect write-write conflicts against concurrently committed
///   transactions and fail with [`crate::KvError::CommitConflict`]
/// - Uncommitted writes are never visible outside their transaction
pub trait KvStore: Send + Sync {
    /// Begins a transaction. `update` permits writes.
    fn begin(&self, update: bool) -> KvResult<Box<dyn KvTx + '_>>;
}

/// A single KV transaction.
///
/// Reads observe the transaction's own pending writes first, then the
/// latest committed state.
pub trait KvTx: Send {
    /// Gets the value stored at `key`, if any.
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>>;

    /// Sets `key` to `value`.
    fn set(&mut self, key: &[u8], value: &[u8]) -> KvResult<()>;

    /// Deletes `key`.
    fn delete(&mut self, key: &[u8]) -> KvResult<()>;

    /// Scans the range described by `opts`, merging pending writes.
    fn scan(&self, opts: ScanOpts) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Atomically commits all pending writes.
    fn commit(&mut self) -> KvResult<()>;

    /// Discards all pending writes. Safe to call more than once.
    fn rollback(&mut self);
}

/// Returns the smallest key strictly greater than every key with `prefix`,
/// or `None` if the prefix is all `0xFF` bytes (range is unbounded above).
#[must_use]
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}
