//! In-memory ordered store for testing and embedded use.

use crate::error::{KvError, KvResult};
use crate::store::{prefix_end, KvStore, KvTx, ScanOpts};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Latest committed state of a key. Deletions keep a tombstone so that
/// conflict detection covers deleted keys.
#[derive(Debug, Clone)]
struct Versioned {
    value: Option<Vec<u8>>,
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    map: BTreeMap<Vec<u8>, Versioned>,
    seq: u64,
}

/// An in-memory ordered key-value store.
///
/// `MemoryKv` implements the full [`KvStore`] contract: byte-ordered
/// iteration, atomic multi-key commit and optimistic write-write conflict
/// detection. Suitable for tests and ephemeral databases.
///
/// # Concurrency
///
/// Transactions buffer writes privately and validate them against the
/// committed state at commit time. A transaction fails with
/// [`KvError::CommitConflict`] if any key it wrote was committed by
/// another transaction after this one began.
#[derive(Debug, Default)]
pub struct MemoryKv {
    inner: RwLock<Inner>,
}

impl MemoryKv {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of live (non-deleted) keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .map
            .values()
            .filter(|v| v.value.is_some())
            .count()
    }

    /// Returns true if the store holds no live keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryKv {
    fn begin(&self, update: bool) -> KvResult<Box<dyn KvTx + '_>> {
        let snapshot_seq = self.inner.read().seq;
        Ok(Box::new(MemoryTx {
            store: self,
            snapshot_seq,
            writes: BTreeMap::new(),
            update,
            closed: false,
        }))
    }
}

struct MemoryTx<'a> {
    store: &'a MemoryKv,
    snapshot_seq: u64,
    /// Pending writes; `None` marks a pending deletion.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    update: bool,
    closed: bool,
}

impl MemoryTx<'_> {
    fn check_open(&self) -> KvResult<()> {
        if self.closed {
            return Err(KvError::TransactionClosed);
        }
        Ok(())
    }

    fn check_writable(&self) -> KvResult<()> {
        self.check_open()?;
        if !self.update {
            return Err(KvError::ReadOnly);
        }
        Ok(())
    }
}

impl KvTx for MemoryTx<'_> {
    fn get(&self, key: &[u8]) -> KvResult<Option<Vec<u8>>> {
        self.check_open()?;
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        let inner = self.store.inner.read();
        Ok(inner.map.get(key).and_then(|v| v.value.clone()))
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> KvResult<()> {
        self.check_writable()?;
        self.writes.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> KvResult<()> {
        self.check_writable()?;
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    fn scan(&self, opts: ScanOpts) -> KvResult<Vec<(Vec<u8>, Vec<u8>)>> {
        self.check_open()?;

        // Effective bounds: intersection of the prefix range and start/end.
        let mut lower = opts.start.clone();
        let mut upper = opts.end.clone();
        if let Some(prefix) = &opts.prefix {
            if lower.as_deref().map_or(true, |s| s < prefix.as_slice()) {
                lower = Some(prefix.clone());
            }
            let pe = prefix_end(prefix);
            match (&upper, &pe) {
                (None, Some(_)) => upper = pe,
                (Some(e), Some(p)) if p < e => upper = pe,
                _ => {}
            }
        }

        let low = match &lower {
            Some(k) => Bound::Included(k.clone()),
            None => Bound::Unbounded,
        };
        let high = match &upper {
            Some(k) => Bound::Excluded(k.clone()),
            None => Bound::Unbounded,
        };

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        {
            let inner = self.store.inner.read();
            for (k, v) in inner.map.range((low.clone(), high.clone())) {
                if let Some(value) = &v.value {
                    merged.insert(k.clone(), value.clone());
                }
            }
        }
        for (k, pending) in self.writes.range((low, high)) {
            match pending {
                Some(value) => {
                    merged.insert(k.clone(), value.clone());
                }
                None => {
                    merged.remove(k);
                }
            }
        }

        let mut results: Vec<(Vec<u8>, Vec<u8>)> = merged.into_iter().collect();
        if opts.reverse {
            results.reverse();
        }
        Ok(results)
    }

    fn commit(&mut self) -> KvResult<()> {
        self.check_open()?;
        self.closed = true;

        if self.writes.is_empty() {
            return Ok(());
        }

        let mut inner = self.store.inner.write();
        for key in self.writes.keys() {
            if let Some(existing) = inner.map.get(key) {
                if existing.seq > self.snapshot_seq {
                    return Err(KvError::commit_conflict(key.clone()));
                }
            }
        }

        inner.seq += 1;
        let seq = inner.seq;
        for (key, pending) in std::mem::take(&mut self.writes) {
            inner.map.insert(
                key,
                Versioned {
                    value: pending,
                    seq,
                },
            );
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.writes.clear();
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_roundtrip() {
        let kv = MemoryKv::new();
        let mut tx = kv.begin(true).unwrap();
        tx.set(b"a", b"1").unwrap();
        assert_eq!(tx.get(b"a").unwrap(), Some(b"1".to_vec()));
        tx.commit().unwrap();

        let tx = kv.begin(false).unwrap();
        assert_eq!(tx.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn uncommitted_writes_are_invisible() {
        let kv = MemoryKv::new();
        let mut writer = kv.begin(true).unwrap();
        writer.set(b"k", b"v").unwrap();

        let reader = kv.begin(false).unwrap();
        assert_eq!(reader.get(b"k").unwrap(), None);
    }

    #[test]
    fn rollback_discards_writes() {
        let kv = MemoryKv::new();
        let mut tx = kv.begin(true).unwrap();
        tx.set(b"k", b"v").unwrap();
        tx.rollback();

        let tx = kv.begin(false).unwrap();
        assert_eq!(tx.get(b"k").unwrap(), None);
    }

    #[test]
    fn rollback_is_idempotent() {
        let kv = MemoryKv::new();
        let mut tx = kv.begin(true).unwrap();
        tx.rollback();
        tx.rollback();
    }

    #[test]
    fn closed_transaction_rejects_operations() {
        let kv = MemoryKv::new();
        let mut tx = kv.begin(true).unwrap();
        tx.commit().unwrap();
        assert!(matches!(tx.get(b"k"), Err(KvError::TransactionClosed)));
        assert!(matches!(tx.commit(), Err(KvError::TransactionClosed)));
    }

    #[test]
    fn read_only_transaction_rejects_writes() {
        let kv = MemoryKv::new();
        let mut tx = kv.begin(false).unwrap();
        assert!(matches!(tx.set(b"k", b"v"), Err(KvError::ReadOnly)));
        assert!(matches!(tx.delete(b"k"), Err(KvError::ReadOnly)));
    }

    #[test]
    fn write_write_conflict_detected() {
        let kv = MemoryKv::new();
        let mut t1 = kv.begin(true).unwrap();
        let mut t2 = kv.begin(true).unwrap();

        t1.set(b"k", b"1").unwrap();
        t2.set(b"k", b"2").unwrap();

        t1.commit().unwrap();
        let err = t2.commit().unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn conflict_detected_on_deleted_key() {
        let kv = MemoryKv::new();
        {
            let mut tx = kv.begin(true).unwrap();
            tx.set(b"k", b"v").unwrap();
            tx.commit().unwrap();
        }

        let mut t1 = kv.begin(true).unwrap();
        let mut t2 = kv.begin(true).unwrap();
        t1.delete(b"k").unwrap();
        t1.commit().unwrap();

        t2.set(b"k", b"other").unwrap();
        assert!(t2.commit().unwrap_err().is_conflict());
    }

    #[test]
    fn disjoint_writes_do_not_conflict() {
        let kv = MemoryKv::new();
        let mut t1 = kv.begin(true).unwrap();
        let mut t2 = kv.begin(true).unwrap();
        t1.set(b"a", b"1").unwrap();
        t2.set(b"b", b"2").unwrap();
        t1.commit().unwrap();
        t2.commit().unwrap();
        assert_eq!(kv.len(), 2);
    }

    #[test]
    fn scan_returns_byte_order() {
        let kv = MemoryKv::new();
        let mut tx = kv.begin(true).unwrap();
        tx.set(b"b", b"2").unwrap();
        tx.set(b"a", b"1").unwrap();
        tx.set(b"c", b"3").unwrap();
        tx.commit().unwrap();

        let tx = kv.begin(false).unwrap();
        let results = tx.scan(ScanOpts::default()).unwrap();
        let keys: Vec<_> = results.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn scan_prefix_restricts_range() {
        let kv = MemoryKv::new();
        let mut tx = kv.begin(true).unwrap();
        tx.set(b"x/1", b"1").unwrap();
        tx.set(b"x/2", b"2").unwrap();
        tx.set(b"y/1", b"3").unwrap();
        tx.commit().unwrap();

        let tx = kv.begin(false).unwrap();
        let results = tx.scan(ScanOpts::prefix(b"x/".to_vec())).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn scan_reverse() {
        let kv = MemoryKv::new();
        let mut tx = kv.begin(true).unwrap();
        tx.set(b"a", b"1").unwrap();
        tx.set(b"b", b"2").unwrap();
        tx.commit().unwrap();

        let tx = kv.begin(false).unwrap();
        let results = tx
            .scan(ScanOpts {
                reverse: true,
                ..ScanOpts::default()
            })
            .unwrap();
        assert_eq!(results[0].0, b"b".to_vec());
    }

    #[test]
    fn scan_merges_pending_writes() {
        let kv = MemoryKv::new();
        {
            let mut tx = kv.begin(true).unwrap();
            tx.set(b"a", b"old").unwrap();
            tx.set(b"b", b"keep").unwrap();
            tx.commit().unwrap();
        }

        let mut tx = kv.begin(true).unwrap();
        tx.set(b"a", b"new").unwrap();
        tx.delete(b"b").unwrap();
        tx.set(b"c", b"added").unwrap();

        let results = tx.scan(ScanOpts::default()).unwrap();
        assert_eq!(
            results,
            vec![
                (b"a".to_vec(), b"new".to_vec()),
                (b"c".to_vec(), b"added".to_vec()),
            ]
        );
    }

    #[test]
    fn scan_range_bounds() {
        let kv = MemoryKv::new();
        let mut tx = kv.begin(true).unwrap();
        for k in [b"a", b"b", b"c", b"d"] {
            tx.set(k, b"v").unwrap();
        }
        tx.commit().unwrap();

        let tx = kv.begin(false).unwrap();
        let results = tx
            .scan(ScanOpts {
                start: Some(b"b".to_vec()),
                end: Some(b"d".to_vec()),
                ..ScanOpts::default()
            })
            .unwrap();
        let keys: Vec<_> = results.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }
}
