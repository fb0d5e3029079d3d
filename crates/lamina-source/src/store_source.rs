use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use lamina_store::KeyValueStore;

use crate::error::SourceResult;
use crate::source::Source;

/// Delegate adapter exposing a [`KeyValueStore`] as the byte-keyed leaf
/// `Source` of a stack.
///
/// `put`/`delete` are collected as pending rows and committed in one
/// atomic `batch_write` on `flush`; `get` consults the pending rows first
/// so the adapter is read-your-writes even before the batch lands. If the
/// batch fails the rows stay buffered and the flush can be retried.
pub struct StoreSource<S> {
    store: S,
    rows: RwLock<HashMap<Vec<u8>, Option<Vec<u8>>>>,
}

impl<S: KeyValueStore> StoreSource<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Number of rows waiting for the next flush.
    pub fn pending_rows(&self) -> usize {
        self.rows.read().expect("lock poisoned").len()
    }

    /// The wrapped store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: KeyValueStore> Source<Vec<u8>, Vec<u8>> for StoreSource<S> {
    fn get(&self, key: &Vec<u8>) -> SourceResult<Option<Vec<u8>>> {
        let rows = self.rows.read().expect("lock poisoned");
        match rows.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(self.store.get(key)?),
        }
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> SourceResult<()> {
        let mut rows = self.rows.write().expect("lock poisoned");
        rows.insert(key, Some(value));
        Ok(())
    }

    fn delete(&self, key: &Vec<u8>) -> SourceResult<()> {
        let mut rows = self.rows.write().expect("lock poisoned");
        rows.insert(key.clone(), None);
        Ok(())
    }

    fn flush(&self) -> SourceResult<bool> {
        // Hold the write lock across the batch so a concurrent writer
        // cannot slip rows into a batch that is already on its way out.
        let mut rows = self.rows.write().expect("lock poisoned");
        if rows.is_empty() {
            return Ok(false);
        }
        let batch = std::mem::take(&mut *rows);
        let count = batch.len();
        if let Err(e) = self.store.batch_write(batch.clone()) {
            // Batch did not land; keep the rows for a retry.
            *rows = batch;
            return Err(e.into());
        }
        debug!(rows = count, "batch committed to backing store");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamina_store::MemoryKv;

    #[test]
    fn get_reads_through_to_store() {
        let kv = MemoryKv::new();
        kv.put(b"k".to_vec(), b"v".to_vec()).unwrap();

        let src = StoreSource::new(kv);
        assert_eq!(src.get(&b"k".to_vec()).unwrap(), Some(b"v".to_vec()));
    }

    #[test]
    fn pending_rows_win_over_store() {
        let kv = MemoryKv::new();
        kv.put(b"k".to_vec(), b"old".to_vec()).unwrap();

        let src = StoreSource::new(kv);
        src.put(b"k".to_vec(), b"new".to_vec()).unwrap();
        assert_eq!(src.get(&b"k".to_vec()).unwrap(), Some(b"new".to_vec()));

        src.delete(&b"k".to_vec()).unwrap();
        assert_eq!(src.get(&b"k".to_vec()).unwrap(), None);
        // The store itself is untouched until flush.
        assert_eq!(src.store().get(b"k").unwrap(), Some(b"old".to_vec()));
    }

    #[test]
    fn flush_commits_batch() {
        let src = StoreSource::new(MemoryKv::new());
        src.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        src.put(b"b".to_vec(), b"2".to_vec()).unwrap();
        src.delete(&b"a".to_vec()).unwrap();

        assert!(src.flush().unwrap());
        assert_eq!(src.pending_rows(), 0);
        assert_eq!(src.store().get(b"a").unwrap(), None);
        assert_eq!(src.store().get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn flush_without_pending_rows_reports_clean() {
        let src = StoreSource::new(MemoryKv::new());
        assert!(!src.flush().unwrap());
    }

    #[test]
    fn failed_batch_keeps_rows_for_retry() {
        let kv = MemoryKv::new();
        let src = StoreSource::new(kv);
        src.put(b"k".to_vec(), b"v".to_vec()).unwrap();

        // Close the store so the batch fails, then reopen and retry.
        src.store().close().unwrap();
        assert!(src.flush().is_err());
        assert_eq!(src.pending_rows(), 1);

        src.store().init().unwrap();
        assert!(src.flush().unwrap());
        assert_eq!(src.store().get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
