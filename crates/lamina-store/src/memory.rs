use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::KeyValueStore;

/// In-memory, HashMap-based backing store.
///
/// Intended for tests and embedding. All rows are held in memory behind a
/// `RwLock`; liveness is tracked so that use-after-close surfaces as an
/// error instead of silently succeeding.
pub struct MemoryKv {
    rows: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    alive: AtomicBool,
}

impl MemoryKv {
    /// Create a new empty in-memory store, already initialized.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            alive: AtomicBool::new(true),
        }
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.rows.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.read().expect("lock poisoned").is_empty()
    }

    /// Return all keys currently stored, in unspecified order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.rows
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Remove all rows.
    pub fn clear(&self) {
        self.rows.write().expect("lock poisoned").clear();
    }

    fn check_alive(&self) -> StoreResult<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.check_alive()?;
        let rows = self.rows.read().expect("lock poisoned");
        Ok(rows.get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StoreResult<()> {
        self.check_alive()?;
        let mut rows = self.rows.write().expect("lock poisoned");
        rows.insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.check_alive()?;
        let mut rows = self.rows.write().expect("lock poisoned");
        rows.remove(key);
        Ok(())
    }

    fn batch_write(&self, batch: HashMap<Vec<u8>, Option<Vec<u8>>>) -> StoreResult<()> {
        self.check_alive()?;
        let mut rows = self.rows.write().expect("lock poisoned");
        for (key, value) in batch {
            match value {
                Some(value) => {
                    rows.insert(key, value);
                }
                None => {
                    rows.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn init(&self) -> StoreResult<()> {
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn close(&self) -> StoreResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        debug!(rows = self.len(), "memory store closed");
        Ok(())
    }
}

impl std::fmt::Debug for MemoryKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKv")
            .field("rows", &self.len())
            .field("alive", &self.is_alive())
            .finish()
    }
}
