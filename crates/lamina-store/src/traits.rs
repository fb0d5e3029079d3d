use std::collections::HashMap;
use std::sync::Arc;

use crate::error::StoreResult;

/// Durable byte-keyed storage consumed by the cache stack.
///
/// This is the whole contract the cache layers rely on; the physical
/// engine behind it (disk KV store, embedded database, plain map) is a
/// deployment decision. Implementations must satisfy:
/// - `get` after a completed `put`/`batch_write` returns the written bytes.
/// - A `None` row value in `batch_write` means delete; the batch is applied
///   as one atomic unit or not at all.
/// - Operations after `close` fail with `StoreError::Closed` rather than
///   silently succeeding.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`. Returns `Ok(None)` if absent.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StoreResult<()>;

    /// Remove `key`. Removing an absent key is a no-op.
    fn delete(&self, key: &[u8]) -> StoreResult<()>;

    /// Apply a set of rows atomically. A `None` value deletes the key.
    fn batch_write(&self, rows: HashMap<Vec<u8>, Option<Vec<u8>>>) -> StoreResult<()>;

    /// Prepare the store for use. Idempotent.
    fn init(&self) -> StoreResult<()>;

    /// Whether the store is open and accepting operations.
    fn is_alive(&self) -> bool;

    /// Release the store's resources. Further operations fail.
    fn close(&self) -> StoreResult<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> StoreResult<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        (**self).delete(key)
    }

    fn batch_write(&self, rows: HashMap<Vec<u8>, Option<Vec<u8>>>) -> StoreResult<()> {
        (**self).batch_write(rows)
    }

    fn init(&self) -> StoreResult<()> {
        (**self).init()
    }

    fn is_alive(&self) -> bool {
        (**self).is_alive()
    }

    fn close(&self) -> StoreResult<()> {
        (**self).close()
    }
}
