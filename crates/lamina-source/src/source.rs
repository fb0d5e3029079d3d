use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use crate::error::SourceResult;

/// Uniform contract implemented by every layer of the state-store stack.
///
/// A `Source` maps keys to values and may wrap another `Source`
/// ("chaining"); writes either pass through or are buffered until
/// [`flush`](Source::flush). All methods take `&self` -- implementations
/// guard their state with one coarse lock per instance.
///
/// Lock order is outer-before-inner: a layer holds its own lock while
/// calling into the source it wraps, never the reverse. The layering is
/// acyclic, so this order is deadlock-free, but it is a convention rather
/// than something the type system enforces -- keep it when adding layers.
pub trait Source<K, V>: Send + Sync {
    /// Read the value for `key`. Returns `Ok(None)` if absent.
    fn get(&self, key: &K) -> SourceResult<Option<V>>;

    /// Write `value` under `key`.
    fn put(&self, key: K, value: V) -> SourceResult<()>;

    /// Remove `key`.
    fn delete(&self, key: &K) -> SourceResult<()>;

    /// Commit any buffered changes to the wrapped source.
    ///
    /// Returns `true` iff pending changes were committed. Buffering layers
    /// flush only their own buffer; transparent (non-buffering) layers
    /// delegate to the source they wrap. A mixed stack is flushed
    /// top-to-bottom by [`ChainBox`](crate::chain::ChainBox), and a second
    /// flush of an already-clean layer is a no-op, so the delegation and
    /// the chain traversal compose without double effects.
    fn flush(&self) -> SourceResult<bool>;
}

impl<K, V, S: Source<K, V> + ?Sized> Source<K, V> for Arc<S> {
    fn get(&self, key: &K) -> SourceResult<Option<V>> {
        (**self).get(key)
    }

    fn put(&self, key: K, value: V) -> SourceResult<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &K) -> SourceResult<()> {
        (**self).delete(key)
    }

    fn flush(&self) -> SourceResult<bool> {
        (**self).flush()
    }
}

impl<K, V, S: Source<K, V> + ?Sized> Source<K, V> for Box<S> {
    fn get(&self, key: &K) -> SourceResult<Option<V>> {
        (**self).get(key)
    }

    fn put(&self, key: K, value: V) -> SourceResult<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &K) -> SourceResult<()> {
        (**self).delete(key)
    }

    fn flush(&self) -> SourceResult<bool> {
        (**self).flush()
    }
}

/// Plain HashMap-backed source with no wrapped layer beneath it.
///
/// The leaf of a test stack, and the default journal store. `flush` is a
/// no-op: there is nothing below to push into.
pub struct MemSource<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> MemSource<K, V> {
    /// Create a new empty source.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().expect("lock poisoned").is_empty()
    }

    /// All keys currently stored, in unspecified order.
    pub fn keys(&self) -> Vec<K> {
        self.entries
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for MemSource<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Source<K, V> for MemSource<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> SourceResult<Option<V>> {
        let entries = self.entries.read().expect("lock poisoned");
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: K, value: V) -> SourceResult<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        entries.insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &K) -> SourceResult<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        entries.remove(key);
        Ok(())
    }

    fn flush(&self) -> SourceResult<bool> {
        Ok(false)
    }
}
