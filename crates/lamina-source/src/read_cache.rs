use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::error::SourceResult;
use crate::source::Source;

/// Memoization map behind a read cache: unbounded, or LRU-bounded when a
/// capacity was configured. Entries map to `Option<V>` so explicit absence
/// is cached too -- a repeated miss never touches the wrapped source.
enum CacheMap<K, V> {
    Unbounded(HashMap<K, Option<V>>),
    Bounded(LruCache<K, Option<V>>),
}

impl<K: Eq + Hash, V: Clone> CacheMap<K, V> {
    fn lookup(&mut self, key: &K) -> Option<Option<V>> {
        match self {
            CacheMap::Unbounded(map) => map.get(key).cloned(),
            CacheMap::Bounded(map) => map.get(key).cloned(),
        }
    }

    fn store(&mut self, key: K, value: Option<V>) {
        match self {
            CacheMap::Unbounded(map) => {
                map.insert(key, value);
            }
            CacheMap::Bounded(map) => {
                map.put(key, value);
            }
        }
    }

    fn remove(&mut self, key: &K) {
        match self {
            CacheMap::Unbounded(map) => {
                map.remove(key);
            }
            CacheMap::Bounded(map) => {
                map.pop(key);
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            CacheMap::Unbounded(map) => map.len(),
            CacheMap::Bounded(map) => map.len(),
        }
    }
}

/// Write-through memoizing cache over a wrapped source.
///
/// `get` results (including explicit absence) are remembered; `put` and
/// `delete` update the cache and hit the wrapped source immediately, so
/// nothing is ever buffered here and `flush` is a no-op. Capacity is a
/// performance knob only -- eviction never changes observable behavior.
pub struct ReadCache<K, V, S> {
    source: S,
    cache: Mutex<CacheMap<K, V>>,
}

impl<K, V, S> ReadCache<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: Source<K, V>,
{
    /// Unbounded cache: every key ever read or written stays memoized.
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: Mutex::new(CacheMap::Unbounded(HashMap::new())),
        }
    }

    /// Bounded cache evicting least-recently-used entries beyond `capacity`.
    pub fn with_capacity(source: S, capacity: NonZeroUsize) -> Self {
        Self {
            source,
            cache: Mutex::new(CacheMap::Bounded(LruCache::new(capacity))),
        }
    }

    /// Number of memoized entries.
    pub fn cached_entries(&self) -> usize {
        self.cache.lock().expect("lock poisoned").len()
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }
}

impl<K, V, S> Source<K, V> for ReadCache<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
    S: Source<K, V>,
{
    fn get(&self, key: &K) -> SourceResult<Option<V>> {
        let mut cache = self.cache.lock().expect("lock poisoned");
        if let Some(cached) = cache.lookup(key) {
            return Ok(cached);
        }
        let value = self.source.get(key)?;
        cache.store(key.clone(), value.clone());
        Ok(value)
    }

    fn put(&self, key: K, value: V) -> SourceResult<()> {
        let mut cache = self.cache.lock().expect("lock poisoned");
        self.source.put(key.clone(), value.clone())?;
        cache.store(key, Some(value));
        Ok(())
    }

    fn delete(&self, key: &K) -> SourceResult<()> {
        let mut cache = self.cache.lock().expect("lock poisoned");
        self.source.delete(key)?;
        // Evict rather than memoize absence: a reference-counting layer
        // beneath may still hold the value after one delete, and the next
        // read must be able to see it.
        cache.remove(key);
        Ok(())
    }

    fn flush(&self) -> SourceResult<bool> {
        Ok(false)
    }
}
