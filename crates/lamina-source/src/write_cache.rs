use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};

use crate::error::{SourceError, SourceResult};
use crate::read_cache::ReadCache;
use crate::source::Source;

/// Buffering mode of a [`WriteCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheKind {
    /// Acts as a regular map: repeated puts of the same key overwrite, a
    /// delete wins over earlier puts. Entries may have arbitrary nature.
    Simple,
    /// Accumulates the net number of inserts (+1) and deletes (-1) per key
    /// and on flush replays that many puts or deletes. Only meaningful for
    /// hashed keys where one key always corresponds to one value; used as
    /// the buffer in front of reference-counting trie-node storage.
    Counting,
}

/// One buffered key: the last-assigned value plus the pending counter.
///
/// `value: None` is the "unknown value" state -- the key was deleted before
/// ever being put through this cache, so the true value (if any) lives in
/// the wrapped source. In `Simple` mode the counter is a tri-state
/// (+1 inserted / -1 deleted); in `Counting` mode it is the net delta.
pub(crate) struct CacheEntry<V> {
    pub(crate) value: Option<V>,
    pub(crate) counter: i64,
}

/// Collects puts and deletes in memory and propagates them to the wrapped
/// source only when `flush` is called (write-back, not write-through).
///
/// In `Counting` mode the flush replays the net counter literally -- a key
/// with counter +3 is put three times -- so that a reference-counting
/// source beneath receives the exact number of increments. Collapsing the
/// replay into a single put would under-count shared trie nodes.
///
/// If the wrapped source fails mid-flush the buffer is left intact; the
/// caller owns the retry policy.
pub struct WriteCache<K, V, S> {
    source: S,
    kind: CacheKind,
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V, S> WriteCache<K, V, S>
where
    K: Eq + Hash + Clone,
    V: Clone,
    S: Source<K, V>,
{
    pub fn new(source: S, kind: CacheKind) -> Self {
        Self {
            source,
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Whether any key has buffered changes.
    pub fn has_modified(&self) -> bool {
        !self.entries.read().expect("lock poisoned").is_empty()
    }

    /// Keys with buffered changes, in unspecified order.
    pub fn modified_keys(&self) -> Vec<K> {
        self.entries
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// The buffering mode this cache was built with.
    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Move the buffered entries out, leaving the cache empty.
    pub(crate) fn take_buffer(&self) -> HashMap<K, CacheEntry<V>> {
        std::mem::take(&mut *self.entries.write().expect("lock poisoned"))
    }

    /// Fold `incoming` (newer changes) into this cache's buffer.
    ///
    /// Used by the async cache when a failed background flush left old
    /// entries behind: the newer buffer must merge on top rather than
    /// overwrite, or the unflushed changes would be lost.
    pub(crate) fn absorb_buffer(&self, incoming: HashMap<K, CacheEntry<V>>) {
        let mut entries = self.entries.write().expect("lock poisoned");
        if entries.is_empty() {
            *entries = incoming;
            return;
        }
        for (key, new) in incoming {
            match entries.entry(key) {
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    let old = slot.get_mut();
                    match self.kind {
                        CacheKind::Simple => *old = new,
                        CacheKind::Counting => {
                            old.counter += new.counter;
                            if new.value.is_some() {
                                old.value = new.value;
                            }
                        }
                    }
                }
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(new);
                }
            }
        }
    }
}

impl<K, V, S> Source<K, V> for WriteCache<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
    S: Source<K, V>,
{
    fn get(&self, key: &K) -> SourceResult<Option<V>> {
        let entries = self.entries.read().expect("lock poisoned");
        let entry = match entries.get(key) {
            Some(entry) => entry,
            None => return self.source.get(key),
        };
        match self.kind {
            CacheKind::Simple => {
                if entry.counter < 0 {
                    Ok(None)
                } else {
                    match &entry.value {
                        Some(value) => Ok(Some(value.clone())),
                        None => self.source.get(key),
                    }
                }
            }
            // A counting cache cannot observe partial deletion: the last
            // assigned value is returned whatever the counter's sign.
            CacheKind::Counting => match &entry.value {
                Some(value) => Ok(Some(value.clone())),
                None => self.source.get(key),
            },
        }
    }

    fn put(&self, key: K, value: V) -> SourceResult<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        let entry = entries.entry(key).or_insert(CacheEntry {
            value: None,
            counter: 0,
        });
        entry.value = Some(value);
        entry.counter = match self.kind {
            CacheKind::Simple => 1,
            CacheKind::Counting => entry.counter + 1,
        };
        Ok(())
    }

    fn delete(&self, key: &K) -> SourceResult<()> {
        let mut entries = self.entries.write().expect("lock poisoned");
        let entry = entries.entry(key.clone()).or_insert(CacheEntry {
            value: None,
            counter: 0,
        });
        entry.counter = match self.kind {
            CacheKind::Simple => -1,
            CacheKind::Counting => entry.counter - 1,
        };
        Ok(())
    }

    fn flush(&self) -> SourceResult<bool> {
        let mut entries = self.entries.write().expect("lock poisoned");
        let mut changed = false;
        for (key, entry) in entries.iter() {
            if entry.counter > 0 {
                let value = entry.value.as_ref().ok_or_else(|| {
                    SourceError::Contract("pending insert with no value".into())
                })?;
                for _ in 0..entry.counter {
                    self.source.put(key.clone(), value.clone())?;
                }
                changed = true;
            } else if entry.counter < 0 {
                for _ in entry.counter..0 {
                    self.source.delete(key)?;
                }
                changed = true;
            }
        }
        entries.clear();
        Ok(changed)
    }
}

/// Write cache (bottom) composed with a read cache (top) as one unit.
///
/// Reads are memoized, writes are buffered; `flush` drains the write
/// buffer into the wrapped source. The read cache stays valid across the
/// flush because the flushed values are exactly the memoized ones.
pub struct ReadWriteCache<K, V, S> {
    write: Arc<WriteCache<K, V, S>>,
    read: ReadCache<K, V, Arc<WriteCache<K, V, S>>>,
}

impl<K, V, S> ReadWriteCache<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
    S: Source<K, V>,
{
    pub fn new(source: S, kind: CacheKind) -> Self {
        let write = Arc::new(WriteCache::new(source, kind));
        let read = ReadCache::new(Arc::clone(&write));
        Self { write, read }
    }

    /// Same composition with a bounded read side.
    pub fn with_read_capacity(source: S, kind: CacheKind, capacity: NonZeroUsize) -> Self {
        let write = Arc::new(WriteCache::new(source, kind));
        let read = ReadCache::with_capacity(Arc::clone(&write), capacity);
        Self { write, read }
    }

    /// The buffering half.
    pub fn write_cache(&self) -> &WriteCache<K, V, S> {
        &self.write
    }

    /// The memoizing half.
    pub fn read_cache(&self) -> &ReadCache<K, V, Arc<WriteCache<K, V, S>>> {
        &self.read
    }
}

impl<K, V, S> Source<K, V> for ReadWriteCache<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
    S: Source<K, V>,
{
    fn get(&self, key: &K) -> SourceResult<Option<V>> {
        self.read.get(key)
    }

    fn put(&self, key: K, value: V) -> SourceResult<()> {
        self.read.put(key, value)
    }

    fn delete(&self, key: &K) -> SourceResult<()> {
        self.read.delete(key)
    }

    fn flush(&self) -> SourceResult<bool> {
        self.write.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemSource;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn k(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    /// Records every put/delete that reaches it, as a net per-key delta.
    struct DeltaRecorder {
        deltas: Mutex<HashMap<Vec<u8>, i64>>,
        last_value: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    }

    impl DeltaRecorder {
        fn new() -> Self {
            Self {
                deltas: Mutex::new(HashMap::new()),
                last_value: Mutex::new(HashMap::new()),
            }
        }

        fn delta(&self, key: &[u8]) -> i64 {
            *self
                .deltas
                .lock()
                .unwrap()
                .get(key)
                .unwrap_or(&0)
        }

        fn last_value(&self, key: &[u8]) -> Option<Vec<u8>> {
            self.last_value.lock().unwrap().get(key).cloned()
        }
    }

    impl Source<Vec<u8>, Vec<u8>> for DeltaRecorder {
        fn get(&self, _key: &Vec<u8>) -> SourceResult<Option<Vec<u8>>> {
            Ok(None)
        }

        fn put(&self, key: Vec<u8>, value: Vec<u8>) -> SourceResult<()> {
            *self.deltas.lock().unwrap().entry(key.clone()).or_insert(0) += 1;
            self.last_value.lock().unwrap().insert(key, value);
            Ok(())
        }

        fn delete(&self, key: &Vec<u8>) -> SourceResult<()> {
            *self.deltas.lock().unwrap().entry(key.clone()).or_insert(0) -= 1;
            Ok(())
        }

        fn flush(&self) -> SourceResult<bool> {
            Ok(false)
        }
    }

    // -----------------------------------------------------------------------
    // Simple mode
    // -----------------------------------------------------------------------

    #[test]
    fn simple_put_flush_roundtrip() {
        let mem = Arc::new(MemSource::<Vec<u8>, Vec<u8>>::new());
        let cache = WriteCache::new(mem.clone(), CacheKind::Simple);

        cache.put(k("k1"), k("v1")).unwrap();
        // Nothing reaches the source until flush.
        assert_eq!(mem.get(&k("k1")).unwrap(), None);

        assert!(cache.flush().unwrap());
        assert_eq!(mem.get(&k("k1")).unwrap(), Some(k("v1")));
        assert!(!cache.has_modified());
    }

    #[test]
    fn simple_repeated_put_overwrites() {
        let mem = Arc::new(MemSource::<Vec<u8>, Vec<u8>>::new());
        let cache = WriteCache::new(mem.clone(), CacheKind::Simple);

        cache.put(k("k"), k("v1")).unwrap();
        cache.put(k("k"), k("v2")).unwrap();
        assert_eq!(cache.get(&k("k")).unwrap(), Some(k("v2")));

        cache.flush().unwrap();
        assert_eq!(mem.get(&k("k")).unwrap(), Some(k("v2")));
    }

    #[test]
    fn simple_delete_wins_over_put() {
        let mem = Arc::new(MemSource::<Vec<u8>, Vec<u8>>::new());
        mem.put(k("k"), k("old")).unwrap();
        let cache = WriteCache::new(mem.clone(), CacheKind::Simple);

        cache.put(k("k"), k("new")).unwrap();
        cache.delete(&k("k")).unwrap();
        assert_eq!(cache.get(&k("k")).unwrap(), None);

        cache.flush().unwrap();
        assert_eq!(mem.get(&k("k")).unwrap(), None);
    }

    #[test]
    fn uncached_get_falls_through() {
        let mem = Arc::new(MemSource::<Vec<u8>, Vec<u8>>::new());
        mem.put(k("below"), k("v")).unwrap();
        let cache = WriteCache::new(mem, CacheKind::Simple);

        assert_eq!(cache.get(&k("below")).unwrap(), Some(k("v")));
    }

    #[test]
    fn flush_with_no_changes_reports_clean() {
        let cache = WriteCache::new(MemSource::<Vec<u8>, Vec<u8>>::new(), CacheKind::Simple);
        assert!(!cache.flush().unwrap());
    }

    // -----------------------------------------------------------------------
    // Counting mode
    // -----------------------------------------------------------------------

    #[test]
    fn counting_replays_net_positive_counter() {
        let recorder = Arc::new(DeltaRecorder::new());
        let cache = WriteCache::new(recorder.clone(), CacheKind::Counting);

        // +1 +1 -1 = net +1; flush must issue exactly one put of the
        // last-assigned value.
        cache.put(k("k"), k("v1")).unwrap();
        cache.put(k("k"), k("v2")).unwrap();
        cache.delete(&k("k")).unwrap();

        assert!(cache.flush().unwrap());
        assert_eq!(recorder.delta(b"k"), 1);
        assert_eq!(recorder.last_value(b"k"), Some(k("v2")));
    }

    #[test]
    fn counting_replays_each_increment() {
        let recorder = Arc::new(DeltaRecorder::new());
        let cache = WriteCache::new(recorder.clone(), CacheKind::Counting);

        cache.put(k("k"), k("v")).unwrap();
        cache.put(k("k"), k("v")).unwrap();
        cache.put(k("k"), k("v")).unwrap();

        cache.flush().unwrap();
        assert_eq!(recorder.delta(b"k"), 3);
    }

    #[test]
    fn counting_replays_net_negative_counter() {
        let recorder = Arc::new(DeltaRecorder::new());
        let cache = WriteCache::new(recorder.clone(), CacheKind::Counting);

        cache.delete(&k("k")).unwrap();
        cache.delete(&k("k")).unwrap();

        cache.flush().unwrap();
        assert_eq!(recorder.delta(b"k"), -2);
    }

    #[test]
    fn counting_zero_counter_touches_nothing() {
        let recorder = Arc::new(DeltaRecorder::new());
        let cache = WriteCache::new(recorder.clone(), CacheKind::Counting);

        cache.put(k("k"), k("v")).unwrap();
        cache.delete(&k("k")).unwrap();

        assert!(!cache.flush().unwrap());
        assert_eq!(recorder.delta(b"k"), 0);
    }

    #[test]
    fn counting_get_ignores_partial_deletion() {
        let mem = Arc::new(MemSource::<Vec<u8>, Vec<u8>>::new());
        let cache = WriteCache::new(mem, CacheKind::Counting);

        cache.put(k("k"), k("v")).unwrap();
        cache.put(k("k"), k("v")).unwrap();
        cache.delete(&k("k")).unwrap();
        // Counter is +1; the caller still sees the last assigned value.
        assert_eq!(cache.get(&k("k")).unwrap(), Some(k("v")));
    }

    #[test]
    fn delete_before_put_reads_through() {
        let mem = Arc::new(MemSource::<Vec<u8>, Vec<u8>>::new());
        mem.put(k("k"), k("stored")).unwrap();
        let cache = WriteCache::new(mem, CacheKind::Counting);

        cache.delete(&k("k")).unwrap();
        // The entry has no known value; the read falls through.
        assert_eq!(cache.get(&k("k")).unwrap(), Some(k("stored")));
    }

    // -----------------------------------------------------------------------
    // Failure handling
    // -----------------------------------------------------------------------

    struct FailingSource;

    impl Source<Vec<u8>, Vec<u8>> for FailingSource {
        fn get(&self, _key: &Vec<u8>) -> SourceResult<Option<Vec<u8>>> {
            Ok(None)
        }

        fn put(&self, _key: Vec<u8>, _value: Vec<u8>) -> SourceResult<()> {
            Err(SourceError::Store(lamina_store::StoreError::Backend(
                "disk full".into(),
            )))
        }

        fn delete(&self, _key: &Vec<u8>) -> SourceResult<()> {
            Ok(())
        }

        fn flush(&self) -> SourceResult<bool> {
            Ok(false)
        }
    }

    #[test]
    fn failed_flush_keeps_buffer_intact() {
        let cache = WriteCache::new(FailingSource, CacheKind::Simple);
        cache.put(k("k"), k("v")).unwrap();

        assert!(cache.flush().is_err());
        assert!(cache.has_modified());
        assert_eq!(cache.get(&k("k")).unwrap(), Some(k("v")));
    }

    // -----------------------------------------------------------------------
    // Read-write composition
    // -----------------------------------------------------------------------

    #[test]
    fn read_write_cache_buffers_and_memoizes() {
        let mem = Arc::new(MemSource::<Vec<u8>, Vec<u8>>::new());
        let cache = ReadWriteCache::new(mem.clone(), CacheKind::Simple);

        cache.put(k("a"), k("1")).unwrap();
        assert_eq!(cache.get(&k("a")).unwrap(), Some(k("1")));
        assert_eq!(mem.get(&k("a")).unwrap(), None);

        assert!(cache.flush().unwrap());
        assert_eq!(mem.get(&k("a")).unwrap(), Some(k("1")));
        assert_eq!(cache.get(&k("a")).unwrap(), Some(k("1")));
    }

    #[test]
    fn read_write_cache_bounded_read_side() {
        let mem = Arc::new(MemSource::<Vec<u8>, Vec<u8>>::new());
        let cache = ReadWriteCache::with_read_capacity(
            mem,
            CacheKind::Simple,
            NonZeroUsize::new(2).unwrap(),
        );

        for i in 0..5u8 {
            cache.put(vec![i], vec![i]).unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(cache.get(&vec![i]).unwrap(), Some(vec![i]));
        }
        assert_eq!(cache.read_cache().cached_entries(), 2);
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_writers_and_flusher() {
        use std::thread;

        let mem = Arc::new(MemSource::<Vec<u8>, Vec<u8>>::new());
        let cache = Arc::new(WriteCache::new(mem.clone(), CacheKind::Simple));

        let writers: Vec<_> = (0..4u8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..50u8 {
                        cache.put(vec![t, i], vec![i]).unwrap();
                    }
                })
            })
            .collect();

        // Flush repeatedly while writers are running; every write must
        // end up either still buffered or already in the source.
        let flusher = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for _ in 0..10 {
                    cache.flush().unwrap();
                }
            })
        };

        for w in writers {
            w.join().expect("thread should not panic");
        }
        flusher.join().expect("thread should not panic");
        cache.flush().unwrap();

        for t in 0..4u8 {
            for i in 0..50u8 {
                assert_eq!(mem.get(&vec![t, i]).unwrap(), Some(vec![i]));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Counting conservation (property)
    // -----------------------------------------------------------------------

    proptest! {
        /// For any interleaving of puts and deletes within one flush
        /// cycle, the net delta replayed onto the wrapped source equals
        /// the algebraic sum of the operations issued to the cache.
        #[test]
        fn counting_conservation(ops in proptest::collection::vec(any::<bool>(), 0..64)) {
            let recorder = Arc::new(DeltaRecorder::new());
            let cache = WriteCache::new(recorder.clone(), CacheKind::Counting);

            let mut expected: i64 = 0;
            for is_put in ops {
                if is_put {
                    cache.put(k("key"), k("v")).unwrap();
                    expected += 1;
                } else {
                    cache.delete(&k("key")).unwrap();
                    expected -= 1;
                }
            }
            cache.flush().unwrap();
            prop_assert_eq!(recorder.delta(b"key"), expected);
        }
    }
}
