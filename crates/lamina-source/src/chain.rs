use std::sync::Arc;

use crate::error::SourceResult;
use crate::source::Source;

/// An ordered stack of sources over one backing source, exposed as a
/// single [`Source`].
///
/// The last-added layer is the facade: `get`/`put`/`delete` go to it
/// alone. `flush` walks the stack from the facade down to the base, so
/// each layer pushes its buffered state into the one beneath before that
/// layer is asked to flush in turn -- the backing store is touched last.
pub struct ChainBox<K, V> {
    layers: Vec<Arc<dyn Source<K, V>>>,
}

impl<K: 'static, V: 'static> ChainBox<K, V> {
    /// Start a chain with its base (innermost) source.
    pub fn new(base: Arc<dyn Source<K, V>>) -> Self {
        Self { layers: vec![base] }
    }

    /// Add a layer on top; it becomes the new facade.
    ///
    /// The layer is expected to wrap the current facade -- the box does not
    /// link layers itself, it only records the flush order.
    pub fn add(&mut self, layer: Arc<dyn Source<K, V>>) {
        self.layers.push(layer);
    }

    /// Number of layers, including the base.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn facade(&self) -> &Arc<dyn Source<K, V>> {
        self.layers.last().expect("chain always holds its base")
    }
}

impl<K: Send + Sync + 'static, V: Send + Sync + 'static> Source<K, V> for ChainBox<K, V> {
    fn get(&self, key: &K) -> SourceResult<Option<V>> {
        self.facade().get(key)
    }

    fn put(&self, key: K, value: V) -> SourceResult<()> {
        self.facade().put(key, value)
    }

    fn delete(&self, key: &K) -> SourceResult<()> {
        self.facade().delete(key)
    }

    fn flush(&self) -> SourceResult<bool> {
        let mut changed = false;
        for layer in self.layers.iter().rev() {
            changed |= layer.flush()?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemSource;
    use crate::write_cache::{CacheKind, WriteCache};
    use std::sync::Mutex;

    fn k(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    /// Transparent layer that records when it is flushed.
    struct FlushProbe {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        inner: Arc<dyn Source<Vec<u8>, Vec<u8>>>,
    }

    impl Source<Vec<u8>, Vec<u8>> for FlushProbe {
        fn get(&self, key: &Vec<u8>) -> SourceResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn put(&self, key: Vec<u8>, value: Vec<u8>) -> SourceResult<()> {
            self.inner.put(key, value)
        }

        fn delete(&self, key: &Vec<u8>) -> SourceResult<()> {
            self.inner.delete(key)
        }

        fn flush(&self) -> SourceResult<bool> {
            self.log.lock().unwrap().push(self.name);
            Ok(false)
        }
    }

    #[test]
    fn facade_is_the_last_added_layer() {
        let base = Arc::new(MemSource::<Vec<u8>, Vec<u8>>::new());
        let cache = Arc::new(WriteCache::new(
            base.clone() as Arc<dyn Source<Vec<u8>, Vec<u8>>>,
            CacheKind::Simple,
        ));

        let mut chain = ChainBox::new(base.clone());
        chain.add(cache);

        chain.put(k("a"), k("1")).unwrap();
        // The write landed in the cache, not the base.
        assert_eq!(base.get(&k("a")).unwrap(), None);
        assert_eq!(chain.get(&k("a")).unwrap(), Some(k("1")));
    }

    #[test]
    fn flush_runs_from_facade_to_base() {
        let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        let base = Arc::new(MemSource::<Vec<u8>, Vec<u8>>::new());

        let a = Arc::new(FlushProbe {
            name: "bottom",
            log: log.clone(),
            inner: base.clone(),
        });
        let b = Arc::new(FlushProbe {
            name: "middle",
            log: log.clone(),
            inner: a.clone(),
        });
        let c = Arc::new(FlushProbe {
            name: "top",
            log: log.clone(),
            inner: b.clone(),
        });

        let mut chain = ChainBox::new(a);
        chain.add(b);
        chain.add(c);
        assert_eq!(chain.len(), 3);

        chain.flush().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["top", "middle", "bottom"]);
    }

    #[test]
    fn flush_pushes_buffers_down_to_the_base() {
        let base = Arc::new(MemSource::<Vec<u8>, Vec<u8>>::new());
        let cache = Arc::new(WriteCache::new(
            base.clone() as Arc<dyn Source<Vec<u8>, Vec<u8>>>,
            CacheKind::Simple,
        ));

        let mut chain = ChainBox::new(base.clone());
        chain.add(cache);

        chain.put(k("a"), k("1")).unwrap();
        assert!(chain.flush().unwrap());
        assert_eq!(base.get(&k("a")).unwrap(), Some(k("1")));

        // A clean chain reports no pending changes.
        assert!(!chain.flush().unwrap());
    }
}
