use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;

use lamina_store::KeyValueStore;

use crate::async_cache::AsyncWriteCache;
use crate::bloom::{BloomFilter, BloomedSource};
use crate::chain::ChainBox;
use crate::counting::CountingSource;
use crate::error::SourceResult;
use crate::read_cache::ReadCache;
use crate::source::Source;
use crate::store_source::StoreSource;
use crate::write_cache::{CacheKind, WriteCache};

type ByteSource = Arc<dyn Source<Vec<u8>, Vec<u8>>>;

/// Configuration for a [`StateSource`] stack.
#[derive(Clone, Debug)]
pub struct StateConfig {
    /// Bound on the read cache; `None` keeps every entry.
    pub read_cache_capacity: Option<NonZeroUsize>,
    /// Keep byte-envelope reference counts in the backing store. Required
    /// when a journal with deferred pruning sits on top of this stack.
    pub counting: bool,
    /// Start negative lookups with this filter. Only sound over an empty
    /// store (see [`BloomedSource`]).
    pub bloom: Option<BloomFilter>,
    /// Drain the write cache on this runtime instead of the caller's
    /// thread (double-buffered flush).
    pub runtime: Option<Handle>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            read_cache_capacity: None,
            counting: true,
            bloom: None,
            runtime: None,
        }
    }
}

/// The canonical node stack over a backing store, assembled from the
/// individual layers:
///
/// ```text
/// read cache                      (memoizes reads)
///   └─ write cache | async cache  (buffers writes per block)
///        └─ bloomed source        (optional negative filter)
///             └─ counting source  (optional envelope refcounts)
///                  └─ store source (atomic batch into the engine)
/// ```
///
/// Exposed as one [`Source`]; `flush` walks the stack facade-to-base.
pub struct StateSource {
    chain: ChainBox<Vec<u8>, Vec<u8>>,
    bloomed: Option<Arc<BloomedSource<Vec<u8>, ByteSource>>>,
    async_cache: Option<Arc<AsyncWriteCache<Vec<u8>, Vec<u8>, ByteSource>>>,
}

impl StateSource {
    pub fn new<KV: KeyValueStore + 'static>(store: KV, config: StateConfig) -> Self {
        let kind = if config.counting {
            CacheKind::Counting
        } else {
            CacheKind::Simple
        };

        let base: ByteSource = Arc::new(StoreSource::new(store));
        let mut chain = ChainBox::new(Arc::clone(&base));
        let mut top = base;

        if config.counting {
            let counting = Arc::new(CountingSource::new(top));
            chain.add(counting.clone());
            top = counting;
        }

        let mut bloomed_handle = None;
        if let Some(filter) = config.bloom {
            let bloomed = Arc::new(BloomedSource::new(top));
            bloomed.start_blooming(filter);
            chain.add(bloomed.clone());
            bloomed_handle = Some(Arc::clone(&bloomed));
            top = bloomed;
        }

        let mut async_handle = None;
        match config.runtime {
            Some(runtime) => {
                let cache = Arc::new(AsyncWriteCache::new(top, kind, runtime));
                chain.add(cache.clone());
                async_handle = Some(Arc::clone(&cache));
                top = cache;
            }
            None => {
                let cache = Arc::new(WriteCache::new(top, kind));
                chain.add(cache.clone());
                top = cache;
            }
        }

        let read: ByteSource = match config.read_cache_capacity {
            Some(capacity) => Arc::new(ReadCache::with_capacity(top, capacity)),
            None => Arc::new(ReadCache::new(top)),
        };
        chain.add(read);

        info!(
            layers = chain.len(),
            counting = config.counting,
            blooming = bloomed_handle.is_some(),
            async_flush = async_handle.is_some(),
            "state source assembled"
        );

        Self {
            chain,
            bloomed: bloomed_handle,
            async_cache: async_handle,
        }
    }

    /// The negative-lookup layer, when configured.
    pub fn bloomed(&self) -> Option<&BloomedSource<Vec<u8>, ByteSource>> {
        self.bloomed.as_deref()
    }

    /// The double-buffered write cache, when configured.
    pub fn async_cache(&self) -> Option<&AsyncWriteCache<Vec<u8>, Vec<u8>, ByteSource>> {
        self.async_cache.as_deref()
    }

    /// Block until any background flush has drained.
    pub fn wait_idle(&self) {
        if let Some(cache) = &self.async_cache {
            cache.wait_idle();
        }
    }
}

impl Source<Vec<u8>, Vec<u8>> for StateSource {
    fn get(&self, key: &Vec<u8>) -> SourceResult<Option<Vec<u8>>> {
        self.chain.get(key)
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> SourceResult<()> {
        self.chain.put(key, value)
    }

    fn delete(&self, key: &Vec<u8>) -> SourceResult<()> {
        self.chain.delete(key)
    }

    fn flush(&self) -> SourceResult<bool> {
        self.chain.flush()
    }
}
