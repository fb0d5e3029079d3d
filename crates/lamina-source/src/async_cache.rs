use std::hash::Hash;
use std::sync::{mpsc, Arc, Condvar, Mutex};

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::error::{SourceError, SourceResult};
use crate::source::Source;
use crate::write_cache::{CacheKind, WriteCache};

/// Single-flight state shared with the background drain task.
struct FlushSync {
    in_progress: Mutex<bool>,
    done: Condvar,
}

impl FlushSync {
    fn new() -> Self {
        Self {
            in_progress: Mutex::new(false),
            done: Condvar::new(),
        }
    }

    /// Block until no flush is running, returning the guard so the caller
    /// can atomically transition state while still holding the lock.
    fn wait_idle(&self) -> std::sync::MutexGuard<'_, bool> {
        let mut guard = self.in_progress.lock().expect("lock poisoned");
        while *guard {
            guard = self.done.wait(guard).expect("lock poisoned");
        }
        guard
    }
}

/// Completion handle for a background flush.
pub struct FlushHandle {
    rx: mpsc::Receiver<SourceResult<bool>>,
}

impl FlushHandle {
    /// Block until the background drain finishes and return its result.
    pub fn wait(self) -> SourceResult<bool> {
        self.rx
            .recv()
            .map_err(|_| SourceError::Contract("flush worker terminated without reporting".into()))?
    }
}

/// Double-buffered write cache whose drain runs on a background task.
///
/// Two [`WriteCache`]s share the wrapped source: `current` receives all
/// foreground operations while `flushing` is drained to the source off
/// the calling thread. [`flip_storage`](AsyncWriteCache::flip_storage)
/// hands `current`'s buffer to `flushing`;
/// [`flush_async`](AsyncWriteCache::flush_async) schedules the drain.
/// Exactly one flush is in flight at a time -- a second call blocks until
/// the first completes, because two drains interleaving writes against
/// the same backing store would land in nondeterministic order.
///
/// Trie-state flushes are slow; this keeps block import from stalling on
/// disk I/O.
pub struct AsyncWriteCache<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: Source<K, V> + 'static,
{
    flushing: Arc<WriteCache<K, V, S>>,
    current: WriteCache<K, V, Arc<WriteCache<K, V, S>>>,
    sync: Arc<FlushSync>,
    runtime: Handle,
}

impl<K, V, S> AsyncWriteCache<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: Source<K, V> + 'static,
{
    /// Build over `source`, draining on the given runtime.
    ///
    /// The runtime handle is an explicitly owned resource: shutting the
    /// runtime down is how the caller controls the flush worker's
    /// lifecycle.
    pub fn new(source: S, kind: CacheKind, runtime: Handle) -> Self {
        let flushing = Arc::new(WriteCache::new(source, kind));
        let current = WriteCache::new(Arc::clone(&flushing), kind);
        Self {
            flushing,
            current,
            sync: Arc::new(FlushSync::new()),
            runtime,
        }
    }

    /// Hand the current buffer over to the flushing cache.
    ///
    /// Blocks while a flush is in progress. If an earlier flush failed and
    /// left entries behind, the newer buffer is merged on top rather than
    /// dropped, so a later retry still covers everything.
    pub fn flip_storage(&self) {
        let guard = self.sync.wait_idle();
        let buffer = self.current.take_buffer();
        if !buffer.is_empty() {
            self.flushing.absorb_buffer(buffer);
        }
        drop(guard);
    }

    /// Schedule a background drain of the flushing cache.
    ///
    /// Blocks until any prior flush completes (single flush in flight),
    /// then submits the drain and returns immediately. There is no
    /// cancellation: a started drain runs to completion.
    pub fn flush_async(&self) -> FlushHandle {
        let mut guard = self.sync.wait_idle();
        *guard = true;
        drop(guard);

        let (tx, rx) = mpsc::channel();
        let flushing = Arc::clone(&self.flushing);
        let sync = Arc::clone(&self.sync);
        self.runtime.spawn_blocking(move || {
            debug!("background flush started");
            // The drain cascades into the wrapped source so that batch
            // commits happen on the background thread too, not on the
            // foreground thread that scheduled the flush.
            let result = flushing.flush().and_then(|changed| {
                let cascaded = flushing.source().flush()?;
                Ok(changed || cascaded)
            });
            match &result {
                Ok(changed) => debug!(changed, "background flush complete"),
                Err(e) => warn!(error = %e, "background flush failed; buffer retained"),
            }
            let mut guard = sync.in_progress.lock().expect("lock poisoned");
            *guard = false;
            sync.done.notify_all();
            drop(guard);
            let _ = tx.send(result);
        });
        FlushHandle { rx }
    }

    /// Block until no flush is in flight.
    pub fn wait_idle(&self) {
        drop(self.sync.wait_idle());
    }

    /// Whether the foreground buffer has pending changes.
    pub fn has_modified(&self) -> bool {
        self.current.has_modified()
    }
}

impl<K, V, S> Source<K, V> for AsyncWriteCache<K, V, S>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: Source<K, V> + 'static,
{
    fn get(&self, key: &K) -> SourceResult<Option<V>> {
        self.current.get(key)
    }

    fn put(&self, key: K, value: V) -> SourceResult<()> {
        self.current.put(key, value)
    }

    fn delete(&self, key: &K) -> SourceResult<()> {
        self.current.delete(key)
    }

    /// Flip the buffers and schedule the drain, without waiting for it.
    fn flush(&self) -> SourceResult<bool> {
        let had_pending = self.current.has_modified();
        self.flip_storage();
        let _ = self.flush_async();
        Ok(had_pending)
    }
}
