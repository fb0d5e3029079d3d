use std::marker::PhantomData;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use lamina_types::UpdateHash;

use crate::codec::{BincodeCodec, HashKey, SourceCodec};
use crate::error::{SourceError, SourceResult};
use crate::source::{MemSource, Source};

/// Keys touched by one update: inserts already live in the wrapped
/// source (reversible), deletes are deferred until the update is
/// persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub inserted: Vec<Vec<u8>>,
    pub deleted: Vec<Vec<u8>>,
}

impl UpdateRecord {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty()
    }
}

/// Records which keys each update inserted and deleted, so that deletes
/// can be applied -- or inserts unwound -- long after the update happened.
///
/// Used for state pruning: the node keeps every trie node the last N
/// blocks might still reach, then either persists an old update (its
/// deletes finally reclaim unreferenced nodes) or reverts one (a block
/// that lost the fork race has its inserts unwound).
///
/// `put` is propagated to the wrapped source immediately and the key
/// recorded in the current update; `delete` is only recorded. The current
/// update is sealed under a hash by
/// [`commit_updates`](JournalSource::commit_updates) and resolved by
/// [`persist_update`](JournalSource::persist_update) or
/// [`revert_update`](JournalSource::revert_update).
///
/// # Structural requirement
///
/// The wrapped source must itself count references (see
/// [`CountingSource`](crate::counting::CountingSource)). With a plain
/// source, a key deleted in an old update and re-inserted by a newer one
/// is wrongly purged when the old update is finally persisted. Nothing
/// here can check this -- it is an invariant of the stack the journal is
/// placed in.
pub struct JournalSource<V, S> {
    source: S,
    current: Mutex<UpdateRecord>,
    journal: Box<dyn Source<UpdateHash, UpdateRecord>>,
    _marker: PhantomData<fn() -> V>,
}

impl<V, S> JournalSource<V, S>
where
    V: Send + Sync,
    S: Source<Vec<u8>, V>,
{
    /// Journal kept in memory only.
    pub fn new(source: S) -> Self {
        Self {
            source,
            current: Mutex::new(UpdateRecord::default()),
            journal: Box::new(MemSource::new()),
            _marker: PhantomData,
        }
    }

    /// Journal persisted through `store`, so sealed updates survive a
    /// restart. Records are bincode-encoded byte rows keyed by the update
    /// hash.
    pub fn with_journal_store<J>(source: S, store: J) -> Self
    where
        J: Source<Vec<u8>, Vec<u8>> + 'static,
    {
        Self {
            source,
            current: Mutex::new(UpdateRecord::default()),
            journal: Box::new(SourceCodec::new(store, HashKey, BincodeCodec::new())),
            _marker: PhantomData,
        }
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Seal everything recorded since the previous commit under `hash`
    /// and start a fresh current update.
    pub fn commit_updates(&self, hash: UpdateHash) -> SourceResult<()> {
        let record = std::mem::take(&mut *self.current.lock().expect("lock poisoned"));
        debug!(
            update = %hash,
            inserted = record.inserted.len(),
            deleted = record.deleted.len(),
            "update sealed"
        );
        self.journal.put(hash, record)
    }

    /// Whether a sealed update exists for `hash`.
    pub fn has_update(&self, hash: &UpdateHash) -> SourceResult<bool> {
        Ok(self.journal.get(hash)?.is_some())
    }

    /// Apply the update's recorded deletes to the wrapped source and
    /// discard the update. Called once a block is final: whatever it
    /// stopped referencing can really be reclaimed.
    ///
    /// Deleting a key that is already gone is a no-op; only an unknown or
    /// already-resolved `hash` is an error.
    pub fn persist_update(&self, hash: &UpdateHash) -> SourceResult<()> {
        let record = self
            .journal
            .get(hash)?
            .ok_or(SourceError::UnknownUpdate(*hash))?;
        for key in &record.deleted {
            self.source.delete(key)?;
        }
        self.journal.delete(hash)?;
        debug!(update = %hash, deletes = record.deleted.len(), "update persisted");
        Ok(())
    }

    /// Unwind the update's recorded inserts from the wrapped source and
    /// discard the update. Called when the block turns out not to be on
    /// the canonical chain.
    pub fn revert_update(&self, hash: &UpdateHash) -> SourceResult<()> {
        let record = self
            .journal
            .get(hash)?
            .ok_or(SourceError::UnknownUpdate(*hash))?;
        for key in &record.inserted {
            self.source.delete(key)?;
        }
        self.journal.delete(hash)?;
        debug!(update = %hash, reverted = record.inserted.len(), "update reverted");
        Ok(())
    }
}

impl<V, S> Source<Vec<u8>, V> for JournalSource<V, S>
where
    V: Send + Sync,
    S: Source<Vec<u8>, V>,
{
    fn get(&self, key: &Vec<u8>) -> SourceResult<Option<V>> {
        self.source.get(key)
    }

    /// Propagated to the wrapped source immediately, and recorded so a
    /// later [`revert_update`](JournalSource::revert_update) can undo it.
    fn put(&self, key: Vec<u8>, value: V) -> SourceResult<()> {
        self.source.put(key.clone(), value)?;
        self.current.lock().expect("lock poisoned").inserted.push(key);
        Ok(())
    }

    /// Not propagated -- recorded in the current update and applied only
    /// when that update is persisted.
    fn delete(&self, key: &Vec<u8>) -> SourceResult<()> {
        self.current
            .lock()
            .expect("lock poisoned")
            .deleted
            .push(key.clone());
        Ok(())
    }

    fn flush(&self) -> SourceResult<bool> {
        let journal_flushed = self.journal.flush()?;
        let source_flushed = self.source.flush()?;
        Ok(journal_flushed || source_flushed)
    }
}
