//! Composable cache layers over a backing key-value store, built for a
//! blockchain node's world-state database.
//!
//! A block mutates a bounded slice of a huge, versioned, trie-structured
//! mapping; adjacent versions share most of their nodes, and old versions
//! must eventually be pruned without corrupting state that a fork might
//! still reach. The layers here carry that workload: write-back batching,
//! reference counting for shared nodes, per-block journaling so deletes
//! can be committed or rolled back once the winning fork is known, and
//! background flushing so state-root computation never waits on disk.
//!
//! # Layers
//!
//! Everything implements the [`Source`] trait and wraps another `Source`:
//!
//! - [`ReadCache`] -- write-through read memoization, optionally LRU-bounded
//! - [`WriteCache`] -- write-back buffer, simple or counting mode
//! - [`ReadWriteCache`] -- the two composed as one unit
//! - [`AsyncWriteCache`] -- double-buffered write cache drained on a
//!   background task
//! - [`CountingSource`] -- reference counts kept inside the stored value
//! - [`JournalSource`] -- per-update insert/delete journal for fork-safe
//!   pruning
//! - [`BloomedSource`] -- probabilistic negative filter in front of reads
//! - [`SourceCodec`] -- typed keys/values over a byte-keyed source
//! - [`StoreSource`] -- atomic-batch adapter over a
//!   [`KeyValueStore`](lamina_store::KeyValueStore)
//! - [`ChainBox`] -- an ordered stack of the above behind one facade
//! - [`StateSource`] -- the canonical assembly of the whole stack
//!
//! # Concurrency
//!
//! Each cache instance serializes its operations through one coarse lock;
//! layers nest those locks strictly outer-before-inner, which is safe
//! because the layering is acyclic. The only background work is the async
//! cache's drain, and only one drain is ever in flight.

pub mod async_cache;
pub mod bloom;
pub mod chain;
pub mod codec;
pub mod counting;
pub mod error;
pub mod journal;
pub mod read_cache;
pub mod source;
pub mod state;
pub mod store_source;
pub mod write_cache;

// Re-export primary types at crate root for ergonomic imports.
pub use async_cache::{AsyncWriteCache, FlushHandle};
pub use bloom::{BloomFilter, BloomedSource};
pub use chain::ChainBox;
pub use codec::{BincodeCodec, HashKey, KeyCodec, RawKey, SourceCodec, ValueCodec};
pub use counting::{CountingSource, RefCounted};
pub use error::{SourceError, SourceResult};
pub use journal::{JournalSource, UpdateRecord};
pub use read_cache::ReadCache;
pub use source::{MemSource, Source};
pub use state::{StateConfig, StateSource};
pub use store_source::StoreSource;
pub use write_cache::{CacheKind, ReadWriteCache, WriteCache};
