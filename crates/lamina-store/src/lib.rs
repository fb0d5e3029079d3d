//! Backing-store boundary for the Lamina state-store stack.
//!
//! The cache layers in `lamina-source` never talk to a storage engine
//! directly; everything goes through the [`KeyValueStore`] trait defined
//! here. The contract is intentionally minimal -- point reads and writes
//! plus an atomic batch -- so that any disk KV engine can sit behind it.
//!
//! # Design Rules
//!
//! 1. Keys and values are opaque byte strings; the store never interprets
//!    them.
//! 2. `batch_write` applies all rows or none -- flushed cache state must
//!    not be torn by a crash mid-batch.
//! 3. Operations on a closed store fail loudly with [`StoreError::Closed`].
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryKv;
pub use traits::KeyValueStore;
