//! Shared primitive types for the Lamina state-store stack.
//!
//! Kept deliberately small: the cache layers treat keys and values as
//! opaque, so the only domain types that cross crate boundaries are the
//! journal's update identity and the error enum for parsing it.

pub mod error;
pub mod update;

pub use error::TypeError;
pub use update::UpdateHash;
