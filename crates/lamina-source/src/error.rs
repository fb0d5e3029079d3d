use lamina_store::StoreError;
use lamina_types::UpdateHash;

/// Errors from source-layer operations.
///
/// Two families matter to callers: contract violations
/// ([`UnknownUpdate`](SourceError::UnknownUpdate),
/// [`Contract`](SourceError::Contract)) are programmer errors that must
/// abort the current block-processing operation, while
/// [`Store`](SourceError::Store) wraps a transient backing-store failure
/// that the caller may retry -- the layer that raised it keeps its
/// in-memory buffers intact.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The backing store failed. Buffered state is left in place so the
    /// caller can retry the flush.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// `persist_update`/`revert_update` named a hash that was never
    /// committed or was already resolved.
    #[error("unknown update: {0}")]
    UnknownUpdate(UpdateHash),

    /// A stored reference-counted envelope could not be decoded.
    #[error("corrupt envelope for key {key}: {reason}")]
    CorruptEnvelope { key: String, reason: String },

    /// Key or value (de)serialization failed at a codec boundary.
    #[error("codec error: {0}")]
    Codec(String),

    /// Misuse of the layering API.
    #[error("contract violation: {0}")]
    Contract(String),
}

/// Result alias for source operations.
pub type SourceResult<T> = Result<T, SourceError>;
