use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Opaque identity of a single journalled state update.
///
/// In a running node this is the hash of the block (or state root) whose
/// import produced the update. The cache stack never interprets it -- it is
/// a fixed-length comparable/hashable token used to seal, persist, and
/// revert journal records.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UpdateHash {
    hash: [u8; 32],
}

impl UpdateHash {
    /// Wrap a raw 32-byte hash produced elsewhere (e.g. a block hash).
    pub fn from_raw(hash: [u8; 32]) -> Self {
        Self { hash }
    }

    /// Derive an update hash from arbitrary bytes with BLAKE3.
    ///
    /// Handy for tests and for callers that identify updates by something
    /// other than a precomputed block hash.
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"lamina-update-v1:");
        hasher.update(data);
        Self {
            hash: *hasher.finalize().as_bytes(),
        }
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Full hex-encoded string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// Short identifier (first 8 hex characters).
    pub fn short_id(&self) -> String {
        format!("upd:{}", hex::encode(&self.hash[..4]))
    }

    /// Parse from a hex string (64 hex characters).
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let s = s.strip_prefix("upd:").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self { hash: arr })
    }
}

impl fmt::Debug for UpdateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpdateHash({})", self.short_id())
    }
}

impl fmt::Display for UpdateHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_id())
    }
}
