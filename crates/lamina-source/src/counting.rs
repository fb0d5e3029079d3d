use std::sync::Mutex;

use crate::bloom::BloomFilter;
use crate::error::{SourceError, SourceResult};
use crate::source::Source;

/// A stored value with its reference count: `count` owners currently
/// reference `payload`.
///
/// Encoded as a 4-byte little-endian count followed by the payload bytes.
/// A stored envelope always has `count >= 1`; reaching zero deletes the
/// key instead of storing an empty envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefCounted {
    pub count: u32,
    pub payload: Vec<u8>,
}

impl RefCounted {
    const HEADER: usize = 4;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER + self.payload.len());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::HEADER {
            return None;
        }
        let mut count = [0u8; Self::HEADER];
        count.copy_from_slice(&bytes[..Self::HEADER]);
        Some(Self {
            count: u32::from_le_bytes(count),
            payload: bytes[Self::HEADER..].to_vec(),
        })
    }
}

/// Reference counting kept inside the stored value itself.
///
/// For backing stores that cannot hold an in-memory counter map -- the
/// count must survive a process restart without a side table. Every `put`
/// re-reads the envelope and bumps the count; `delete` decrements and only
/// issues a real delete when the last reference goes away. `get` strips
/// the envelope and returns the payload.
///
/// An optional membership hint skips the read-before-delete for keys that
/// were never referenced twice. The hint may err toward "check anyway"
/// (costing one extra read) but must never claim a multi-referenced key is
/// single-referenced -- which is why it is only sound to install over an
/// empty store, or together with a filter that already reflects every
/// stored key.
pub struct CountingSource<S> {
    source: S,
    hint: Option<Mutex<BloomFilter>>,
}

impl<S: Source<Vec<u8>, Vec<u8>>> CountingSource<S> {
    pub fn new(source: S) -> Self {
        Self { source, hint: None }
    }

    /// Wrap with a shared-reference hint. See the type-level soundness
    /// requirement.
    pub fn with_ref_hint(source: S, filter: BloomFilter) -> Self {
        Self {
            source,
            hint: Some(Mutex::new(filter)),
        }
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    fn read_envelope(&self, key: &[u8]) -> SourceResult<Option<RefCounted>> {
        match self.source.get(&key.to_vec())? {
            Some(bytes) => match RefCounted::decode(&bytes) {
                Some(envelope) => Ok(Some(envelope)),
                None => Err(SourceError::CorruptEnvelope {
                    key: hex::encode(key),
                    reason: format!("{} bytes is shorter than the count header", bytes.len()),
                }),
            },
            None => Ok(None),
        }
    }
}

impl<S: Source<Vec<u8>, Vec<u8>>> Source<Vec<u8>, Vec<u8>> for CountingSource<S> {
    fn get(&self, key: &Vec<u8>) -> SourceResult<Option<Vec<u8>>> {
        Ok(self.read_envelope(key)?.map(|envelope| envelope.payload))
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> SourceResult<()> {
        let count = match self.read_envelope(&key)? {
            Some(envelope) => envelope.count,
            None => 0,
        };
        if count >= 1 {
            if let Some(hint) = &self.hint {
                hint.lock().expect("lock poisoned").insert(&key);
            }
        }
        let envelope = RefCounted {
            count: count + 1,
            payload: value,
        };
        self.source.put(key, envelope.encode())
    }

    fn delete(&self, key: &Vec<u8>) -> SourceResult<()> {
        if let Some(hint) = &self.hint {
            if !hint.lock().expect("lock poisoned").contains(key) {
                // Never referenced twice: the count is at most one, so
                // the envelope read can be skipped.
                return self.source.delete(key);
            }
        }
        match self.read_envelope(key)? {
            Some(envelope) if envelope.count > 1 => {
                let decremented = RefCounted {
                    count: envelope.count - 1,
                    payload: envelope.payload,
                };
                self.source.put(key.clone(), decremented.encode())
            }
            Some(_) => self.source.delete(key),
            None => Ok(()),
        }
    }

    fn flush(&self) -> SourceResult<bool> {
        self.source.flush()
    }
}
