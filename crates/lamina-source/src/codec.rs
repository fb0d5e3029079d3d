use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use lamina_types::UpdateHash;

use crate::error::{SourceError, SourceResult};
use crate::source::Source;

/// Encodes typed keys into the byte keys a backing store understands.
pub trait KeyCodec<K>: Send + Sync {
    fn encode_key(&self, key: &K) -> SourceResult<Vec<u8>>;
}

/// Encodes and decodes typed values to and from backing-store bytes.
pub trait ValueCodec<V>: Send + Sync {
    fn encode_value(&self, value: &V) -> SourceResult<Vec<u8>>;
    fn decode_value(&self, bytes: &[u8]) -> SourceResult<V>;
}

/// Identity codec for keys that are already byte strings.
pub struct RawKey;

impl KeyCodec<Vec<u8>> for RawKey {
    fn encode_key(&self, key: &Vec<u8>) -> SourceResult<Vec<u8>> {
        Ok(key.clone())
    }
}

/// Key codec for [`UpdateHash`] keys (the journal store's key type).
pub struct HashKey;

impl KeyCodec<UpdateHash> for HashKey {
    fn encode_key(&self, key: &UpdateHash) -> SourceResult<Vec<u8>> {
        Ok(key.as_bytes().to_vec())
    }
}

/// Value codec backed by serde + bincode.
pub struct BincodeCodec<V> {
    _marker: PhantomData<fn() -> V>,
}

impl<V> BincodeCodec<V> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<V> Default for BincodeCodec<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Serialize + DeserializeOwned> ValueCodec<V> for BincodeCodec<V> {
    fn encode_value(&self, value: &V) -> SourceResult<Vec<u8>> {
        bincode::serialize(value).map_err(|e| SourceError::Codec(e.to_string()))
    }

    fn decode_value(&self, bytes: &[u8]) -> SourceResult<V> {
        bincode::deserialize(bytes).map_err(|e| SourceError::Codec(e.to_string()))
    }
}

/// Stateless adapter translating a typed `Source<K, V>` onto a byte-keyed,
/// byte-valued source beneath it.
///
/// This is the boundary where domain keys/values cross into the backing
/// store's world. The adapter buffers nothing; `flush` is delegated to the
/// wrapped source so the adapter stays transparent when used as the
/// outward-facing handle of a stack.
pub struct SourceCodec<K, V, S, KC, VC> {
    inner: S,
    keys: KC,
    values: VC,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, S, KC, VC> SourceCodec<K, V, S, KC, VC>
where
    S: Source<Vec<u8>, Vec<u8>>,
    KC: KeyCodec<K>,
    VC: ValueCodec<V>,
{
    pub fn new(inner: S, keys: KC, values: VC) -> Self {
        Self {
            inner,
            keys,
            values,
            _marker: PhantomData,
        }
    }
}

impl<K, V, S, KC, VC> Source<K, V> for SourceCodec<K, V, S, KC, VC>
where
    K: Send + Sync,
    V: Send + Sync,
    S: Source<Vec<u8>, Vec<u8>>,
    KC: KeyCodec<K>,
    VC: ValueCodec<V>,
{
    fn get(&self, key: &K) -> SourceResult<Option<V>> {
        let raw = self.keys.encode_key(key)?;
        match self.inner.get(&raw)? {
            Some(bytes) => Ok(Some(self.values.decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: K, value: V) -> SourceResult<()> {
        let raw = self.keys.encode_key(&key)?;
        let bytes = self.values.encode_value(&value)?;
        self.inner.put(raw, bytes)
    }

    fn delete(&self, key: &K) -> SourceResult<()> {
        let raw = self.keys.encode_key(key)?;
        self.inner.delete(&raw)
    }

    fn flush(&self) -> SourceResult<bool> {
        self.inner.flush()
    }
}
