use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use tracing::{debug, info};

use crate::error::SourceResult;
use crate::source::Source;

/// Probabilistic membership filter: no false negatives, tunable false
/// positives.
///
/// Bit indexes are derived from the key bytes with BLAKE3 in extendable
/// output mode, so any number of hash functions draws from one digest.
/// Bits are only ever set, never cleared (except by [`clear`](Self::clear));
/// the filter is monotonic by construction.
#[derive(Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    bit_count: usize,
    hashes: u32,
    added: u64,
}

impl BloomFilter {
    /// Filter with `c` bits per element for `n` expected elements and `k`
    /// hash functions.
    pub fn with_bits_per_element(c: f64, n: usize, k: u32) -> Self {
        let bit_count = ((c * n as f64).ceil() as usize).max(1);
        Self {
            bits: vec![0u64; bit_count.div_ceil(64)],
            bit_count,
            hashes: k.max(1),
            added: 0,
        }
    }

    /// Filter of `bit_count` total bits for `expected` elements; the hash
    /// count is chosen optimally from the ratio.
    pub fn with_size(bit_count: usize, expected: usize) -> Self {
        let c = bit_count as f64 / expected.max(1) as f64;
        let k = (c * std::f64::consts::LN_2).round() as u32;
        Self::with_bits_per_element(c, expected.max(1), k.max(1))
    }

    /// Filter sized for the given false-positive probability at `expected`
    /// elements.
    pub fn with_false_positive_rate(p: f64, expected: usize) -> Self {
        // k = ceil(-log2(p)), c = k / ln(2)
        let k = (-(p.ln()) / std::f64::consts::LN_2).ceil();
        let c = k / std::f64::consts::LN_2;
        Self::with_bits_per_element(c, expected.max(1), k as u32)
    }

    fn bit_indexes(&self, key: &[u8]) -> Vec<usize> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(key);
        let mut reader = hasher.finalize_xof();
        let mut buf = [0u8; 4];
        (0..self.hashes)
            .map(|_| {
                reader.fill(&mut buf);
                u32::from_le_bytes(buf) as usize % self.bit_count
            })
            .collect()
    }

    /// Add a key to the filter.
    pub fn insert(&mut self, key: &[u8]) {
        for idx in self.bit_indexes(key) {
            self.bits[idx / 64] |= 1 << (idx % 64);
        }
        self.added += 1;
    }

    /// Returns `true` if `key` may have been inserted; `false` means it
    /// definitely was not.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.bit_indexes(key)
            .into_iter()
            .all(|idx| self.bits[idx / 64] & (1 << (idx % 64)) != 0)
    }

    /// Reset all bits and the element counter.
    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|w| *w = 0);
        self.added = 0;
    }

    /// Number of elements inserted since construction or the last clear.
    pub fn added(&self) -> u64 {
        self.added
    }

    /// Total number of bits.
    pub fn bit_count(&self) -> usize {
        self.bit_count
    }

    /// Number of hash functions.
    pub fn hash_count(&self) -> u32 {
        self.hashes
    }

    /// Expected false-positive probability at the current element count:
    /// `(1 - e^(-k*n/m))^k`.
    pub fn false_positive_probability(&self) -> f64 {
        let k = self.hashes as f64;
        let exponent = -k * self.added as f64 / self.bit_count as f64;
        (1.0 - exponent.exp()).powf(k)
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("bits", &self.bit_count)
            .field("hashes", &self.hashes)
            .field("added", &self.added)
            .finish()
    }
}

/// Front-end negative filter over a wrapped source.
///
/// While blooming is active every written key is added to the filter, and
/// `get` consults the filter first: "definitely absent" short-circuits to
/// `Ok(None)` without touching the wrapped source. Reads that pass the
/// filter are tracked as true hits or false positives for observability.
///
/// # Correctness requirement
///
/// Starting the filter is only sound when the wrapped source is empty, or
/// when the supplied filter already covers every key physically present --
/// otherwise existing keys would be reported as definitely absent. This
/// precondition is the caller's to uphold; it cannot be checked here.
pub struct BloomedSource<V, S> {
    source: S,
    filter: RwLock<Option<BloomFilter>>,
    true_hits: AtomicU64,
    false_positives: AtomicU64,
    _marker: std::marker::PhantomData<fn() -> V>,
}

impl<V, S> BloomedSource<V, S>
where
    V: Send + Sync,
    S: Source<Vec<u8>, V>,
{
    /// Wrap `source` with blooming off.
    pub fn new(source: S) -> Self {
        Self {
            source,
            filter: RwLock::new(None),
            true_hits: AtomicU64::new(0),
            false_positives: AtomicU64::new(0),
            _marker: std::marker::PhantomData,
        }
    }

    /// Activate negative lookups with the given filter.
    ///
    /// See the type-level correctness requirement: the wrapped source must
    /// be empty or already fully reflected in `filter`.
    pub fn start_blooming(&self, filter: BloomFilter) {
        info!(
            bits = filter.bit_count(),
            hashes = filter.hash_count(),
            "negative-lookup filter enabled"
        );
        *self.filter.write().expect("lock poisoned") = Some(filter);
    }

    /// Deactivate negative lookups; every get reads through again.
    pub fn stop_blooming(&self) {
        debug!(
            true_hits = self.true_hits.load(Ordering::Relaxed),
            false_positives = self.false_positives.load(Ordering::Relaxed),
            "negative-lookup filter disabled"
        );
        *self.filter.write().expect("lock poisoned") = None;
    }

    /// Whether a filter is currently active.
    pub fn is_blooming(&self) -> bool {
        self.filter.read().expect("lock poisoned").is_some()
    }

    /// Reads that passed the filter and found a value.
    pub fn true_hits(&self) -> u64 {
        self.true_hits.load(Ordering::Relaxed)
    }

    /// Reads that passed the filter but found nothing.
    pub fn false_positives(&self) -> u64 {
        self.false_positives.load(Ordering::Relaxed)
    }
}

impl<V, S> Source<Vec<u8>, V> for BloomedSource<V, S>
where
    V: Send + Sync,
    S: Source<Vec<u8>, V>,
{
    fn get(&self, key: &Vec<u8>) -> SourceResult<Option<V>> {
        let filtered = {
            let filter = self.filter.read().expect("lock poisoned");
            match &*filter {
                Some(f) if !f.contains(key) => return Ok(None),
                Some(_) => true,
                None => false,
            }
        };
        let value = self.source.get(key)?;
        if filtered {
            if value.is_some() {
                self.true_hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.false_positives.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(value)
    }

    fn put(&self, key: Vec<u8>, value: V) -> SourceResult<()> {
        {
            let mut filter = self.filter.write().expect("lock poisoned");
            if let Some(f) = filter.as_mut() {
                f.insert(&key);
            }
        }
        self.source.put(key, value)
    }

    fn delete(&self, key: &Vec<u8>) -> SourceResult<()> {
        // Filter bits are monotonic; a deleted key keeps costing one
        // read-through, which is harmless.
        self.source.delete(key)
    }

    fn flush(&self) -> SourceResult<bool> {
        self.source.flush()
    }
}
