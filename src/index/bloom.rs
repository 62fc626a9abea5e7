//! Bloom Filter
//!
//! Approximate membership over a block's primary keys. No false negatives;
//! false positives at roughly the configured rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use bloomfilter::Bloom;
use bytes::Bytes;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::common::Id;
use crate::error::{PillarError, Result};
use crate::fs::FileRef;
use crate::key::Key;

use super::codec::{decode_blob, encode_blob};
use super::{IndexError, IndexMeta, IndexType};

const BLOOM_MAGIC: &[u8; 4] = b"PBLM";

#[derive(Serialize, Deserialize)]
struct BloomBlob {
    items: u64,
    fp_rate: f64,
    bitmap: Vec<u8>,
}

pub struct BloomFilter {
    bloom: Bloom<Vec<u8>>,
    items: u64,
    fp_rate: f64,
}

impl BloomFilter {
    pub fn build(keys: &[Key], fp_rate: f64) -> std::result::Result<Self, IndexError> {
        // Sized for at least one item so an empty block still yields a valid filter
        let mut bloom = Bloom::new_for_fp_rate(keys.len().max(1), fp_rate)
            .map_err(|e| IndexError::Filter(e.to_string()))?;
        for key in keys {
            bloom.set(&key.encode());
        }
        Ok(Self {
            bloom,
            items: keys.len() as u64,
            fp_rate,
        })
    }

    pub fn may_contain(&self, key: &Key) -> bool {
        self.bloom.check(&key.encode())
    }

    pub fn items(&self) -> u64 {
        self.items
    }

    pub fn fp_rate(&self) -> f64 {
        self.fp_rate
    }

    pub fn encode(&self) -> std::result::Result<Bytes, IndexError> {
        let blob = BloomBlob {
            items: self.items,
            fp_rate: self.fp_rate,
            bitmap: self.bloom.as_slice().to_vec(),
        };
        encode_blob(BLOOM_MAGIC, &blob)
    }

    pub fn decode(data: &[u8]) -> std::result::Result<Self, IndexError> {
        let blob: BloomBlob = decode_blob(BLOOM_MAGIC, data)?;
        let bloom =
            Bloom::from_slice(&blob.bitmap).map_err(|e| IndexError::Filter(e.to_string()))?;
        Ok(Self {
            bloom,
            items: blob.items,
            fp_rate: blob.fp_rate,
        })
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Collects keys; the filter is sized and written on `finalize`
pub struct BloomWriter {
    file: FileRef,
    column: u16,
    slot: u16,
    fp_rate: f64,
    pending: Vec<Key>,
}

impl BloomWriter {
    pub fn new(file: FileRef, column: u16, slot: u16, fp_rate: f64) -> Self {
        Self {
            file,
            column,
            slot,
            fp_rate,
            pending: Vec::new(),
        }
    }

    pub fn add_values(&mut self, keys: &[Key]) {
        self.pending.extend_from_slice(keys);
    }

    pub fn finalize(self) -> Result<IndexMeta> {
        let filter = BloomFilter::build(&self.pending, self.fp_rate)
            .map_err(|e| PillarError::Serialization(e.to_string()))?;
        let buf = filter
            .encode()
            .map_err(|e| PillarError::Serialization(e.to_string()))?;
        self.file.write(&buf)?;
        Ok(IndexMeta::new(IndexType::BloomFilter, self.column, self.slot))
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Lazily decodes a bloom filter slot; counts every key it is asked about
pub struct BloomReader {
    id: Id,
    file: FileRef,
    cache: OnceLock<BloomFilter>,
    probes: AtomicU64,
}

impl BloomReader {
    pub fn new(id: Id, file: FileRef) -> Self {
        Self {
            id,
            file,
            cache: OnceLock::new(),
            probes: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    /// Number of keys probed so far
    pub fn probes(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    fn load(&self) -> std::result::Result<&BloomFilter, IndexError> {
        if let Some(filter) = self.cache.get() {
            return Ok(filter);
        }
        let buf = self
            .file
            .read_all()
            .map_err(|e| IndexError::Io(format!("{}: {}", self.id, e)))?;
        let filter = BloomFilter::decode(&buf)?;
        Ok(self.cache.get_or_init(|| filter))
    }

    pub fn may_contain_key(&self, key: &Key) -> std::result::Result<bool, IndexError> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        Ok(self.load()?.may_contain(key))
    }

    /// Narrow `selection` (positions into `keys`) to the keys that may be present
    pub fn may_contain_any_keys(
        &self,
        keys: &[Key],
        selection: &RoaringBitmap,
    ) -> std::result::Result<RoaringBitmap, IndexError> {
        self.probes.fetch_add(selection.len(), Ordering::Relaxed);
        let filter = self.load()?;
        Ok(selection
            .iter()
            .filter(|pos| {
                keys.get(*pos as usize)
                    .map_or(false, |key| filter.may_contain(key))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let keys: Vec<Key> = (0..1_000).map(Key::Int).collect();
        let filter = BloomFilter::build(&keys, 0.01).unwrap();
        for key in &keys {
            assert!(filter.may_contain(key));
        }
    }

    #[test]
    fn test_decode_preserves_membership() {
        let keys: Vec<Key> = ["alpha", "beta", "gamma"].iter().map(|s| Key::from(*s)).collect();
        let filter = BloomFilter::build(&keys, 0.01).unwrap();

        let decoded = BloomFilter::decode(&filter.encode().unwrap()).unwrap();
        assert_eq!(decoded.items(), 3);
        for key in &keys {
            assert!(decoded.may_contain(key));
        }
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let keys: Vec<Key> = (0..2_000).map(Key::Int).collect();
        let filter = BloomFilter::build(&keys, 0.01).unwrap();

        let false_positives = (1_000_000..1_010_000)
            .map(Key::Int)
            .filter(|k| filter.may_contain(k))
            .count();
        // 1% target over 10k probes; allow generous slack
        assert!(false_positives < 500, "too many false positives: {}", false_positives);
    }
}
