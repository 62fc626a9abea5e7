//! Mutable block index
//!
//! Exact key-to-row map for a block that is still being appended to. A
//! running zone map is kept alongside so range rejection behaves the same
//! as on a sealed block. `write_to` seals it into on-disk indexes.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use roaring::RoaringBitmap;

use crate::config::DEFAULT_BLOOM_FP_RATE;
use crate::error::{PillarError, Result};
use crate::jobs::build_and_flush_block_index;
use crate::key::Key;
use crate::store::BlockStore;

use super::{BlockIndex, ZoneMap};

pub struct MutableIndex {
    rows: RwLock<BTreeMap<Key, u32>>,
    /// Widened on insert; never shrunk by delete
    zone_map: RwLock<ZoneMap>,
    fp_rate: f64,
}

impl MutableIndex {
    pub fn new(fp_rate: f64) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            zone_map: RwLock::new(ZoneMap::new()),
            fp_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Keys in ascending order
    pub fn keys(&self) -> Vec<Key> {
        self.rows.read().keys().cloned().collect()
    }
}

impl Default for MutableIndex {
    fn default() -> Self {
        Self::new(DEFAULT_BLOOM_FP_RATE)
    }
}

impl BlockIndex for MutableIndex {
    fn kind(&self) -> &'static str {
        "mutable"
    }

    fn is_mutable(&self) -> bool {
        true
    }

    fn dedup(&self, key: &Key) -> Result<()> {
        if !self.zone_map.read().contains(key) {
            return Ok(());
        }
        if self.rows.read().contains_key(key) {
            return Err(PillarError::PossibleDuplicate);
        }
        Ok(())
    }

    fn batch_dedup(&self, keys: &[Key], excluded: Option<&RoaringBitmap>) -> Result<()> {
        let selection = self.zone_map.read().contains_any(keys, excluded);
        if selection.is_empty() {
            return Ok(());
        }

        let rows = self.rows.read();
        let matched: RoaringBitmap = selection
            .iter()
            .filter(|pos| rows.contains_key(&keys[*pos as usize]))
            .collect();
        if matched.is_empty() {
            return Ok(());
        }
        Err(PillarError::PossibleDuplicates(matched))
    }

    fn insert(&self, key: Key, row: u32) -> Result<()> {
        let mut rows = self.rows.write();
        if rows.contains_key(&key) {
            return Err(PillarError::Duplicate);
        }
        self.zone_map.write().update(&key);
        rows.insert(key, row);
        Ok(())
    }

    fn delete(&self, key: &Key) -> Result<()> {
        match self.rows.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(PillarError::KeyNotFound),
        }
    }

    fn get_active_row(&self, key: &Key) -> Result<u32> {
        self.rows
            .read()
            .get(key)
            .copied()
            .ok_or(PillarError::KeyNotFound)
    }

    /// Rows are `start_row + position`; a batch whose last row does not fit
    /// in `u32` is rejected before anything is written.
    fn batch_upsert(&self, keys: &[Key], start_row: u32) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        u32::try_from(keys.len() - 1)
            .ok()
            .and_then(|last| start_row.checked_add(last))
            .ok_or_else(|| {
                PillarError::InvalidParameter(format!(
                    "{} rows starting at {} overflow the row id space",
                    keys.len(),
                    start_row
                ))
            })?;

        let mut rows = self.rows.write();
        let mut zone_map = self.zone_map.write();
        for (offset, key) in keys.iter().enumerate() {
            zone_map.update(key);
            rows.insert(key.clone(), start_row + offset as u32);
        }
        Ok(())
    }

    fn write_to(&self, block: &BlockStore) -> Result<()> {
        let keys = self.keys();
        build_and_flush_block_index(block, &keys, self.fp_rate)?;
        Ok(())
    }

    fn destroy(&self) -> Result<()> {
        self.rows.write().clear();
        *self.zone_map.write() = ZoneMap::new();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let index = MutableIndex::default();
        index.insert(Key::Int(7), 0).unwrap();
        index.insert(Key::Int(3), 1).unwrap();

        assert_eq!(index.get_active_row(&Key::Int(3)).unwrap(), 1);
        assert!(matches!(
            index.insert(Key::Int(7), 5),
            Err(PillarError::Duplicate)
        ));
        assert!(matches!(
            index.get_active_row(&Key::Int(4)),
            Err(PillarError::KeyNotFound)
        ));
    }

    #[test]
    fn test_dedup_is_exact() {
        let index = MutableIndex::default();
        index.batch_upsert(&[Key::Int(1), Key::Int(5), Key::Int(10)], 0).unwrap();

        assert!(index.dedup(&Key::Int(6)).is_ok());
        assert!(index.dedup(&Key::Int(5)).unwrap_err().is_possible_duplicate());
        assert!(index.dedup(&Key::Int(100)).is_ok());
    }

    #[test]
    fn test_upsert_overwrites_row() {
        let index = MutableIndex::default();
        index.insert(Key::Int(1), 0).unwrap();
        index.batch_upsert(&[Key::Int(1), Key::Int(2)], 10).unwrap();

        assert_eq!(index.get_active_row(&Key::Int(1)).unwrap(), 10);
        assert_eq!(index.get_active_row(&Key::Int(2)).unwrap(), 11);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_upsert_rejects_row_overflow() {
        let index = MutableIndex::default();
        index.insert(Key::Int(9), 3).unwrap();

        assert!(matches!(
            index.batch_upsert(&[Key::Int(1), Key::Int(2)], u32::MAX),
            Err(PillarError::InvalidParameter(_))
        ));
        assert_eq!(index.keys(), vec![Key::Int(9)]);
        assert!(index.dedup(&Key::Int(1)).is_ok());

        index.batch_upsert(&[Key::Int(1)], u32::MAX).unwrap();
        assert_eq!(index.get_active_row(&Key::Int(1)).unwrap(), u32::MAX);
    }

    #[test]
    fn test_delete() {
        let index = MutableIndex::default();
        index.insert(Key::Int(1), 0).unwrap();
        index.delete(&Key::Int(1)).unwrap();

        assert!(index.is_empty());
        assert!(index.dedup(&Key::Int(1)).is_ok());
        assert!(matches!(
            index.delete(&Key::Int(1)),
            Err(PillarError::KeyNotFound)
        ));
    }

    #[test]
    fn test_batch_dedup_reports_positions() {
        let index = MutableIndex::default();
        index.batch_upsert(&[Key::Int(1), Key::Int(5)], 0).unwrap();

        let probe = [Key::Int(5), Key::Int(2), Key::Int(1)];
        match index.batch_dedup(&probe, None) {
            Err(PillarError::PossibleDuplicates(mask)) => {
                assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 2]);
            }
            other => panic!("expected duplicates, got {:?}", other),
        }

        let mut excluded = RoaringBitmap::new();
        excluded.insert(0);
        excluded.insert(2);
        assert!(index.batch_dedup(&probe, Some(&excluded)).is_ok());
    }
}
