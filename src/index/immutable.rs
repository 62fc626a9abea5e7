//! Immutable block index
//!
//! Reconstructed from a sealed block's metadata blob. Answers dedup queries
//! through the zone map first and the bloom filter second; every mutation
//! is rejected.

use std::sync::atomic::{AtomicBool, Ordering};

use roaring::RoaringBitmap;

use crate::common::Id;
use crate::error::{PillarError, Result};
use crate::key::Key;
use crate::store::BlockStore;

use super::{translate_error, BlockIndex, BloomReader, IndexType, ZoneMapReader};

const KIND: &str = "immutable";

pub struct ImmutableIndex {
    id: Id,
    zone_map: ZoneMapReader,
    bloom: BloomReader,
    destroyed: AtomicBool,
}

impl ImmutableIndex {
    /// Load the metadata blob and open a reader for every descriptor.
    ///
    /// Both a zone map and a bloom filter must be present; an index kind this
    /// build does not know fails with [`PillarError::IndexRead`].
    pub fn read_from(block: &BlockStore) -> Result<Self> {
        let metas = block.load_index_meta()?;
        let (id, _) = block.meta();

        let mut zone_map = None;
        let mut bloom = None;
        for meta in metas.iter() {
            let file = block
                .open_column(meta.column as usize)
                .and_then(|column| column.open_index_file(meta.slot as usize))
                .map_err(|e| {
                    PillarError::IndexRead(format!(
                        "block {}: column {} slot {}: {}",
                        id, meta.column, meta.slot, e
                    ))
                })?;
            let reader_id = Id {
                column: meta.column,
                ..id
            }
            .with_index_slot(meta.slot as usize);

            match meta.index_type() {
                Some(IndexType::ZoneMap) => zone_map = Some(ZoneMapReader::new(reader_id, file)),
                Some(IndexType::BloomFilter) => bloom = Some(BloomReader::new(reader_id, file)),
                None => {
                    return Err(PillarError::IndexRead(format!(
                        "block {}: unsupported index type {}",
                        id, meta.idx_type
                    )))
                }
            }
        }

        let zone_map = zone_map
            .ok_or_else(|| PillarError::IndexRead(format!("block {}: no zone map", id)))?;
        let bloom = bloom
            .ok_or_else(|| PillarError::IndexRead(format!("block {}: no bloom filter", id)))?;

        tracing::debug!(block = %id, indexes = metas.len(), "opened immutable index");
        Ok(Self {
            id,
            zone_map,
            bloom,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> Id {
        self.id
    }

    /// Keys probed against the bloom filter since this index was opened
    pub fn bloom_probes(&self) -> u64 {
        self.bloom.probes()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(PillarError::Destroyed(format!("index {}", self.id)));
        }
        Ok(())
    }

    fn unsupported(op: &'static str) -> PillarError {
        PillarError::Unsupported { kind: KIND, op }
    }
}

impl BlockIndex for ImmutableIndex {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn is_mutable(&self) -> bool {
        false
    }

    fn dedup(&self, key: &Key) -> Result<()> {
        self.ensure_live()?;
        if !self.zone_map.contains(key).map_err(translate_error)? {
            return Ok(());
        }
        if self.bloom.may_contain_key(key).map_err(translate_error)? {
            return Err(PillarError::PossibleDuplicate);
        }
        Ok(())
    }

    fn batch_dedup(&self, keys: &[Key], excluded: Option<&RoaringBitmap>) -> Result<()> {
        self.ensure_live()?;
        let selection = self
            .zone_map
            .contains_any(keys, excluded)
            .map_err(translate_error)?;
        if selection.is_empty() {
            return Ok(());
        }

        let matched = self
            .bloom
            .may_contain_any_keys(keys, &selection)
            .map_err(translate_error)?;
        if matched.is_empty() {
            return Ok(());
        }
        Err(PillarError::PossibleDuplicates(matched))
    }

    fn insert(&self, _key: Key, _row: u32) -> Result<()> {
        Err(Self::unsupported("insert"))
    }

    fn delete(&self, _key: &Key) -> Result<()> {
        Err(Self::unsupported("delete"))
    }

    fn get_active_row(&self, _key: &Key) -> Result<u32> {
        Err(Self::unsupported("get_active_row"))
    }

    fn batch_upsert(&self, _keys: &[Key], _start_row: u32) -> Result<()> {
        Err(Self::unsupported("batch_upsert"))
    }

    fn write_to(&self, _block: &BlockStore) -> Result<()> {
        Err(Self::unsupported("write_to"))
    }

    fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(PillarError::Destroyed(format!("index {}", self.id)));
        }
        Ok(())
    }
}
