//! Background Jobs
//!
//! Block sealing: materialize a block's primary-key indexes on disk.
//!
//! ## Write Order
//! ```text
//!   pk column slot 0 ◄── zone map
//!   pk column slot 1 ◄── bloom filter
//!   <block>.meta     ◄── metadata (last)
//! ```
//! Metadata is written only after both slots are complete, so a block whose
//! metadata exists always has readable indexes behind it.

use std::sync::Arc;

use crate::error::Result;
use crate::index::{BloomWriter, IndicesMeta, ZoneMapWriter};
use crate::key::Key;
use crate::store::BlockStore;

/// Slot of the primary-key column holding the zone map
pub const ZONE_MAP_SLOT: u16 = 0;

/// Slot of the primary-key column holding the bloom filter
pub const BLOOM_FILTER_SLOT: u16 = 1;

/// Build the zone map and bloom filter over `pk_values`, write both into the
/// primary-key column's index slots, then write the block's metadata blob.
pub fn build_and_flush_block_index(
    block: &BlockStore,
    pk_values: &[Key],
    fp_rate: f64,
) -> Result<IndicesMeta> {
    let (id, schema) = block.meta();
    let pk = schema.primary_key();
    let pk_column = block.open_column(pk)?;
    let mut metas = IndicesMeta::new();

    let zone_map_file = pk_column.create_index_file(ZONE_MAP_SLOT as usize)?;
    let zone_map_slot = Arc::clone(zone_map_file.file());
    let mut zone_map = ZoneMapWriter::new(zone_map_file, pk as u16, ZONE_MAP_SLOT);
    zone_map.add_values(pk_values);
    metas.add_index(zone_map.finalize()?);

    let bloom_file = pk_column.create_index_file(BLOOM_FILTER_SLOT as usize)?;
    let bloom_slot = Arc::clone(bloom_file.file());
    let mut bloom = BloomWriter::new(bloom_file, pk as u16, BLOOM_FILTER_SLOT, fp_rate);
    bloom.add_values(pk_values);
    metas.add_index(bloom.finalize()?);

    let blob = metas.marshal()?;
    block.write_index_meta(&blob)?;

    tracing::debug!(
        block = %id,
        keys = pk_values.len(),
        zone_map_bytes = zone_map_slot.size(),
        bloom_bytes = bloom_slot.size(),
        meta_bytes = blob.len(),
        "flushed block index"
    );
    Ok(metas)
}
