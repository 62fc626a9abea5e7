//! Zone Map
//!
//! The `[min, max]` range of a block's primary keys. A key outside the range
//! is certainly absent from the block; a key inside may or may not be there.

use std::sync::OnceLock;

use bytes::Bytes;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::common::Id;
use crate::error::{PillarError, Result};
use crate::fs::FileRef;
use crate::key::Key;

use super::codec::{decode_blob, encode_blob};
use super::{IndexError, IndexMeta, IndexType};

const ZONE_MAP_MAGIC: &[u8; 4] = b"PZMP";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneMap {
    bounds: Option<(Key, Key)>,
}

impl ZoneMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(keys: &[Key]) -> Self {
        let mut zone_map = Self::new();
        for key in keys {
            zone_map.update(key);
        }
        zone_map
    }

    /// Widen the range to include `key`
    pub fn update(&mut self, key: &Key) {
        match &mut self.bounds {
            None => self.bounds = Some((key.clone(), key.clone())),
            Some((min, max)) => {
                if key < min {
                    *min = key.clone();
                }
                if key > max {
                    *max = key.clone();
                }
            }
        }
    }

    pub fn min(&self) -> Option<&Key> {
        self.bounds.as_ref().map(|(min, _)| min)
    }

    pub fn max(&self) -> Option<&Key> {
        self.bounds.as_ref().map(|(_, max)| max)
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    /// An empty zone map contains nothing
    pub fn contains(&self, key: &Key) -> bool {
        match &self.bounds {
            Some((min, max)) => key >= min && key <= max,
            None => false,
        }
    }

    /// Positions of `keys` inside the range, skipping positions in `excluded`
    pub fn contains_any(&self, keys: &[Key], excluded: Option<&RoaringBitmap>) -> RoaringBitmap {
        let mut selection = RoaringBitmap::new();
        for (pos, key) in keys.iter().enumerate() {
            let pos = pos as u32;
            if excluded.map_or(false, |mask| mask.contains(pos)) {
                continue;
            }
            if self.contains(key) {
                selection.insert(pos);
            }
        }
        selection
    }

    pub fn encode(&self) -> std::result::Result<Bytes, IndexError> {
        encode_blob(ZONE_MAP_MAGIC, self)
    }

    pub fn decode(data: &[u8]) -> std::result::Result<Self, IndexError> {
        decode_blob(ZONE_MAP_MAGIC, data)
    }
}

// =============================================================================
// Writer
// =============================================================================

/// Accumulates keys and writes the zone map into an index slot
pub struct ZoneMapWriter {
    file: FileRef,
    column: u16,
    slot: u16,
    zone_map: ZoneMap,
}

impl ZoneMapWriter {
    pub fn new(file: FileRef, column: u16, slot: u16) -> Self {
        Self {
            file,
            column,
            slot,
            zone_map: ZoneMap::new(),
        }
    }

    pub fn add_values(&mut self, keys: &[Key]) {
        for key in keys {
            self.zone_map.update(key);
        }
    }

    /// Write the slot and describe what was written
    pub fn finalize(self) -> Result<IndexMeta> {
        let buf = self
            .zone_map
            .encode()
            .map_err(|e| PillarError::Serialization(e.to_string()))?;
        self.file.write(&buf)?;
        Ok(IndexMeta::new(IndexType::ZoneMap, self.column, self.slot))
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Lazily decodes a zone map slot on first probe
pub struct ZoneMapReader {
    id: Id,
    file: FileRef,
    cache: OnceLock<ZoneMap>,
}

impl ZoneMapReader {
    pub fn new(id: Id, file: FileRef) -> Self {
        Self {
            id,
            file,
            cache: OnceLock::new(),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    fn load(&self) -> std::result::Result<&ZoneMap, IndexError> {
        if let Some(zone_map) = self.cache.get() {
            return Ok(zone_map);
        }
        let buf = self
            .file
            .read_all()
            .map_err(|e| IndexError::Io(format!("{}: {}", self.id, e)))?;
        let zone_map = ZoneMap::decode(&buf)?;
        Ok(self.cache.get_or_init(|| zone_map))
    }

    pub fn contains(&self, key: &Key) -> std::result::Result<bool, IndexError> {
        Ok(self.load()?.contains(key))
    }

    pub fn contains_any(
        &self,
        keys: &[Key],
        excluded: Option<&RoaringBitmap>,
    ) -> std::result::Result<RoaringBitmap, IndexError> {
        Ok(self.load()?.contains_any(keys, excluded))
    }
}
