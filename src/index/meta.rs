//! Index metadata
//!
//! The per-block record of which index lives in which slot of which column.
//! Written last by the builder job and read first by [`super::ImmutableIndex`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{PillarError, Result};

use super::codec::{decode_blob, encode_blob};
use super::translate_error;

const INDICES_META_MAGIC: &[u8; 4] = b"PIDX";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    ZoneMap,
    BloomFilter,
}

impl IndexType {
    pub fn code(self) -> u8 {
        match self {
            IndexType::ZoneMap => 0,
            IndexType::BloomFilter => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(IndexType::ZoneMap),
            1 => Some(IndexType::BloomFilter),
            _ => None,
        }
    }
}

/// One descriptor: {kind, target column, slot}
///
/// The kind is stored as its raw code so that blobs written by a newer
/// engine still decode; readers reject kinds they do not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub idx_type: u8,
    pub column: u16,
    pub slot: u16,
}

impl IndexMeta {
    pub fn new(idx_type: IndexType, column: u16, slot: u16) -> Self {
        Self {
            idx_type: idx_type.code(),
            column,
            slot,
        }
    }

    pub fn index_type(&self) -> Option<IndexType> {
        IndexType::from_code(self.idx_type)
    }
}

/// Ordered descriptors for one block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicesMeta {
    pub metas: Vec<IndexMeta>,
}

impl IndicesMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_index(&mut self, meta: IndexMeta) {
        self.metas.push(meta);
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexMeta> {
        self.metas.iter()
    }

    pub fn marshal(&self) -> Result<Bytes> {
        encode_blob(INDICES_META_MAGIC, self).map_err(|e| PillarError::Serialization(e.to_string()))
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        decode_blob(INDICES_META_MAGIC, data).map_err(translate_error)
    }
}
