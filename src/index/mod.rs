//! Index Module
//!
//! Per-block primary-key indexes and the duplicate-key protocol.
//!
//! ## Two-stage dedup
//! ```text
//!   key ──► ZoneMap [min, max] ──outside──► not a duplicate (bloom untouched)
//!                 │
//!               inside
//!                 ▼
//!           BloomFilter ──absent──► not a duplicate
//!                 │
//!            may contain
//!                 ▼
//!          PossibleDuplicate
//! ```
//!
//! ## Slot Payload Format
//! ```text
//! ┌──────────┬───────────┬──────────────────────────┐
//! │Magic (4) │ CRC32 (4) │ bincode payload          │
//! └──────────┴───────────┴──────────────────────────┘
//! ```
//! Magic is `PZMP` (zone map), `PBLM` (bloom filter) or `PIDX` (metadata).
//!
//! ## Variants
//! Both variants implement [`BlockIndex`]. [`MutableIndex`] backs an
//! appendable block and supports every call; [`ImmutableIndex`] backs a
//! sealed block and answers only dedup queries, returning
//! [`PillarError::Unsupported`] for everything else.

mod bloom;
mod codec;
mod immutable;
mod meta;
mod mutable;
mod zonemap;

pub use bloom::{BloomFilter, BloomReader, BloomWriter};
pub use immutable::ImmutableIndex;
pub use meta::{IndexMeta, IndexType, IndicesMeta};
pub use mutable::MutableIndex;
pub use zonemap::{ZoneMap, ZoneMapReader, ZoneMapWriter};

use roaring::RoaringBitmap;
use thiserror::Error;

use crate::error::{PillarError, Result};
use crate::key::Key;
use crate::store::BlockStore;

/// Errors raised while decoding or probing an index slot
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("blob too short: {0} bytes")]
    Truncated(usize),

    #[error("bad magic: expected {expected:?}, got {actual:?}")]
    BadMagic { expected: [u8; 4], actual: [u8; 4] },

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    Checksum { expected: u32, actual: u32 },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("bloom filter: {0}")]
    Filter(String),

    #[error("slot read failed: {0}")]
    Io(String),
}

/// Map a reader-level error into the storage error domain
pub fn translate_error(err: IndexError) -> PillarError {
    PillarError::IndexRead(err.to_string())
}

/// Capability-restricted index over one block's primary keys
pub trait BlockIndex: Send + Sync {
    /// Short name used in error messages
    fn kind(&self) -> &'static str;

    fn is_mutable(&self) -> bool;

    /// `Ok(())` if `key` is certainly new, `Err(PossibleDuplicate)` otherwise
    fn dedup(&self, key: &Key) -> Result<()>;

    /// `Ok(())` if every key outside `excluded` is certainly new, else
    /// `Err(PossibleDuplicates(positions))`
    fn batch_dedup(&self, keys: &[Key], excluded: Option<&RoaringBitmap>) -> Result<()>;

    fn insert(&self, key: Key, row: u32) -> Result<()>;

    fn delete(&self, key: &Key) -> Result<()>;

    fn get_active_row(&self, key: &Key) -> Result<u32>;

    /// Insert or overwrite `keys[i]` at row `start_row + i`
    fn batch_upsert(&self, keys: &[Key], start_row: u32) -> Result<()>;

    /// Persist this index as the block's zone map, bloom filter and metadata
    fn write_to(&self, block: &BlockStore) -> Result<()>;

    fn destroy(&self) -> Result<()>;
}
