//! Engine Module
//!
//! One table's storage root: the schema, the config, and every open segment.
//!
//! ## Responsibilities
//! - Discover and replay persisted segments on startup
//! - Allocate segment ids and create new segments
//! - Seal blocks by building their primary-key indexes
//! - Answer dedup queries across every sealed block

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use roaring::RoaringBitmap;

use crate::config::Config;
use crate::error::{PillarError, Result};
use crate::index::{BlockIndex, ImmutableIndex, IndicesMeta};
use crate::jobs::build_and_flush_block_index;
use crate::key::Key;
use crate::schema::Schema;
use crate::store::{BlockStore, CreateSegment, OpenSegment, SegmentFactory, SegmentStore};

/// The storage engine for one table
///
/// ## Concurrency Model
///
/// - **Segment creation / drop / sealing**: Serialized by `write_lock`
/// - **Dedup**: Concurrent; takes the `segments` and `indexes` read locks
///   only long enough to snapshot what it will probe
/// - Sealed-block indexes are cached with the seal generation they were read
///   at, and re-read when the block is sealed again
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Column layout shared by every block
    schema: Arc<Schema>,

    /// Open segments by id
    segments: RwLock<BTreeMap<u64, Arc<SegmentStore>>>,

    /// Immutable indexes of sealed blocks, keyed by (segment, block), with
    /// the seal generation each was read at
    indexes: RwLock<HashMap<(u64, u64), CachedIndex>>,

    next_segment_id: AtomicU64,

    /// Used for every new segment
    create_factory: Box<dyn SegmentFactory>,

    /// Serializes create/drop/seal
    write_lock: Mutex<()>,
}

impl Engine {
    const SEGMENT_PREFIX: &'static str = "seg_";

    /// Open or create an engine rooted at `config.data_dir`
    ///
    /// On startup:
    /// 1. Validate the config and create the data directory
    /// 2. Open and replay every `seg_<id>` directory
    /// 3. Continue id allocation after the highest id found
    pub fn open(config: Config, schema: Schema) -> Result<Self> {
        let schema = Arc::new(schema);
        let create = Box::new(CreateSegment {
            sync_on_write: config.sync_on_write,
        });
        let open = OpenSegment {
            schema: Arc::clone(&schema),
            sync_on_write: config.sync_on_write,
        };
        Self::with_factories(config, schema, create, &open)
    }

    /// Open with explicit segment factories
    pub fn with_factories(
        config: Config,
        schema: Arc<Schema>,
        create_factory: Box<dyn SegmentFactory>,
        open_factory: &dyn SegmentFactory,
    ) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let mut segments = BTreeMap::new();
        for id in Self::discover_segments(&config.data_dir)? {
            let name = Self::segment_name(id);
            let dir = config.data_dir.join(&name);
            let segment = open_factory.build(&dir, &name, id)?;
            segments.insert(id, segment);
        }

        let next_id = segments.keys().next_back().map_or(1, |max| max + 1);
        tracing::info!(
            data_dir = %config.data_dir.display(),
            segments = segments.len(),
            next_id,
            "engine opened"
        );

        Ok(Self {
            config,
            schema,
            segments: RwLock::new(segments),
            indexes: RwLock::new(HashMap::new()),
            next_segment_id: AtomicU64::new(next_id),
            create_factory,
            write_lock: Mutex::new(()),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path, schema: Schema) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config, schema)
    }

    fn discover_segments(data_dir: &Path) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = Self::parse_segment_id(&entry.path()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn parse_segment_id(path: &Path) -> Option<u64> {
        let name = path.file_name()?.to_string_lossy();
        let id_str = name.strip_prefix(Self::SEGMENT_PREFIX)?;
        id_str.parse().ok()
    }

    fn segment_name(id: u64) -> String {
        format!("{}{:06}", Self::SEGMENT_PREFIX, id)
    }

    // =========================================================================
    // Segments
    // =========================================================================

    /// Create a new, empty segment with the next free id
    pub fn create_segment(&self) -> Result<Arc<SegmentStore>> {
        let _write_guard = self.write_lock.lock();

        let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        let name = Self::segment_name(id);
        let dir = self.config.data_dir.join(&name);
        let segment = self.create_factory.build(&dir, &name, id)?;

        self.segments.write().insert(id, Arc::clone(&segment));
        Ok(segment)
    }

    pub fn segment(&self, id: u64) -> Result<Arc<SegmentStore>> {
        self.segments
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| PillarError::NotFound(format!("segment {}", id)))
    }

    /// Sorted segment ids
    pub fn segment_ids(&self) -> Vec<u64> {
        self.segments.read().keys().copied().collect()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.read().len()
    }

    /// Get or create block `block_id` in segment `segment_id`
    pub fn open_block(&self, segment_id: u64, block_id: u64) -> Result<Arc<BlockStore>> {
        self.segment(segment_id)?.open_block(block_id, &self.schema)
    }

    /// Drop the engine's reference to a segment; the last reference deletes
    /// its files.
    pub fn drop_segment(&self, id: u64) -> Result<()> {
        let _write_guard = self.write_lock.lock();

        let segment = self
            .segments
            .write()
            .remove(&id)
            .ok_or_else(|| PillarError::NotFound(format!("segment {}", id)))?;
        self.indexes.write().retain(|(seg, _), _| *seg != id);

        if segment.unref()? {
            tracing::info!(segment = id, "dropped segment");
        }
        Ok(())
    }

    // =========================================================================
    // Sealing
    // =========================================================================

    /// Build and persist the primary-key indexes of a block
    pub fn seal_block(
        &self,
        segment_id: u64,
        block_id: u64,
        pk_values: &[Key],
    ) -> Result<IndicesMeta> {
        let _write_guard = self.write_lock.lock();

        let block = self.open_block(segment_id, block_id)?;
        let metas =
            build_and_flush_block_index(&block, pk_values, self.config.bloom_false_positive_rate)?;

        self.load_index(segment_id, &block)?;
        Ok(metas)
    }

    /// The immutable index of a sealed block, opened on first use and
    /// re-opened whenever the block has been sealed since
    pub fn block_index(&self, segment_id: u64, block_id: u64) -> Result<Arc<ImmutableIndex>> {
        let block = self.segment(segment_id)?.block(block_id)?;
        self.index_for(segment_id, &block)
    }

    fn index_for(&self, segment_id: u64, block: &BlockStore) -> Result<Arc<ImmutableIndex>> {
        let generation = block.seal_generation();
        if let Some(cached) = self.indexes.read().get(&(segment_id, block.id())) {
            if cached.generation == generation {
                return Ok(Arc::clone(&cached.index));
            }
        }
        self.load_index(segment_id, block)
    }

    fn load_index(&self, segment_id: u64, block: &BlockStore) -> Result<Arc<ImmutableIndex>> {
        // read the generation first; a seal racing the read leaves a stale
        // generation behind and the next lookup re-reads
        let generation = block.seal_generation();
        let index = Arc::new(ImmutableIndex::read_from(block)?);

        let mut indexes = self.indexes.write();
        let entry = indexes
            .entry((segment_id, block.id()))
            .or_insert_with(|| CachedIndex {
                generation,
                index: Arc::clone(&index),
            });
        if entry.generation < generation {
            entry.generation = generation;
            entry.index = Arc::clone(&index);
        }
        tracing::debug!(segment = segment_id, block = block.id(), generation, "cached block index");
        Ok(index)
    }

    fn sealed_indexes(&self) -> Result<Vec<Arc<ImmutableIndex>>> {
        let segments: Vec<Arc<SegmentStore>> = self.segments.read().values().cloned().collect();

        let mut indexes = Vec::new();
        for segment in segments {
            for block in segment.blocks() {
                if block.has_index_meta() {
                    indexes.push(self.index_for(segment.id(), &block)?);
                }
            }
        }
        Ok(indexes)
    }

    // =========================================================================
    // Dedup
    // =========================================================================

    /// `Ok(())` if `key` is certainly absent from every sealed block
    pub fn dedup(&self, key: &Key) -> Result<()> {
        for index in self.sealed_indexes()? {
            index.dedup(key)?;
        }
        Ok(())
    }

    /// `Ok(())` if every key is certainly absent from every sealed block;
    /// otherwise `Err(PossibleDuplicates)` with the union of flagged positions.
    ///
    /// Positions flagged by one block are not probed again in later blocks.
    pub fn batch_dedup(&self, keys: &[Key]) -> Result<()> {
        let mut flagged = RoaringBitmap::new();
        for index in self.sealed_indexes()? {
            match index.batch_dedup(keys, Some(&flagged)) {
                Ok(()) => {}
                Err(PillarError::PossibleDuplicates(mask)) => flagged |= mask,
                Err(e) => return Err(e),
            }
        }

        if flagged.is_empty() {
            Ok(())
        } else {
            Err(PillarError::PossibleDuplicates(flagged))
        }
    }

    /// Close the engine gracefully
    ///
    /// Syncs and closes every segment; files stay on disk for the next open
    pub fn close(self) -> Result<()> {
        let _write_guard = self.write_lock.lock();

        self.indexes.write().clear();
        let segments = std::mem::take(&mut *self.segments.write());
        for (id, segment) in segments {
            segment.close()?;
            tracing::debug!(segment = id, "closed segment");
        }
        tracing::info!(data_dir = %self.config.data_dir.display(), "engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Directory of a segment, whether or not it is open
    pub fn segment_dir(&self, id: u64) -> PathBuf {
        self.config.data_dir.join(Self::segment_name(id))
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

struct CachedIndex {
    generation: u64,
    index: Arc<ImmutableIndex>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_segment_id() {
        assert_eq!(Engine::parse_segment_id(Path::new("/d/seg_000042")), Some(42));
        assert_eq!(Engine::parse_segment_id(Path::new("/d/seg_x")), None);
        assert_eq!(Engine::parse_segment_id(Path::new("/d/other")), None);
        assert_eq!(Engine::segment_name(7), "seg_000007");
    }
}
