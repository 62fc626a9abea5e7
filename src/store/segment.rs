//! Segment Store
//!
//! Aggregates the [`BlockStore`]s of one segment and owns its raw segment.
//!
//! ## Concurrency:
//! - `blocks`: Protected by RwLock. Creation, removal and replay population
//!   take the exclusive lock; destroy snapshots the map under the shared lock
//!   and releases it before destroying blocks.
//! - `refs`: the last `unref` runs `destroy`, exactly once.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::common::{Id, RefCount};
use crate::error::{PillarError, Result};
use crate::fs::{classify, FileKind, RawFile, RawSegment};
use crate::schema::Schema;

use super::BlockStore;

/// What a replay found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Files listed by the raw segment
    pub files: usize,
    pub data_files: usize,
    /// Index slot, update-log and metadata files
    pub aux_files: usize,
    /// Names outside the grammar, or pointing outside the schema
    pub skipped: usize,
    pub blocks: usize,
}

pub struct SegmentStore {
    id: Id,
    name: String,
    ts: AtomicU64,
    blocks: RwLock<HashMap<u64, Arc<BlockStore>>>,
    raw: Arc<RawSegment>,
    refs: RefCount,
    live: AtomicBool,
    /// Set by `open`, cleared by the first `replay`
    awaiting_replay: AtomicBool,
    me: Weak<SegmentStore>,
}

impl SegmentStore {
    /// Initialize and mount a new raw segment in `dir`
    pub fn create(dir: &Path, name: &str, id: u64, sync_on_write: bool) -> Result<Arc<Self>> {
        let raw = RawSegment::init(dir, name, sync_on_write)?;
        raw.mount();
        tracing::info!(segment = id, name, "created segment");
        Ok(Self::from_raw(raw, name, id, false))
    }

    /// Open an existing raw segment; call [`Self::replay`] to populate blocks
    pub fn open(dir: &Path, name: &str, id: u64, sync_on_write: bool) -> Result<Arc<Self>> {
        let raw = RawSegment::open(dir, name, sync_on_write)?;
        tracing::info!(segment = id, name, "opened segment for replay");
        Ok(Self::from_raw(raw, name, id, true))
    }

    fn from_raw(raw: RawSegment, name: &str, id: u64, awaiting_replay: bool) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: Id::segment(id),
            name: name.to_string(),
            ts: AtomicU64::new(0),
            blocks: RwLock::new(HashMap::new()),
            raw: Arc::new(raw),
            refs: RefCount::new(),
            live: AtomicBool::new(true),
            awaiting_replay: AtomicBool::new(awaiting_replay),
            me: me.clone(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id.segment_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        self.raw.dir()
    }

    pub fn raw(&self) -> &Arc<RawSegment> {
        &self.raw
    }

    pub fn write_ts(&self, ts: u64) {
        self.ts.store(ts, Ordering::Release);
    }

    pub fn read_ts(&self) -> u64 {
        self.ts.load(Ordering::Acquire)
    }

    // =========================================================================
    // Replay
    // =========================================================================

    /// Rebuild the block/column map from the raw segment's file names.
    ///
    /// Data versions are attached base-first, then in timestamp order, so the
    /// active version after replay is the newest one. Unrecognized names are
    /// skipped; a corrupt index-metadata blob, or one naming an index slot
    /// with no file behind it, fails the whole replay.
    ///
    /// Runs once, on a segment from [`Self::open`] that has no blocks yet.
    pub fn replay(&self, schema: &Arc<Schema>) -> Result<ReplayStats> {
        self.ensure_live()?;
        if !self.awaiting_replay.swap(false, Ordering::AcqRel) {
            return Err(PillarError::InvalidParameter(format!(
                "segment {} is not awaiting replay",
                self.id()
            )));
        }
        if !self.blocks.read().is_empty() {
            return Err(PillarError::InvalidParameter(format!(
                "segment {} already has blocks",
                self.id()
            )));
        }
        let files = self.raw.replay()?;
        let mut stats = ReplayStats {
            files,
            ..Default::default()
        };

        let mut entries: Vec<(FileKind, Arc<RawFile>)> = Vec::with_capacity(files);
        for (name, file) in self.raw.nodes() {
            match classify(&name) {
                Some(kind) => entries.push((kind, file)),
                None => {
                    tracing::warn!(segment = self.id(), name = %name, "skipping unrecognized file");
                    stats.skipped += 1;
                }
            }
        }
        entries.sort_by_key(|(kind, _)| replay_order(kind));

        let mut blocks = self.blocks.write();
        for (kind, file) in entries {
            if self.attach(&mut blocks, schema, kind, file).is_err() {
                tracing::warn!(segment = self.id(), ?kind, "skipping file outside schema");
                stats.skipped += 1;
                continue;
            }
            match kind {
                FileKind::Data { .. } => stats.data_files += 1,
                _ => stats.aux_files += 1,
            }
        }
        stats.blocks = blocks.len();

        let sealed: Vec<Arc<BlockStore>> = blocks
            .values()
            .filter(|b| b.has_index_meta())
            .cloned()
            .collect();
        drop(blocks);

        for block in sealed {
            self.check_sealed(&block)?;
        }

        tracing::info!(
            segment = self.id(),
            files = stats.files,
            blocks = stats.blocks,
            skipped = stats.skipped,
            "replayed segment"
        );
        Ok(stats)
    }

    /// The metadata blob decodes and every slot it names was replayed
    fn check_sealed(&self, block: &BlockStore) -> Result<()> {
        let corrupt = |reason: String| {
            PillarError::ReplayCorruption(format!(
                "segment {} block {}: {}",
                self.id(),
                block.id(),
                reason
            ))
        };

        let metas = block.load_index_meta().map_err(|e| corrupt(e.to_string()))?;
        for meta in metas.iter() {
            let present = block
                .open_column(meta.column as usize)
                .map(|column| column.has_index(meta.slot as usize))
                .unwrap_or(false);
            if !present {
                return Err(corrupt(format!(
                    "missing index file for column {} slot {}",
                    meta.column, meta.slot
                )));
            }
        }
        Ok(())
    }

    fn attach(
        &self,
        blocks: &mut HashMap<u64, Arc<BlockStore>>,
        schema: &Arc<Schema>,
        kind: FileKind,
        file: Arc<RawFile>,
    ) -> Result<()> {
        match kind {
            FileKind::Data { column, block, ts } => {
                self.replay_block(blocks, block, schema)
                    .open_column(column)?
                    .attach_data(file, ts);
            }
            FileKind::Index {
                column,
                block,
                slot,
            } => {
                self.replay_block(blocks, block, schema)
                    .open_column(column)?
                    .attach_index(slot, file)?;
            }
            FileKind::Updates { column, block } => {
                self.replay_block(blocks, block, schema)
                    .open_column(column)?
                    .attach_updates(file);
            }
            FileKind::IndexMeta { block } => {
                self.replay_block(blocks, block, schema).attach_index_meta(file);
            }
        }
        Ok(())
    }

    fn replay_block(
        &self,
        blocks: &mut HashMap<u64, Arc<BlockStore>>,
        id: u64,
        schema: &Arc<Schema>,
    ) -> Arc<BlockStore> {
        let block = blocks.entry(id).or_insert_with(|| {
            Arc::new(BlockStore::replay(
                id,
                self.id(),
                self.me.clone(),
                Arc::clone(&self.raw),
                Arc::clone(schema),
            ))
        });
        Arc::clone(block)
    }

    // =========================================================================
    // Blocks
    // =========================================================================

    /// Get the block for `id`, creating it (with base files) if absent
    pub fn open_block(&self, id: u64, schema: &Arc<Schema>) -> Result<Arc<BlockStore>> {
        self.ensure_live()?;
        let mut blocks = self.blocks.write();
        if let Some(block) = blocks.get(&id) {
            return Ok(Arc::clone(block));
        }

        let block = Arc::new(BlockStore::new(
            id,
            self.id(),
            self.me.clone(),
            Arc::clone(&self.raw),
            Arc::clone(schema),
        )?);
        blocks.insert(id, Arc::clone(&block));
        Ok(block)
    }

    pub fn block(&self, id: u64) -> Result<Arc<BlockStore>> {
        self.ensure_live()?;
        self.blocks
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| PillarError::NotFound(format!("block {} in segment {}", id, self.id())))
    }

    /// Drop the map entry only; the block's files stay where they are
    pub fn remove_block(&self, id: u64) -> Option<Arc<BlockStore>> {
        self.blocks.write().remove(&id)
    }

    /// Sorted block ids
    pub fn block_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.blocks.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    /// Snapshot of every block
    pub fn blocks(&self) -> Vec<Arc<BlockStore>> {
        let mut blocks: Vec<Arc<BlockStore>> = self.blocks.read().values().cloned().collect();
        blocks.sort_by_key(|b| b.id());
        blocks
    }

    pub fn sync(&self) -> Result<()> {
        self.ensure_live()?;
        self.raw.sync()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn ref_(&self) -> Result<usize> {
        self.refs.acquire()
    }

    /// Drop a reference; the last one destroys the segment
    pub fn unref(&self) -> Result<bool> {
        let zero = self.refs.release()?;
        if zero {
            self.destroy()?;
        }
        Ok(zero)
    }

    pub fn ref_count(&self) -> usize {
        self.refs.count()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Destroy every block, then unmount and delete the raw segment
    pub fn destroy(&self) -> Result<()> {
        if !self.live.swap(false, Ordering::AcqRel) {
            return Err(PillarError::Destroyed(format!("segment {}", self.id())));
        }
        tracing::info!(segment = self.id(), name = %self.name, "destroying segment");

        let blocks: Vec<Arc<BlockStore>> = self.blocks.read().values().cloned().collect();
        for block in blocks {
            if !block.is_destroyed() {
                block.destroy()?;
            }
        }
        self.blocks.write().clear();

        self.raw.unmount();
        self.raw.destroy()
    }

    /// Sync and unmount, dropping in-memory state but keeping every file
    pub fn close(&self) -> Result<()> {
        if !self.live.swap(false, Ordering::AcqRel) {
            return Err(PillarError::Destroyed(format!("segment {}", self.id())));
        }
        self.raw.sync()?;
        self.raw.unmount();
        self.blocks.write().clear();
        tracing::info!(segment = self.id(), name = %self.name, "closed segment");
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if !self.is_live() {
            return Err(PillarError::Destroyed(format!("segment {}", self.id())));
        }
        Ok(())
    }
}

/// Sort key for replay: per block and column, data base first then versions
/// by timestamp, then index slots, update log, and the block metadata last.
fn replay_order(kind: &FileKind) -> (u64, usize, u8, Option<u64>) {
    match *kind {
        FileKind::Data { column, block, ts } => (block, column, 0, ts),
        FileKind::Index {
            column,
            block,
            slot,
        } => (block, column, 1, Some(slot as u64)),
        FileKind::Updates { column, block } => (block, column, 2, None),
        FileKind::IndexMeta { block } => (block, usize::MAX, 3, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_order_puts_base_first() {
        let base = FileKind::Data {
            column: 0,
            block: 1,
            ts: None,
        };
        let v1 = FileKind::Data {
            column: 0,
            block: 1,
            ts: Some(5),
        };
        let v2 = FileKind::Data {
            column: 0,
            block: 1,
            ts: Some(10),
        };
        let mut kinds = vec![v2, base, v1];
        kinds.sort_by_key(replay_order);
        assert_eq!(kinds, vec![base, v1, v2]);
    }
}
