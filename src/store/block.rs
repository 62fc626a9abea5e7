//! Block Store
//!
//! One [`ColumnStore`] per schema column for a single block id, plus the
//! block's persisted index metadata.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::common::{Id, RefCount};
use crate::error::{PillarError, Result};
use crate::fs::{index_meta_file_name, RawFile, RawSegment};
use crate::index::IndicesMeta;
use crate::schema::Schema;

use super::{ColumnStore, SegmentStore};

pub struct BlockStore {
    id: Id,
    ts: AtomicU64,

    /// Fixed at construction: one entry per schema column
    columns: Vec<ColumnStore>,

    /// Back-reference to the owning segment
    segment: Weak<SegmentStore>,
    raw: Arc<RawSegment>,
    schema: Arc<Schema>,

    index_meta: Mutex<Option<Arc<RawFile>>>,
    /// Bumped by every `write_index_meta`
    seal_generation: AtomicU64,

    refs: RefCount,
    destroyed: AtomicBool,
}

impl BlockStore {
    /// Ingestion path: every column gets its base data file
    pub(crate) fn new(
        id: u64,
        segment_id: u64,
        segment: Weak<SegmentStore>,
        raw: Arc<RawSegment>,
        schema: Arc<Schema>,
    ) -> Result<Self> {
        let columns = (0..schema.column_count())
            .map(|col| {
                ColumnStore::new(
                    Arc::clone(&raw),
                    segment_id,
                    id,
                    col,
                    schema.index_slots(col),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::from_columns(id, segment_id, segment, raw, schema, columns))
    }

    /// Replay path: columns start without data files
    pub(crate) fn replay(
        id: u64,
        segment_id: u64,
        segment: Weak<SegmentStore>,
        raw: Arc<RawSegment>,
        schema: Arc<Schema>,
    ) -> Self {
        let columns = (0..schema.column_count())
            .map(|col| {
                ColumnStore::replay(
                    Arc::clone(&raw),
                    segment_id,
                    id,
                    col,
                    schema.index_slots(col),
                )
            })
            .collect();

        Self::from_columns(id, segment_id, segment, raw, schema, columns)
    }

    fn from_columns(
        id: u64,
        segment_id: u64,
        segment: Weak<SegmentStore>,
        raw: Arc<RawSegment>,
        schema: Arc<Schema>,
        columns: Vec<ColumnStore>,
    ) -> Self {
        Self {
            id: Id::block(segment_id, id),
            ts: AtomicU64::new(0),
            columns,
            segment,
            raw,
            schema,
            index_meta: Mutex::new(None),
            seal_generation: AtomicU64::new(0),
            refs: RefCount::new(),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id.block_id
    }

    /// Block identity and schema binding
    pub fn meta(&self) -> (Id, &Arc<Schema>) {
        (self.id, &self.schema)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Owning segment, if it is still alive
    pub fn segment(&self) -> Option<Arc<SegmentStore>> {
        self.segment.upgrade()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn open_column(&self, col: usize) -> Result<&ColumnStore> {
        self.ensure_live()?;
        self.columns.get(col).ok_or_else(|| {
            PillarError::InvalidParameter(format!(
                "column {} out of range for block {} ({} columns)",
                col,
                self.id,
                self.columns.len()
            ))
        })
    }

    pub fn write_ts(&self, ts: u64) {
        self.ts.store(ts, Ordering::Release);
    }

    /// Block timestamp: the explicit one if set, else the newest column write
    pub fn read_ts(&self) -> u64 {
        let ts = self.ts.load(Ordering::Acquire);
        if ts != 0 {
            return ts;
        }
        self.columns.iter().map(|c| c.read_ts()).max().unwrap_or(0)
    }

    // =========================================================================
    // Index Metadata
    // =========================================================================

    /// Persist the block's index-metadata blob and bump the seal generation
    pub fn write_index_meta(&self, buf: &[u8]) -> Result<()> {
        self.ensure_live()?;
        let file = {
            let mut cell = self.index_meta.lock();
            match cell.as_ref() {
                Some(file) => Arc::clone(file),
                None => {
                    let name = index_meta_file_name(self.id.block_id);
                    let file = match self.raw.file(&name) {
                        Some(file) => file,
                        None => self.raw.new_file(&name)?,
                    };
                    *cell = Some(Arc::clone(&file));
                    file
                }
            }
        };
        file.write(buf)?;
        self.seal_generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Number of times this block has been sealed since it was opened.
    /// Indexes read at an older generation are stale.
    pub fn seal_generation(&self) -> u64 {
        self.seal_generation.load(Ordering::Acquire)
    }

    /// Load and decode the block's index-metadata blob
    pub fn load_index_meta(&self) -> Result<IndicesMeta> {
        self.ensure_live()?;
        let file = self.index_meta.lock().clone().ok_or_else(|| {
            PillarError::NotFound(format!("block {} has no index metadata", self.id))
        })?;
        let buf = file.read_all()?;
        IndicesMeta::unmarshal(&buf)
    }

    /// True once the block has been sealed with indexes
    pub fn has_index_meta(&self) -> bool {
        self.index_meta.lock().is_some()
    }

    pub(crate) fn attach_index_meta(&self, file: Arc<RawFile>) {
        *self.index_meta.lock() = Some(file);
    }

    // =========================================================================
    // Reference Counting
    // =========================================================================

    pub fn ref_(&self) -> Result<usize> {
        self.refs.acquire()
    }

    /// Drop a reference; the last one destroys the block
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

    /// Destroy every column, then the metadata blob
    pub fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(PillarError::Destroyed(format!("block {}", self.id)));
        }
        tracing::info!(id = %self.id, "destroying block");

        for column in &self.columns {
            column.destroy()?;
        }
        if let Some(file) = self.index_meta.lock().take() {
            self.raw.release_file(&file)?;
        }
        Ok(())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(PillarError::Destroyed(format!("block {}", self.id)));
        }
        Ok(())
    }
}
