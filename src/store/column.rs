//! Column Store
//!
//! Physical storage of one column inside one block.
//!
//! ## Concurrency:
//! - `data`: RwLock over the version list. Readers snapshot the active handle
//!   and drop the lock before any I/O; `write_version` creates its file first
//!   and takes the exclusive lock only to push the handle.
//! - `updates` / `indexes`: per-file Mutex guarding lazy creation only.
//!   Only the write paths create these files; reads look them up and fail
//!   with `NotFound` when they do not exist yet.
//! - `ts`: Atomic (lock-free)

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::Id;
use crate::error::{PillarError, Result};
use crate::fs::{
    data_file_name, index_file_name, update_file_name, versioned_data_file_name, FileRef,
    FileStat, RawFile, RawSegment,
};

pub struct ColumnStore {
    id: Id,
    column: usize,
    block_id: u64,
    raw: Arc<RawSegment>,

    /// Last write timestamp
    ts: AtomicU64,

    /// Data versions, index 0 = base, last = active
    data: RwLock<Vec<Arc<RawFile>>>,

    /// Stat of the most recently written or replayed data file
    data_stat: RwLock<FileStat>,

    updates: Mutex<Option<Arc<RawFile>>>,
    indexes: Vec<Mutex<Option<Arc<RawFile>>>>,

    destroyed: AtomicBool,
}

impl ColumnStore {
    /// Ingestion path: creates the base data file `<col>_<block>.blk`
    pub(crate) fn new(
        raw: Arc<RawSegment>,
        segment_id: u64,
        block_id: u64,
        column: usize,
        index_slots: usize,
    ) -> Result<Self> {
        let base = raw.new_file(&data_file_name(column, block_id))?;
        let store = Self::empty(raw, segment_id, block_id, column, index_slots);
        *store.data_stat.write() = base.stat();
        store.data.write().push(base);
        Ok(store)
    }

    /// Replay path: no base file, versions are attached as they are found
    pub(crate) fn replay(
        raw: Arc<RawSegment>,
        segment_id: u64,
        block_id: u64,
        column: usize,
        index_slots: usize,
    ) -> Self {
        Self::empty(raw, segment_id, block_id, column, index_slots)
    }

    fn empty(
        raw: Arc<RawSegment>,
        segment_id: u64,
        block_id: u64,
        column: usize,
        index_slots: usize,
    ) -> Self {
        Self {
            id: Id::column(segment_id, block_id, column as u16),
            column,
            block_id,
            raw,
            ts: AtomicU64::new(0),
            data: RwLock::new(Vec::new()),
            data_stat: RwLock::new(FileStat::default()),
            updates: Mutex::new(None),
            indexes: (0..index_slots).map(|_| Mutex::new(None)).collect(),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn read_ts(&self) -> u64 {
        self.ts.load(Ordering::Acquire)
    }

    pub fn index_slot_count(&self) -> usize {
        self.indexes.len()
    }

    pub fn version_count(&self) -> usize {
        self.data.read().len()
    }

    /// Names of every data version, base first
    pub fn version_names(&self) -> Vec<String> {
        self.data.read().iter().map(|f| f.name().to_string()).collect()
    }

    pub fn data_stat(&self) -> FileStat {
        self.data_stat.read().clone()
    }

    // =========================================================================
    // Versions
    // =========================================================================

    /// Append the versioned data file `<col>_<block>_<ts>.blk` (if a base
    /// file exists), then record `ts` as the last write.
    pub fn write_version(&self, ts: u64) -> Result<()> {
        self.ensure_live()?;

        // Replay-mode stores without a base only accumulate replayed versions
        if self.data.read().is_empty() {
            self.ts.store(ts, Ordering::Release);
            return Ok(());
        }

        let file = self
            .raw
            .new_file(&versioned_data_file_name(self.column, self.block_id, ts))?;

        {
            let mut data = self.data.write();
            // destroy snapshots the list after flipping the flag
            if self.destroyed.load(Ordering::Acquire) {
                drop(data);
                self.raw.release_file(&file)?;
                return Err(PillarError::Destroyed(format!("column {}", self.id)));
            }
            data.push(Arc::clone(&file));
        }
        self.ts.store(ts, Ordering::Release);

        tracing::debug!(id = %self.id, ts, file = file.name(), "appended data version");
        Ok(())
    }

    // =========================================================================
    // Data / Updates / Index I/O
    // =========================================================================

    /// Write to the active data version
    pub fn write_data(&self, buf: &[u8]) -> Result<()> {
        let file = self.active_data()?;
        file.write(buf)?;
        *self.data_stat.write() = file.stat();
        Ok(())
    }

    /// Read from the active data version
    pub fn read_data(&self, buf: &mut [u8]) -> Result<usize> {
        self.active_data()?.read(buf)
    }

    /// Write the update log, creating it on first use
    pub fn write_updates(&self, buf: &[u8]) -> Result<()> {
        self.update_file(true)?.write(buf)?;
        Ok(())
    }

    /// Read the update log; `NotFound` if nothing was ever written
    pub fn read_updates(&self, buf: &mut [u8]) -> Result<usize> {
        self.update_file(false)?.read(buf)
    }

    /// Write index slot `slot`. Out-of-range slots fail before any I/O.
    pub fn write_index(&self, slot: usize, buf: &[u8]) -> Result<()> {
        self.index_file(slot, true)?.write(buf)?;
        Ok(())
    }

    /// Read index slot `slot`. Out-of-range slots fail before any I/O; a
    /// slot that was never written is `NotFound`.
    pub fn read_index(&self, slot: usize, buf: &mut [u8]) -> Result<usize> {
        self.index_file(slot, false)?.read(buf)
    }

    /// True if index slot `slot` has a file behind it
    pub fn has_index(&self, slot: usize) -> bool {
        self.index_file(slot, false).is_ok()
    }

    // =========================================================================
    // Counted Handles
    // =========================================================================

    /// Handle to an existing index slot
    pub fn open_index_file(&self, slot: usize) -> Result<FileRef> {
        FileRef::acquire(&self.index_file(slot, false)?)
    }

    /// Handle to index slot `slot`, creating its file if needed
    pub fn create_index_file(&self, slot: usize) -> Result<FileRef> {
        FileRef::acquire(&self.index_file(slot, true)?)
    }

    pub fn open_data_file(&self) -> Result<FileRef> {
        FileRef::acquire(&self.active_data()?)
    }

    pub fn open_update_file(&self) -> Result<FileRef> {
        FileRef::acquire(&self.update_file(false)?)
    }

    // =========================================================================
    // Replay Attachment
    // =========================================================================

    pub(crate) fn attach_data(&self, file: Arc<RawFile>, ts: Option<u64>) {
        *self.data_stat.write() = file.stat();
        self.data.write().push(file);
        if let Some(ts) = ts {
            self.ts.fetch_max(ts, Ordering::AcqRel);
        }
    }

    pub(crate) fn attach_updates(&self, file: Arc<RawFile>) {
        *self.updates.lock() = Some(file);
    }

    pub(crate) fn attach_index(&self, slot: usize, file: Arc<RawFile>) -> Result<()> {
        let cell = self.indexes.get(slot).ok_or_else(|| self.slot_error(slot))?;
        *cell.lock() = Some(file);
        Ok(())
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Release every data version (and the update/index files) back to the
    /// raw segment.
    pub fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(PillarError::Destroyed(format!("column {}", self.id)));
        }
        tracing::info!(id = %self.id, ts = self.read_ts(), "destroying column");

        let files: Vec<Arc<RawFile>> = self.data.read().clone();
        for file in files {
            self.raw.release_file(&file)?;
        }

        if let Some(file) = self.updates.lock().take() {
            self.raw.release_file(&file)?;
        }
        for cell in &self.indexes {
            if let Some(file) = cell.lock().take() {
                self.raw.release_file(&file)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(PillarError::Destroyed(format!("column {}", self.id)));
        }
        Ok(())
    }

    fn active_data(&self) -> Result<Arc<RawFile>> {
        self.ensure_live()?;
        self.data
            .read()
            .last()
            .cloned()
            .ok_or_else(|| PillarError::NotFound(format!("column {} has no data file", self.id)))
    }

    fn update_file(&self, create: bool) -> Result<Arc<RawFile>> {
        self.ensure_live()?;
        let mut cell = self.updates.lock();
        self.resolve(&mut cell, &update_file_name(self.column, self.block_id), create)
    }

    fn index_file(&self, slot: usize, create: bool) -> Result<Arc<RawFile>> {
        let cell = self.indexes.get(slot).ok_or_else(|| self.slot_error(slot))?;
        self.ensure_live()?;
        let mut cell = cell.lock();
        self.resolve(
            &mut cell,
            &index_file_name(self.column, self.block_id, slot),
            create,
        )
    }

    fn resolve(
        &self,
        cell: &mut Option<Arc<RawFile>>,
        name: &str,
        create: bool,
    ) -> Result<Arc<RawFile>> {
        if let Some(file) = cell.as_ref() {
            return Ok(Arc::clone(file));
        }
        let file = match self.raw.file(name) {
            Some(file) => file,
            None if create => self.raw.new_file(name)?,
            None => {
                return Err(PillarError::NotFound(format!(
                    "column {}: no file {}",
                    self.id, name
                )))
            }
        };
        *cell = Some(Arc::clone(&file));
        Ok(file)
    }

    fn slot_error(&self, slot: usize) -> PillarError {
        PillarError::InvalidParameter(format!(
            "index slot {} out of range for column {} ({} slots)",
            slot,
            self.id,
            self.indexes.len()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_raw() -> (TempDir, Arc<RawSegment>) {
        let temp = TempDir::new().unwrap();
        let raw = RawSegment::init(&temp.path().join("seg"), "seg", false).unwrap();
        raw.mount();
        (temp, Arc::new(raw))
    }

    #[test]
    fn test_new_creates_base_file() {
        let (_temp, raw) = setup_raw();
        let col = ColumnStore::new(Arc::clone(&raw), 1, 7, 0, 2).unwrap();

        assert_eq!(col.version_count(), 1);
        assert_eq!(col.version_names(), vec!["0_7.blk"]);
        assert!(raw.file("0_7.blk").is_some());
    }

    #[test]
    fn test_write_version_appends_and_reads_new_version() {
        let (_temp, raw) = setup_raw();
        let col = ColumnStore::new(Arc::clone(&raw), 1, 7, 0, 2).unwrap();
        col.write_data(b"v0").unwrap();

        col.write_version(42).unwrap();
        assert_eq!(col.version_count(), 2);
        assert_eq!(col.read_ts(), 42);
        assert_eq!(col.version_names()[1], "0_7_42.blk");

        col.write_data(b"v1").unwrap();
        let mut buf = [0u8; 8];
        let n = col.read_data(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"v1");

        // the base version is untouched
        assert_eq!(&raw.file("0_7.blk").unwrap().read_all().unwrap()[..], b"v0");
    }

    #[test]
    fn test_replay_store_without_base_is_pass_through() {
        let (_temp, raw) = setup_raw();
        let col = ColumnStore::replay(raw, 1, 7, 0, 2);

        col.write_version(5).unwrap();
        assert_eq!(col.version_count(), 0);
        assert_eq!(col.read_ts(), 5);
        assert!(matches!(col.write_data(b"x"), Err(PillarError::NotFound(_))));
    }

    #[test]
    fn test_index_slot_out_of_range_does_no_io() {
        let (_temp, raw) = setup_raw();
        let col = ColumnStore::new(Arc::clone(&raw), 1, 7, 0, 2).unwrap();
        let files_before = raw.file_count();

        assert!(matches!(col.write_index(2, b"x"), Err(PillarError::InvalidParameter(_))));
        let mut buf = [0u8; 4];
        assert!(matches!(col.read_index(5, &mut buf), Err(PillarError::InvalidParameter(_))));
        assert!(col.open_index_file(2).is_err());

        assert_eq!(raw.file_count(), files_before);
    }

    #[test]
    fn test_updates_and_index_round_trip() {
        let (_temp, raw) = setup_raw();
        let col = ColumnStore::new(raw, 1, 7, 0, 2).unwrap();

        col.write_updates(b"upd").unwrap();
        col.write_index(1, b"idx1").unwrap();

        let mut buf = [0u8; 16];
        let n = col.read_updates(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"upd");
        let n = col.read_index(1, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"idx1");

        let handle = col.open_update_file().unwrap();
        assert_eq!(handle.name(), "0_7.upd");
        assert_eq!(handle.refs().count(), 2);
    }

    #[test]
    fn test_reads_do_not_create_files() {
        let (_temp, raw) = setup_raw();
        let col = ColumnStore::new(Arc::clone(&raw), 1, 7, 0, 2).unwrap();
        let names_before = raw.list_names();

        let mut buf = [0u8; 4];
        assert!(matches!(col.read_updates(&mut buf), Err(PillarError::NotFound(_))));
        assert!(matches!(col.read_index(1, &mut buf), Err(PillarError::NotFound(_))));
        assert!(matches!(col.open_index_file(0), Err(PillarError::NotFound(_))));
        assert!(matches!(col.open_update_file(), Err(PillarError::NotFound(_))));
        assert!(!col.has_index(0));

        assert_eq!(raw.list_names(), names_before);

        col.create_index_file(0).unwrap();
        assert!(col.has_index(0));
        assert!(raw.file("0_7_0.idx").is_some());
    }

    #[test]
    fn test_failed_version_keeps_previous_ts() {
        let (_temp, raw) = setup_raw();
        let col = ColumnStore::new(Arc::clone(&raw), 1, 7, 0, 2).unwrap();
        col.write_version(42).unwrap();
        col.write_version(10).unwrap();

        // 0_7_42.blk already exists, so the file cannot be created
        assert!(col.write_version(42).is_err());
        assert_eq!(col.read_ts(), 10);
        assert_eq!(col.version_count(), 3);
    }

    #[test]
    fn test_write_version_after_destroy_leaves_no_file() {
        let (_temp, raw) = setup_raw();
        let col = ColumnStore::new(Arc::clone(&raw), 1, 7, 0, 2).unwrap();
        col.destroy().unwrap();

        assert!(matches!(col.write_version(3), Err(PillarError::Destroyed(_))));
        assert_eq!(col.read_ts(), 0);
        assert_eq!(raw.file_count(), 0);
    }

    #[test]
    fn test_destroy_releases_files() {
        let (_temp, raw) = setup_raw();
        let col = ColumnStore::new(Arc::clone(&raw), 1, 7, 0, 2).unwrap();
        col.write_version(3).unwrap();
        col.write_index(0, b"zm").unwrap();

        col.destroy().unwrap();
        assert_eq!(raw.file_count(), 0);
        assert!(matches!(col.write_data(b"x"), Err(PillarError::Destroyed(_))));
        assert!(col.destroy().is_err());
    }
}
