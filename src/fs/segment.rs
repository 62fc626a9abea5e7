//! Raw Segment
//!
//! A directory of named files with a mount state.
//!
//! ## Concurrency:
//! - `files`: Protected by RwLock (name listing and lookups share, create/release exclusive)
//! - `mounted`: Atomic flag (lock-free)

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{PillarError, Result};

use super::RawFile;

/// Marker file identifying an initialized segment directory
const MARKER: &str = "SEGMENT";

#[derive(Debug)]
pub struct RawSegment {
    name: String,
    dir: PathBuf,
    files: RwLock<HashMap<String, Arc<RawFile>>>,
    mounted: AtomicBool,
    sync_on_write: bool,
}

impl RawSegment {
    /// Initialize a new, empty segment in `dir`.
    ///
    /// Fails if `dir` already holds a segment.
    pub fn init(dir: &Path, name: &str, sync_on_write: bool) -> Result<Self> {
        let marker = dir.join(MARKER);
        if marker.exists() {
            return Err(PillarError::InvalidParameter(format!(
                "segment already initialized at {}",
                dir.display()
            )));
        }

        fs::create_dir_all(dir)?;
        fs::write(&marker, name.as_bytes())?;

        Ok(Self::new(dir, name, sync_on_write))
    }

    /// Open an existing segment. Files are not listed until [`Self::replay`].
    pub fn open(dir: &Path, name: &str, sync_on_write: bool) -> Result<Self> {
        if !dir.join(MARKER).exists() {
            return Err(PillarError::NotFound(format!(
                "no segment at {}",
                dir.display()
            )));
        }

        Ok(Self::new(dir, name, sync_on_write))
    }

    fn new(dir: &Path, name: &str, sync_on_write: bool) -> Self {
        Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            files: RwLock::new(HashMap::new()),
            mounted: AtomicBool::new(false),
            sync_on_write,
        }
    }

    /// Discover every file in the directory, then mount.
    ///
    /// Returns the number of files found.
    pub fn replay(&self) -> Result<usize> {
        let mut found = HashMap::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == MARKER {
                continue;
            }
            let file = RawFile::open(&self.dir, &name, self.sync_on_write)?;
            found.insert(name, Arc::new(file));
        }

        let count = found.len();
        *self.files.write() = found;
        self.mount();
        Ok(count)
    }

    pub fn mount(&self) {
        self.mounted.store(true, Ordering::Release);
    }

    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::Release);
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create a new named file. Requires a mounted segment.
    pub fn new_file(&self, name: &str) -> Result<Arc<RawFile>> {
        if !self.is_mounted() {
            return Err(PillarError::InvalidParameter(format!(
                "segment {} is not mounted",
                self.name
            )));
        }

        let mut files = self.files.write();
        if files.contains_key(name) {
            return Err(PillarError::InvalidParameter(format!(
                "file {} already exists in segment {}",
                name, self.name
            )));
        }

        let file = Arc::new(RawFile::create(&self.dir, name, self.sync_on_write)?);
        files.insert(name.to_string(), Arc::clone(&file));
        Ok(file)
    }

    /// Look up a file by name
    pub fn file(&self, name: &str) -> Option<Arc<RawFile>> {
        self.files.read().get(name).cloned()
    }

    /// Detach a file from the segment and delete it from disk
    pub fn release_file(&self, file: &RawFile) -> Result<()> {
        self.files.write().remove(file.name());

        match fs::remove_file(file.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Snapshot of name → handle for every file in the segment
    pub fn nodes(&self) -> HashMap<String, Arc<RawFile>> {
        self.files.read().clone()
    }

    /// Sorted list of file names
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    pub fn sync(&self) -> Result<()> {
        let files: Vec<Arc<RawFile>> = self.files.read().values().cloned().collect();
        for file in files {
            file.sync()?;
        }
        Ok(())
    }

    /// Delete the segment directory and everything in it
    pub fn destroy(&self) -> Result<()> {
        self.unmount();
        self.files.write().clear();

        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
