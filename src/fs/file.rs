//! Raw file handles
//!
//! A [`RawFile`] is a whole-object container: `write` replaces the file's
//! contents, `read` fills a buffer from the start. Handles are shared through
//! `Arc`; [`FileRef`] additionally holds one count on the file's
//! [`RefCount`] for as long as it lives.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::common::RefCount;
use crate::error::Result;

/// Compression tag for files stored as written
pub const ALGO_NONE: u8 = 0;

/// Size and encoding facts about one raw file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStat {
    pub name: String,
    /// Bytes on disk
    pub size: u64,
    /// Bytes before compression
    pub origin_size: u64,
    /// Compression algorithm tag
    pub algo: u8,
}

/// One named file inside a raw segment
#[derive(Debug)]
pub struct RawFile {
    name: String,
    path: PathBuf,
    handle: Mutex<File>,
    stat: RwLock<FileStat>,
    refs: RefCount,
    sync_on_write: bool,
}

impl RawFile {
    /// Create (or truncate) a file named `name` in `dir`
    pub(crate) fn create(dir: &Path, name: &str, sync_on_write: bool) -> Result<Self> {
        let path = dir.join(name);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self::from_parts(name, path, file, 0, sync_on_write))
    }

    /// Open an existing file named `name` in `dir`
    pub(crate) fn open(dir: &Path, name: &str, sync_on_write: bool) -> Result<Self> {
        let path = dir.join(name);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let size = file.metadata()?.len();

        Ok(Self::from_parts(name, path, file, size, sync_on_write))
    }

    fn from_parts(name: &str, path: PathBuf, file: File, size: u64, sync_on_write: bool) -> Self {
        Self {
            name: name.to_string(),
            path,
            handle: Mutex::new(file),
            stat: RwLock::new(FileStat {
                name: name.to_string(),
                size,
                origin_size: size,
                algo: ALGO_NONE,
            }),
            refs: RefCount::new(),
            sync_on_write,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stat(&self) -> FileStat {
        self.stat.read().clone()
    }

    pub fn size(&self) -> u64 {
        self.stat.read().size
    }

    pub fn origin_size(&self) -> u64 {
        self.stat.read().origin_size
    }

    pub fn algo(&self) -> u8 {
        self.stat.read().algo
    }

    pub fn refs(&self) -> &RefCount {
        &self.refs
    }

    /// Replace the file's contents with `buf`
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut file = self.handle.lock();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(buf)?;
        if self.sync_on_write {
            file.sync_data()?;
        }

        let mut stat = self.stat.write();
        stat.size = buf.len() as u64;
        stat.origin_size = buf.len() as u64;
        Ok(buf.len())
    }

    /// Read from the start of the file into `buf`.
    ///
    /// Returns the number of bytes read: `min(buf.len(), size)`.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut file = self.handle.lock();
        let want = (self.size() as usize).min(buf.len());
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf[..want])?;
        Ok(want)
    }

    /// Read the whole file
    pub fn read_all(&self) -> Result<Bytes> {
        let mut buf = vec![0u8; self.size() as usize];
        let n = self.read(&mut buf)?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    pub fn sync(&self) -> Result<()> {
        self.handle.lock().sync_all()?;
        Ok(())
    }
}

/// Counted handle to a [`RawFile`]; the count is dropped with the handle
#[derive(Debug)]
pub struct FileRef {
    file: Arc<RawFile>,
}

impl FileRef {
    pub(crate) fn acquire(file: &Arc<RawFile>) -> Result<Self> {
        file.refs.acquire()?;
        Ok(Self {
            file: Arc::clone(file),
        })
    }

    pub fn file(&self) -> &Arc<RawFile> {
        &self.file
    }
}

impl Deref for FileRef {
    type Target = RawFile;

    fn deref(&self) -> &RawFile {
        &self.file
    }
}

impl Drop for FileRef {
    fn drop(&mut self) {
        if let Err(e) = self.file.refs.release() {
            tracing::warn!(file = self.file.name(), error = %e, "releasing file handle failed");
        }
    }
}
