//! Raw File Store
//!
//! Named byte containers grouped into segments. One segment is one directory;
//! every named file inside it is one filesystem file.
//!
//! ## Layout
//! ```text
//! seg_000001/
//!   ├── SEGMENT          (marker written by init)
//!   ├── 0_7.blk          (column 0, block 7, base data version)
//!   ├── 0_7_42.blk       (column 0, block 7, version written at ts 42)
//!   ├── 0_7.upd          (column 0, block 7, update log)
//!   ├── 0_7_0.idx        (column 0, block 7, index slot 0)
//!   ├── 0_7_1.idx        (column 0, block 7, index slot 1)
//!   └── 7.meta           (block 7, index metadata)
//! ```
//!
//! The segment layer above only relies on create/open/mount/unmount,
//! `new_file`, `release_file`, `sync` and the name listing.

mod file;
mod naming;
mod segment;

pub use file::{FileRef, FileStat, RawFile, ALGO_NONE};
pub use naming::{
    classify, data_file_name, index_file_name, index_meta_file_name, update_file_name,
    versioned_data_file_name, FileKind,
};
pub use segment::RawSegment;
