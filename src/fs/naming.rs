//! File naming
//!
//! The only place that knows how persisted names are spelled. Data file names
//! are a compatibility contract and must stay bit-exact:
//!
//! - base version:      `<column>_<block>.blk`
//! - later versions:    `<column>_<block>_<timestamp>.blk`
//!
//! Other per-block files use extensions the data grammar never matches:
//! `<column>_<block>_<slot>.idx`, `<column>_<block>.upd`, `<block>.meta`.

const DATA_EXT: &str = ".blk";
const INDEX_EXT: &str = ".idx";
const UPDATE_EXT: &str = ".upd";
const META_EXT: &str = ".meta";

/// What a persisted name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Data {
        column: usize,
        block: u64,
        ts: Option<u64>,
    },
    Index {
        column: usize,
        block: u64,
        slot: usize,
    },
    Updates {
        column: usize,
        block: u64,
    },
    IndexMeta {
        block: u64,
    },
}

pub fn data_file_name(column: usize, block: u64) -> String {
    format!("{}_{}{}", column, block, DATA_EXT)
}

pub fn versioned_data_file_name(column: usize, block: u64, ts: u64) -> String {
    format!("{}_{}_{}{}", column, block, ts, DATA_EXT)
}

pub fn index_file_name(column: usize, block: u64, slot: usize) -> String {
    format!("{}_{}_{}{}", column, block, slot, INDEX_EXT)
}

pub fn update_file_name(column: usize, block: u64) -> String {
    format!("{}_{}{}", column, block, UPDATE_EXT)
}

pub fn index_meta_file_name(block: u64) -> String {
    format!("{}{}", block, META_EXT)
}

/// Classify a persisted name. `None` means the name is not ours (or is
/// malformed) and should be skipped.
pub fn classify(name: &str) -> Option<FileKind> {
    if let Some(stem) = name.strip_suffix(DATA_EXT) {
        let fields: Vec<&str> = stem.split('_').collect();
        if fields.len() < 2 || fields.len() > 3 {
            return None;
        }
        let column = fields[0].parse().ok()?;
        let block = fields[1].parse().ok()?;
        let ts = match fields.get(2) {
            Some(raw) => Some(raw.parse().ok()?),
            None => None,
        };
        return Some(FileKind::Data { column, block, ts });
    }

    if let Some(stem) = name.strip_suffix(INDEX_EXT) {
        let mut fields = stem.split('_');
        let column = fields.next()?.parse().ok()?;
        let block = fields.next()?.parse().ok()?;
        let slot = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }
        return Some(FileKind::Index {
            column,
            block,
            slot,
        });
    }

    if let Some(stem) = name.strip_suffix(UPDATE_EXT) {
        let (column, block) = stem.split_once('_')?;
        return Some(FileKind::Updates {
            column: column.parse().ok()?,
            block: block.parse().ok()?,
        });
    }

    if let Some(stem) = name.strip_suffix(META_EXT) {
        return Some(FileKind::IndexMeta {
            block: stem.parse().ok()?,
        });
    }

    None
}
