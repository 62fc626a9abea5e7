//! Common Module
//!
//! Small shared building blocks used across the storage and index layers.
//!
//! ## Contents
//! - [`Id`]: composite identifier scoping file handles and index readers
//! - [`RefCount`]: atomic reference counter with a single zero crossing

mod refs;

pub use refs::RefCount;

use std::fmt;

/// Offset added to an index slot to form the `part` of a reader's [`Id`]
pub const INDEX_PART_BASE: u32 = 1000;

/// Composite key {segment, block, column, optional part}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Id {
    pub segment_id: u64,
    pub block_id: u64,
    pub column: u16,
    /// Index slot (+ [`INDEX_PART_BASE`]) for index readers, `None` otherwise
    pub part: Option<u32>,
}

impl Id {
    pub fn segment(segment_id: u64) -> Self {
        Self {
            segment_id,
            ..Default::default()
        }
    }

    pub fn block(segment_id: u64, block_id: u64) -> Self {
        Self {
            segment_id,
            block_id,
            ..Default::default()
        }
    }

    pub fn column(segment_id: u64, block_id: u64, column: u16) -> Self {
        Self {
            segment_id,
            block_id,
            column,
            part: None,
        }
    }

    /// Scope this id to an index slot of its column
    pub fn with_index_slot(mut self, slot: usize) -> Self {
        self.part = Some(INDEX_PART_BASE + slot as u32);
        self
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.segment_id, self.block_id, self.column)?;
        if let Some(part) = self.part {
            write!(f, "-{}", part)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(Id::column(1, 2, 3).to_string(), "1-2-3");
        assert_eq!(Id::column(1, 2, 3).with_index_slot(1).to_string(), "1-2-3-1001");
    }
}
