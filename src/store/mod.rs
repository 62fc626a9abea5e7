//! Store Module
//!
//! Maps the segment → block → column hierarchy onto raw segment files.
//!
//! ## Responsibilities
//! - Create per-column data, update-log and index-slot files
//! - Append time-versioned data files, never overwrite them
//! - Rebuild the block/column map from file names after a restart (replay)
//! - Tear everything down exactly once when the last reference goes away
//!
//! ## Ownership
//! ```text
//! ┌──────────────────────────────┐
//! │ SegmentStore                 │──owns──► RawSegment (directory)
//! │   blocks: id → BlockStore    │
//! └──────────────┬───────────────┘
//!                │ owns (Arc), back-ref (Weak)
//! ┌──────────────▼───────────────┐
//! │ BlockStore                   │──owns──► <block>.meta
//! │   columns: [ColumnStore; n]  │
//! └──────────────┬───────────────┘
//!                │
//! ┌──────────────▼───────────────┐
//! │ ColumnStore                  │──owns──► data versions, .upd, .idx slots
//! └──────────────────────────────┘
//! ```

mod block;
mod column;
mod factory;
mod segment;

pub use block::BlockStore;
pub use column::ColumnStore;
pub use factory::{CreateSegment, OpenSegment, SegmentFactory};
pub use segment::{ReplayStats, SegmentStore};
