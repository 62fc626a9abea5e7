//! # Pillar
//!
//! The on-disk columnar storage core of an analytic table engine:
//! - Segment → block → column hierarchy mapped onto raw segment files
//! - Append-only, time-versioned column data files
//! - Per-block zone map and bloom filter indexes over the primary key
//! - Two-stage duplicate-key detection
//! - Replay of the whole hierarchy from file names after a restart
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │          (segments, schema, sealed-block indexes)           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │    Store    │◄─────────│    Index     │
//!   │ Seg/Blk/Col │  slots   │ ZoneMap+Bloom│
//!   └──────┬──────┘          └──────────────┘
//!          │
//!          ▼
//!   ┌─────────────┐
//!   │     FS      │
//!   │ RawSegment  │
//!   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod common;
pub mod key;
pub mod schema;
pub mod fs;
pub mod store;
pub mod index;
pub mod jobs;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{PillarError, Result};
pub use config::Config;
pub use engine::Engine;
pub use key::Key;
pub use schema::Schema;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Pillar
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
