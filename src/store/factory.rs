//! Segment factories
//!
//! The two ways a [`SegmentStore`] comes into existence: formatting a new
//! segment, or opening a persisted one and replaying it. Callers that need a
//! segment are handed one of these strategies instead of choosing the path
//! themselves.

use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::schema::Schema;

use super::SegmentStore;

/// Strategy for producing a segment rooted at `dir`
pub trait SegmentFactory: Send + Sync {
    fn build(&self, dir: &Path, name: &str, id: u64) -> Result<Arc<SegmentStore>>;
}

/// Format path: initialize and mount an empty segment
#[derive(Debug, Clone, Default)]
pub struct CreateSegment {
    pub sync_on_write: bool,
}

impl SegmentFactory for CreateSegment {
    fn build(&self, dir: &Path, name: &str, id: u64) -> Result<Arc<SegmentStore>> {
        SegmentStore::create(dir, name, id, self.sync_on_write)
    }
}

/// Replay path: open an existing segment and rebuild its blocks
#[derive(Debug, Clone)]
pub struct OpenSegment {
    pub schema: Arc<Schema>,
    pub sync_on_write: bool,
}

impl SegmentFactory for OpenSegment {
    fn build(&self, dir: &Path, name: &str, id: u64) -> Result<Arc<SegmentStore>> {
        let segment = SegmentStore::open(dir, name, id, self.sync_on_write)?;
        segment.replay(&self.schema)?;
        Ok(segment)
    }
}
