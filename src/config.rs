//! Configuration for Pillar
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{PillarError, Result};

/// Default target false-positive rate for block bloom filters (1%)
pub const DEFAULT_BLOOM_FP_RATE: f64 = 0.01;

/// Main configuration for a Pillar instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all segments
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── seg_000001/      (one raw segment per directory)
    ///     │     ├── 0_1.blk    (column files, index slots, metadata)
    ///     │     └── ...
    ///     └── seg_000002/
    pub data_dir: PathBuf,

    /// fsync every raw file after each write
    pub sync_on_write: bool,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Target false-positive rate used when sizing block bloom filters
    pub bloom_false_positive_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./pillar_data"),
            sync_on_write: false,
            bloom_false_positive_rate: DEFAULT_BLOOM_FP_RATE,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<()> {
        let rate = self.bloom_false_positive_rate;
        if !(rate > 0.0 && rate < 1.0) {
            return Err(PillarError::Config(format!(
                "bloom false-positive rate must be in (0, 1), got {}",
                rate
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all segments)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Sync raw files after every write
    pub fn sync_on_write(mut self, sync: bool) -> Self {
        self.config.sync_on_write = sync;
        self
    }

    /// Set the bloom filter false-positive rate
    pub fn bloom_false_positive_rate(mut self, rate: f64) -> Self {
        self.config.bloom_false_positive_rate = rate;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
