//! Error types for Pillar
//!
//! Provides a unified error type for all storage and index operations.

use roaring::RoaringBitmap;
use thiserror::Error;

/// Result type alias using PillarError
pub type Result<T> = std::result::Result<T, PillarError>;

/// Unified error type for Pillar operations
#[derive(Debug, Error)]
pub enum PillarError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Parameter Errors
    // -------------------------------------------------------------------------
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // -------------------------------------------------------------------------
    // Dedup Signals
    // -------------------------------------------------------------------------
    /// Not a failure: the key may already exist and must not be inserted.
    #[error("Possible duplicate key")]
    PossibleDuplicate,

    /// Batch form of [`PillarError::PossibleDuplicate`], carrying the
    /// positions of the keys that may already exist.
    #[error("Possible duplicate keys at {} positions", .0.len())]
    PossibleDuplicates(RoaringBitmap),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("Index read failure: {0}")]
    IndexRead(String),

    #[error("Unsupported operation on {kind} index: {op}")]
    Unsupported { kind: &'static str, op: &'static str },

    #[error("Duplicate key")]
    Duplicate,

    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Replay / Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Replay corruption: {0}")]
    ReplayCorruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Use after destroy: {0}")]
    Destroyed(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PillarError {
    /// True for the dedup signals (single-key or batch).
    pub fn is_possible_duplicate(&self) -> bool {
        matches!(
            self,
            PillarError::PossibleDuplicate | PillarError::PossibleDuplicates(_)
        )
    }
}

impl From<bincode::Error> for PillarError {
    fn from(err: bincode::Error) -> Self {
        PillarError::Serialization(err.to_string())
    }
}
