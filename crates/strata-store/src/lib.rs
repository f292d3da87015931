//! State directory layout and build records for Strata.
//!
//! This crate provides the persistence layer: `StateLayout` for the directory
//! structure and format version marker, and `RecordStore` for the per-recipe
//! `BuildRecord` files written atomically with an embedded blake3 checksum.

pub mod layout;
pub mod records;

pub use layout::{StateLayout, STATE_FORMAT_VERSION};
pub use records::{BuildRecord, ProvisionState, RecordStore, StageOutcome, StageStatus};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for record '{id}': expected {expected}, got {actual}")]
    IntegrityFailure {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("build record not found: {0}")]
    RecordNotFound(String),
    #[error("ambiguous record prefix '{prefix}': matches {count} records")]
    AmbiguousPrefix { prefix: String, count: usize },
    #[error("state format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
