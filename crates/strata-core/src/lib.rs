//! Core orchestration engine for Strata provisioning runs.
//!
//! This crate ties together manifest parsing, the record store, and runtime
//! backends into the `Provisioner`: the central API for checking inputs,
//! planning and rendering the three-stage procedure, executing it through a
//! backend, and inspecting the resulting build records. It also provides the
//! state directory lock, the shutdown flag, and stage lifecycle validation.

pub mod check;
pub mod concurrency;
pub mod engine;
pub mod lifecycle;

pub use check::{CheckReport, Diagnostic, Severity};
pub use concurrency::{install_signal_handler, shutdown_requested, StateLock};
pub use engine::{LoadedRecipe, PlannedCommand, ProvisionOptions, ProvisionResult, Provisioner};
pub use lifecycle::{state_after, validate_transition};

use strata_runtime::StageKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("manifest error: {0}")]
    Manifest(#[from] strata_schema::ManifestError),
    #[error("store error: {0}")]
    Store(#[from] strata_store::StoreError),
    #[error("runtime error: {0}")]
    Runtime(#[from] strata_runtime::RuntimeError),
    #[error("stage '{stage}' failed: {source}")]
    StageFailed {
        stage: StageKind,
        source: strata_runtime::RuntimeError,
    },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("interrupted before stage '{0}'")]
    Interrupted(StageKind),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
