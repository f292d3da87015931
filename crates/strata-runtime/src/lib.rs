//! Stage plans and execution backends for Strata.
//!
//! This crate implements the execution layer: the fixed three-stage
//! `ProvisionPlan` built from a normalized manifest, the Dockerfile renderer
//! for that plan, the pluggable `ProvisionBackend` trait with a `host`
//! backend (runs the steps on this machine) and a `mock` backend (simulates
//! apt, conda and pip in memory), and host prerequisite checks.

pub mod backend;
pub mod dockerfile;
pub mod host;
pub mod mock;
pub mod plan;
pub mod prereq;
pub mod shell;

pub use backend::{select_backend, ExecContext, ProvisionBackend};
pub use dockerfile::render_dockerfile;
pub use mock::{InstalledEnv, InstalledState, MockBackend};
pub use plan::{
    build_plan, BuildParam, BuildParams, Invocation, PlanOptions, ProvisionPlan, ResolvedCommand,
    Segment, Stage, StageKind, Step, Word,
};
pub use prereq::{check_host_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend '{0}' is not available on this system")]
    BackendUnavailable(String),
    #[error("failed to copy {source_path} into the build context: {reason}")]
    CopyFailed { source_path: String, reason: String },
    #[error("'{command}' exited with {}: {detail}", exit_label(.code))]
    StepFailed {
        command: String,
        code: Option<i32>,
        detail: String,
    },
    #[error("environment not found: {0}")]
    EnvironmentNotFound(String),
}

#[allow(clippy::ref_option)]
fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "no status (terminated by signal)".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_failed_display_includes_status() {
        let e = RuntimeError::StepFailed {
            command: "apt-get update".to_owned(),
            code: Some(100),
            detail: "index fetch failed".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("apt-get update"));
        assert!(msg.contains("status 100"));
        assert!(msg.contains("index fetch failed"));
    }

    #[test]
    fn step_failed_display_without_status() {
        let e = RuntimeError::StepFailed {
            command: "conda env create".to_owned(),
            code: None,
            detail: String::new(),
        };
        assert!(e.to_string().contains("terminated by signal"));
    }
}
