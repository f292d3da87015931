use crate::backend::{ExecContext, ProvisionBackend};
use crate::plan::{ResolvedCommand, StageKind};
use crate::RuntimeError;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info};

/// Runs every step directly on this machine.
///
/// Meant for the inside of a container build (`RUN strata provision ...`) or
/// a disposable VM: commands go through the current interpreter (`/bin/sh -c`
/// unless a `Shell` step replaced it), inherit stdio so the tools'
/// diagnostics reach the user verbatim, and fail fast on the first non-zero
/// exit status.
#[derive(Debug, Default)]
pub struct HostBackend;

impl HostBackend {
    pub fn new() -> Self {
        Self
    }

    /// Build the interpreter command line for `script` under `ctx`.
    pub fn command_line(script: &str, ctx: &ExecContext) -> Vec<String> {
        let mut line = ctx.shell.clone();
        line.push(script.to_owned());
        line
    }
}

impl ProvisionBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn available(&self) -> bool {
        Path::new("/bin/sh").exists()
    }

    fn copy_in(&self, source: &Path, dest: &str) -> Result<(), RuntimeError> {
        let dest = Path::new(dest);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(source, dest).map_err(|e| RuntimeError::CopyFailed {
            source_path: source.display().to_string(),
            reason: e.to_string(),
        })?;
        debug!("copied {} -> {}", source.display(), dest.display());
        Ok(())
    }

    fn run(
        &self,
        stage: StageKind,
        command: &ResolvedCommand,
        ctx: &ExecContext,
    ) -> Result<(), RuntimeError> {
        let line = Self::command_line(&command.script, ctx);
        let shown = command.script.clone();
        info!("[{stage}] {shown}");

        let Some((program, args)) = line.split_first() else {
            return Err(RuntimeError::StepFailed {
                command: shown,
                code: None,
                detail: "empty interpreter".to_owned(),
            });
        };

        let status = Command::new(program)
            .args(args)
            .envs(&ctx.env)
            .status()
            .map_err(|e| RuntimeError::StepFailed {
                command: shown.clone(),
                code: Some(127),
                detail: format!("cannot start {program}: {e}"),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(RuntimeError::StepFailed {
                command: shown,
                code: status.code(),
                detail: "see tool output above".to_owned(),
            })
        }
    }
}
