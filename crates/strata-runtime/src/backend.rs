use crate::plan::{BuildParams, ResolvedCommand, StageKind, Step};
use crate::RuntimeError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Interpreter `Run` steps go through until a `Shell` step replaces it.
pub const DEFAULT_SHELL: [&str; 2] = ["/bin/sh", "-c"];

/// Mutable execution state carried from step to step, mirroring how a
/// container build engine accumulates `ENV` and `SHELL` instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecContext {
    /// Directory relative `Copy` sources resolve against.
    pub context_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub shell: Vec<String>,
}

impl ExecContext {
    pub fn new(context_dir: impl Into<PathBuf>) -> Self {
        Self {
            context_dir: context_dir.into(),
            env: BTreeMap::new(),
            shell: DEFAULT_SHELL.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    /// A variable as later steps see it: context overrides first, then the
    /// process environment.
    pub fn lookup(&self, key: &str) -> Option<String> {
        self.env
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }

    pub fn shell_is_default(&self) -> bool {
        self.shell.iter().map(String::as_str).eq(DEFAULT_SHELL)
    }

    /// Apply a persistent `Env` or `Shell` step. Other steps leave the context untouched.
    pub fn apply(&mut self, step: &Step, params: &BuildParams) {
        match step {
            Step::Env { key, value } => {
                let resolved = value.resolve(params, &|k: &str| self.lookup(k));
                self.env.insert(key.clone(), resolved);
            }
            Step::Shell { argv } => {
                self.shell = argv
                    .iter()
                    .map(|w| w.resolve(params, &|k: &str| self.lookup(k)))
                    .collect();
            }
            Step::Copy { .. } | Step::Run { .. } => {}
        }
    }

    pub fn resolve_source(&self, source: &str) -> PathBuf {
        let p = Path::new(source);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.context_dir.join(p)
        }
    }
}

/// Executes the primitive operations of a provisioning plan.
///
/// The engine walks the plan and calls `copy_in` for `Copy` steps and `run`
/// once per invocation of a `Run` step; `Env` and `Shell` steps are folded
/// into the [`ExecContext`] passed along.
pub trait ProvisionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    fn copy_in(&self, source: &Path, dest: &str) -> Result<(), RuntimeError>;

    fn run(
        &self,
        stage: StageKind,
        command: &ResolvedCommand,
        ctx: &ExecContext,
    ) -> Result<(), RuntimeError>;
}

pub fn select_backend(name: &str) -> Result<Box<dyn ProvisionBackend>, RuntimeError> {
    match name {
        "host" => Ok(Box::new(crate::host::HostBackend::new())),
        "mock" => Ok(Box::new(crate::mock::MockBackend::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
