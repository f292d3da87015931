use crate::concurrency::{shutdown_requested, StateLock};
use crate::lifecycle::{state_after, validate_transition};
use crate::CoreError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use strata_runtime::host::HostBackend;
use strata_runtime::{
    build_plan, render_dockerfile, shell, BuildParams, ExecContext, PlanOptions,
    ProvisionBackend, ProvisionPlan, RuntimeError, Stage, StageKind, Step,
};
use strata_schema::{
    compute_recipe_id, parse_manifest_file, ManifestError, ManifestOverrides, NormalizedManifest,
    RecipeIdentity,
};
use strata_store::{
    BuildRecord, ProvisionState, RecordStore, StageOutcome, StageStatus, StateLayout, StoreError,
};
use tracing::{debug, info, warn};

/// Central orchestration engine for provisioning runs.
///
/// Coordinates manifest loading, plan construction, backend execution and
/// build record persistence.
pub struct Provisioner {
    layout: StateLayout,
    records: RecordStore,
}

/// A manifest with overrides applied, normalized, and bound to its inputs.
#[derive(Debug, Clone)]
pub struct LoadedRecipe {
    pub manifest: NormalizedManifest,
    /// Directory relative input paths resolve against.
    pub context_dir: PathBuf,
    pub env_spec_path: PathBuf,
    pub requirements_path: PathBuf,
    pub identity: RecipeIdentity,
}

#[derive(Debug, Clone, Default)]
pub struct ProvisionOptions {
    pub overrides: ManifestOverrides,
    /// Where input files are copied before use. Defaults to the recipe's
    /// staging directory under the state root.
    pub context_root: Option<String>,
}

/// Result of a successful provisioning run.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionResult {
    pub identity: RecipeIdentity,
    pub record: BuildRecord,
    pub plan: ProvisionPlan,
}

/// One command a provisioning run would execute, as shown by a dry run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PlannedCommand {
    pub stage: StageKind,
    pub command: String,
}

pub(crate) fn load_manifest(
    manifest_path: &Path,
    overrides: &ManifestOverrides,
) -> Result<(NormalizedManifest, PathBuf), CoreError> {
    let mut manifest = parse_manifest_file(manifest_path)?;
    manifest.apply_overrides(overrides);
    let normalized = manifest.normalize()?;
    Ok((normalized, build_context(manifest_path)))
}

fn build_context(manifest_path: &Path) -> PathBuf {
    match manifest_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub(crate) fn read_input(path: &Path) -> Result<Vec<u8>, ManifestError> {
    std::fs::read(path).map_err(|source| ManifestError::InputRead {
        path: path.display().to_string(),
        source,
    })
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn skipped(kind: StageKind) -> StageOutcome {
    StageOutcome {
        stage: kind.id().to_owned(),
        status: StageStatus::Skipped,
        started_at: None,
        finished_at: None,
        error: None,
    }
}

impl Provisioner {
    /// Create a provisioner rooted at the given state directory.
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        let layout = StateLayout::new(state_root);
        let records = RecordStore::new(layout.clone());
        Self { layout, records }
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    /// Parse the manifest, apply overrides, and hash the input files into a
    /// recipe identity. The input files are read but not interpreted.
    pub fn load(
        &self,
        manifest_path: &Path,
        overrides: &ManifestOverrides,
    ) -> Result<LoadedRecipe, CoreError> {
        let (manifest, context_dir) = load_manifest(manifest_path, overrides)?;
        let env_spec_path = manifest.env_spec_path(&context_dir);
        let requirements_path = manifest.requirements_path(&context_dir);

        let env_spec = read_input(&env_spec_path)?;
        let requirements = read_input(&requirements_path)?;
        let identity = compute_recipe_id(&manifest, &env_spec, &requirements)?;
        debug!(
            "loaded recipe {} (env '{}', {} activation)",
            identity.short_id, manifest.env_name, manifest.activation
        );

        Ok(LoadedRecipe {
            manifest,
            context_dir,
            env_spec_path,
            requirements_path,
            identity,
        })
    }

    /// The stage plan as rendered into a container recipe.
    pub fn plan(
        &self,
        manifest_path: &Path,
        overrides: &ManifestOverrides,
    ) -> Result<ProvisionPlan, CoreError> {
        let (manifest, _) = load_manifest(manifest_path, overrides)?;
        Ok(build_plan(&manifest, &PlanOptions::default()))
    }

    /// Render the Dockerfile. Input files must sit inside the manifest
    /// directory, since `COPY` only reads from the build context.
    pub fn render(
        &self,
        manifest_path: &Path,
        overrides: &ManifestOverrides,
    ) -> Result<String, CoreError> {
        let (manifest, _) = load_manifest(manifest_path, overrides)?;
        manifest.require_inputs_in_context()?;
        Ok(render_dockerfile(&build_plan(&manifest, &PlanOptions::default())))
    }

    fn execution_plan(&self, recipe: &LoadedRecipe, options: &ProvisionOptions) -> ProvisionPlan {
        let context_root = options.context_root.clone().unwrap_or_else(|| {
            self.layout
                .staging_dir(&recipe.identity.recipe_id)
                .to_string_lossy()
                .into_owned()
        });
        build_plan(&recipe.manifest, &PlanOptions { context_root })
    }

    /// List the commands `provision` would execute, with build parameters
    /// resolved and `Env`/`Shell` steps folded in.
    pub fn dry_run(
        &self,
        manifest_path: &Path,
        options: &ProvisionOptions,
    ) -> Result<Vec<PlannedCommand>, CoreError> {
        let recipe = self.load(manifest_path, &options.overrides)?;
        let plan = self.execution_plan(&recipe, options);
        let mut ctx = ExecContext::new(&recipe.context_dir);
        let mut commands = Vec::new();

        for stage in &plan.stages {
            for step in &stage.steps {
                let command = match step {
                    Step::Copy { source, dest } => {
                        let resolved = source.resolve(&plan.params, &|k: &str| ctx.lookup(k));
                        format!("copy {} {dest}", ctx.resolve_source(&resolved).display())
                    }
                    Step::Env { key, .. } => {
                        ctx.apply(step, &plan.params);
                        let value = ctx.env.get(key).cloned().unwrap_or_default();
                        format!("env {key}={value}")
                    }
                    Step::Shell { .. } => {
                        ctx.apply(step, &plan.params);
                        format!("shell {}", shell::join(&ctx.shell))
                    }
                    Step::Run { invocations } => {
                        for inv in invocations {
                            let resolved = inv.resolve(&plan.params);
                            let command = if ctx.shell_is_default() {
                                resolved.script
                            } else {
                                shell::join(&HostBackend::command_line(&resolved.script, &ctx))
                            };
                            commands.push(PlannedCommand {
                                stage: stage.kind,
                                command,
                            });
                        }
                        continue;
                    }
                };
                commands.push(PlannedCommand {
                    stage: stage.kind,
                    command,
                });
            }
        }

        Ok(commands)
    }

    /// Execute the three stages in order through `backend`.
    ///
    /// Fails fast: the first failing command fails its stage, later stages
    /// are recorded as skipped, and the record is persisted in the `Failed`
    /// state before the error is returned.
    pub fn provision(
        &self,
        manifest_path: &Path,
        options: &ProvisionOptions,
        backend: &dyn ProvisionBackend,
    ) -> Result<ProvisionResult, CoreError> {
        info!(
            "provisioning from {} with the {} backend",
            manifest_path.display(),
            backend.name()
        );
        self.layout.initialize()?;
        let _lock = StateLock::acquire(&self.layout.lock_file())?;

        let recipe = self.load(manifest_path, &options.overrides)?;
        if !backend.available() {
            return Err(RuntimeError::BackendUnavailable(backend.name().to_owned()).into());
        }
        let plan = self.execution_plan(&recipe, options);
        let mut record = self.start_record(&recipe, backend.name())?;
        self.records.put(&record)?;

        let mut ctx = ExecContext::new(&recipe.context_dir);
        let total = plan.stages.len();
        for (idx, stage) in plan.stages.iter().enumerate() {
            info!("[{}/{total}] {}", idx + 1, stage.kind.title());
            let started_at = now();

            match Self::run_stage(backend, stage, &plan.params, &mut ctx) {
                Ok(()) => {
                    let next = state_after(stage.kind);
                    validate_transition(record.state, next)?;
                    record.state = next;
                    record.stages.push(StageOutcome {
                        stage: stage.kind.id().to_owned(),
                        status: StageStatus::Succeeded,
                        started_at: Some(started_at),
                        finished_at: Some(now()),
                        error: None,
                    });
                    record.updated_at = now();
                    self.records.put(&record)?;
                }
                Err(err) => {
                    let detail = match &err {
                        CoreError::StageFailed { source, .. } => source.to_string(),
                        other => other.to_string(),
                    };
                    warn!("stage {} failed: {detail}", stage.kind);
                    validate_transition(record.state, ProvisionState::Failed)?;
                    record.state = ProvisionState::Failed;
                    record.stages.push(StageOutcome {
                        stage: stage.kind.id().to_owned(),
                        status: StageStatus::Failed,
                        started_at: Some(started_at),
                        finished_at: Some(now()),
                        error: Some(detail),
                    });
                    record
                        .stages
                        .extend(plan.stages[idx + 1..].iter().map(|s| skipped(s.kind)));
                    record.updated_at = now();
                    self.records.put(&record)?;
                    return Err(err);
                }
            }
        }

        info!(
            "environment '{}' provisioned ({})",
            recipe.manifest.env_name, recipe.identity.short_id
        );
        Ok(ProvisionResult {
            identity: recipe.identity,
            record,
            plan,
        })
    }

    /// A fresh `Pending` record, or the previous record for the same recipe
    /// reset for another run.
    fn start_record(&self, recipe: &LoadedRecipe, backend: &str) -> Result<BuildRecord, CoreError> {
        let id = &recipe.identity.recipe_id;
        let timestamp = now();

        let previous = match self.records.get(id) {
            Ok(record) => Some(record),
            Err(StoreError::RecordNotFound(_)) => None,
            Err(e) => {
                warn!("discarding unreadable build record {id}: {e}");
                None
            }
        };

        let Some(mut record) = previous else {
            return Ok(BuildRecord {
                recipe_id: id.clone(),
                short_id: recipe.identity.short_id.clone(),
                env_name: recipe.manifest.env_name.clone(),
                base_image: recipe.manifest.base_image.clone(),
                activation: recipe.manifest.activation,
                backend: backend.to_owned(),
                state: ProvisionState::Pending,
                stages: Vec::new(),
                run_count: 1,
                created_at: timestamp.clone(),
                updated_at: timestamp,
                checksum: None,
            });
        };

        if matches!(
            record.state,
            ProvisionState::Provisioned | ProvisionState::Failed
        ) {
            validate_transition(record.state, ProvisionState::Pending)?;
        } else {
            warn!(
                "previous run of {} stopped in state '{}', starting over",
                record.short_id, record.state
            );
        }
        record.state = ProvisionState::Pending;
        record.backend = backend.to_owned();
        record.stages.clear();
        record.run_count += 1;
        record.updated_at = timestamp;
        Ok(record)
    }

    fn run_stage(
        backend: &dyn ProvisionBackend,
        stage: &Stage,
        params: &BuildParams,
        ctx: &mut ExecContext,
    ) -> Result<(), CoreError> {
        let failed = |source: RuntimeError| CoreError::StageFailed {
            stage: stage.kind,
            source,
        };

        for step in &stage.steps {
            if shutdown_requested() {
                return Err(CoreError::Interrupted(stage.kind));
            }
            match step {
                Step::Copy { source, dest } => {
                    let resolved = source.resolve(params, &|k: &str| ctx.lookup(k));
                    let path = ctx.resolve_source(&resolved);
                    backend.copy_in(&path, dest).map_err(failed)?;
                }
                Step::Run { invocations } => {
                    for inv in invocations {
                        if shutdown_requested() {
                            return Err(CoreError::Interrupted(stage.kind));
                        }
                        let command = inv.resolve(params);
                        backend.run(stage.kind, &command, ctx).map_err(failed)?;
                    }
                }
                Step::Env { .. } | Step::Shell { .. } => ctx.apply(step, params),
            }
        }
        Ok(())
    }

    /// Look up a build record by full id, unique prefix, or environment name.
    pub fn inspect(&self, id: &str) -> Result<BuildRecord, CoreError> {
        Ok(self.records.resolve(id)?)
    }

    pub fn list(&self) -> Result<Vec<BuildRecord>, CoreError> {
        if !self.layout.is_initialized() {
            return Ok(Vec::new());
        }
        Ok(self.records.list()?)
    }

    /// Delete a build record and its staging directory.
    pub fn remove(&self, id: &str) -> Result<BuildRecord, CoreError> {
        let _lock = StateLock::acquire(&self.layout.lock_file())?;
        let record = self.records.resolve(id)?;
        self.records.remove(&record.recipe_id)?;

        let staging = self.layout.staging_dir(&record.recipe_id);
        if staging.exists() {
            std::fs::remove_dir_all(&staging)?;
        }
        info!("removed build record {}", record.short_id);
        Ok(record)
    }
}
