use crate::backend::{ExecContext, ProvisionBackend};
use crate::plan::{ResolvedCommand, StageKind};
use crate::RuntimeError;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;
use strata_schema::{
    canonical_package_name, parse_env_spec_str, parse_requirements_str, CondaPackage,
};

const MOCK_VERSION: &str = "0.0.0-mock";

/// Installed state of one named conda environment.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct InstalledEnv {
    pub conda: BTreeMap<String, String>,
    pub pip: BTreeMap<String, String>,
}

/// Snapshot of everything the mock has "installed".
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct InstalledState {
    pub os_packages: BTreeSet<String>,
    pub envs: BTreeMap<String, InstalledEnv>,
    /// pip packages installed outside any named environment.
    pub global_pip: BTreeMap<String, String>,
    /// Files present in the build context, keyed by destination.
    pub files: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct MockState {
    installed: InstalledState,
    contents: BTreeMap<String, String>,
    apt_index_fresh: bool,
    pip_cache_used: bool,
    commands: Vec<String>,
}

/// In-memory stand-in for apt-get, conda and pip.
///
/// Interprets the argv the engine hands to `run` and records the resulting
/// package sets, so provisioning can be exercised end to end without a
/// container engine or network. Packages registered with
/// [`with_unavailable`](Self::with_unavailable) fail to resolve.
pub struct MockBackend {
    state: Mutex<MockState>,
    unavailable: BTreeSet<String>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            unavailable: BTreeSet::new(),
        }
    }
}

fn failed(argv: &[String], code: i32, detail: impl Into<String>) -> RuntimeError {
    RuntimeError::StepFailed {
        command: argv.join(" "),
        code: Some(code),
        detail: detail.into(),
    }
}

/// Where a pip invocation installs to.
enum PipTarget {
    Env(String),
    Global,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_unavailable<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unavailable.extend(packages.into_iter().map(|p| {
            let p: String = p.into();
            canonical_package_name(&p)
        }));
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::StepFailed {
                command: "mock".to_owned(),
                code: None,
                detail: format!("mutex poisoned: {e}"),
            })
    }

    pub fn snapshot(&self) -> Result<InstalledState, RuntimeError> {
        Ok(self.lock()?.installed.clone())
    }

    /// Every command line `run` received, in order.
    pub fn commands(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.lock()?.commands.clone())
    }

    /// Whether any pip install ran without `--no-cache-dir`.
    pub fn pip_cache_used(&self) -> Result<bool, RuntimeError> {
        Ok(self.lock()?.pip_cache_used)
    }

    fn is_unavailable(&self, name: &str) -> bool {
        self.unavailable.contains(&canonical_package_name(name))
    }

    fn dispatch(
        &self,
        state: &mut MockState,
        argv: &[String],
        ctx: &ExecContext,
    ) -> Result<(), RuntimeError> {
        let Some(program) = argv.first() else {
            return Err(failed(argv, 127, "empty command"));
        };
        match program.as_str() {
            "apt-get" => self.apt_get(state, argv),
            "rm" => {
                if argv.iter().any(|a| a.starts_with("/var/lib/apt/lists")) {
                    state.apt_index_fresh = false;
                }
                Ok(())
            }
            "conda" => self.conda(state, argv, ctx),
            "pip" | "pip3" => {
                let target = pip_target(state, ctx)?;
                self.pip(state, argv, &target)
            }
            other => Err(failed(argv, 127, format!("{other}: command not found"))),
        }
    }

    fn apt_get(&self, state: &mut MockState, argv: &[String]) -> Result<(), RuntimeError> {
        match argv.get(1).map(String::as_str) {
            Some("update") => {
                state.apt_index_fresh = true;
                Ok(())
            }
            Some("clean") => Ok(()),
            Some("install") => {
                let packages: Vec<&String> =
                    argv[2..].iter().filter(|a| !a.starts_with('-')).collect();
                if !state.apt_index_fresh && !packages.is_empty() {
                    return Err(failed(
                        argv,
                        100,
                        format!("Unable to locate package {}", packages[0]),
                    ));
                }
                if let Some(missing) = packages.iter().find(|p| self.is_unavailable(p)) {
                    return Err(failed(argv, 100, format!("Unable to locate package {missing}")));
                }
                state
                    .installed
                    .os_packages
                    .extend(packages.into_iter().cloned());
                Ok(())
            }
            _ => Err(failed(argv, 100, "unsupported apt-get invocation")),
        }
    }

    fn conda(
        &self,
        state: &mut MockState,
        argv: &[String],
        ctx: &ExecContext,
    ) -> Result<(), RuntimeError> {
        let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
        match args.as_slice() {
            ["update", ..] | ["clean", ..] => Ok(()),
            ["env", "create", "-f", file] | ["env", "create", "--file", file] => {
                self.env_create(state, argv, file)
            }
            ["run", "-n", name, rest @ ..] | ["run", "--name", name, rest @ ..] => {
                if !state.installed.envs.contains_key(*name) {
                    return Err(RuntimeError::EnvironmentNotFound((*name).to_owned()));
                }
                let inner: Vec<String> = rest.iter().map(|s| (*s).to_owned()).collect();
                match inner.first().map(String::as_str) {
                    Some("pip" | "pip3") => {
                        self.pip(state, &inner, &PipTarget::Env((*name).to_owned()))
                    }
                    Some(_) => self.dispatch(state, &inner, ctx),
                    None => Err(failed(argv, 1, "conda run: no command given")),
                }
            }
            _ => Err(failed(argv, 1, "unsupported conda invocation")),
        }
    }

    fn env_create(
        &self,
        state: &mut MockState,
        argv: &[String],
        file: &str,
    ) -> Result<(), RuntimeError> {
        let Some(content) = state.contents.get(file) else {
            return Err(failed(argv, 1, format!("EnvironmentFileNotFound: '{file}'")));
        };
        let spec = parse_env_spec_str(content)
            .map_err(|e| failed(argv, 1, format!("EnvironmentFileNotValid: {e}")))?;
        let Some(name) = spec.declared_name().map(str::to_owned) else {
            return Err(failed(argv, 1, "CondaValueError: environment name is required"));
        };
        if state.installed.envs.contains_key(&name) {
            return Err(failed(
                argv,
                1,
                format!("CondaValueError: prefix already exists: envs/{name}"),
            ));
        }

        let mut env = InstalledEnv::default();
        for pkg in spec.conda_packages() {
            if self.is_unavailable(&pkg.name) {
                return Err(failed(
                    argv,
                    1,
                    format!("PackagesNotFoundError: {}", pkg.name),
                ));
            }
            env.conda.insert(pkg.name.clone(), conda_version(&pkg));
        }
        if !spec.pip_packages().is_empty() {
            let nested = spec.pip_packages().join("\n");
            install_requirements(self, &mut env.pip, argv, &nested)?;
        }
        state.installed.envs.insert(name, env);
        Ok(())
    }

    fn pip(
        &self,
        state: &mut MockState,
        argv: &[String],
        target: &PipTarget,
    ) -> Result<(), RuntimeError> {
        if argv.get(1).map(String::as_str) != Some("install") {
            return Err(failed(argv, 2, "unsupported pip invocation"));
        }
        let rest = &argv[2..];
        let upgrade = rest.iter().any(|a| a == "--upgrade" || a == "-U");
        let no_cache = rest.iter().any(|a| a == "--no-cache-dir");

        let mut lines = Vec::new();
        let mut iter = rest.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-r" | "--requirement" => {
                    let Some(file) = iter.next() else {
                        return Err(failed(argv, 2, "-r option requires 1 argument"));
                    };
                    let Some(content) = state.contents.get(file.as_str()) else {
                        return Err(failed(
                            argv,
                            1,
                            format!("Could not open requirements file: {file}"),
                        ));
                    };
                    lines.push(content.clone());
                }
                a if a.starts_with('-') => {}
                name => lines.push(name.to_owned()),
            }
        }

        if !no_cache && !(upgrade && lines.iter().all(|l| l.trim() == "pip")) {
            state.pip_cache_used = true;
        }

        let installed = match target {
            PipTarget::Env(name) => match state.installed.envs.get_mut(name) {
                Some(env) => &mut env.pip,
                None => return Err(RuntimeError::EnvironmentNotFound(name.clone())),
            },
            PipTarget::Global => &mut state.installed.global_pip,
        };
        install_requirements(self, installed, argv, &lines.join("\n"))
    }
}

fn conda_version(pkg: &CondaPackage) -> String {
    pkg.constraint
        .as_deref()
        .map(|c| c.trim_start_matches(['=', ' ']))
        .filter(|c| !c.is_empty() && !c.starts_with(['<', '>', '!', '~']))
        .map_or_else(|| MOCK_VERSION.to_owned(), str::to_owned)
}

fn install_requirements(
    backend: &MockBackend,
    installed: &mut BTreeMap<String, String>,
    argv: &[String],
    requirements: &str,
) -> Result<(), RuntimeError> {
    let parsed = parse_requirements_str(requirements)
        .map_err(|e| failed(argv, 1, format!("Invalid requirement: {e}")))?;
    for req in &parsed.entries {
        if backend.is_unavailable(&req.name) {
            return Err(failed(
                argv,
                1,
                format!(
                    "No matching distribution found for {}{}",
                    req.name,
                    req.specifier.as_deref().unwrap_or("")
                ),
            ));
        }
    }
    for req in &parsed.entries {
        let version = req.pinned_version().unwrap_or(MOCK_VERSION).to_owned();
        installed.insert(req.canonical_name(), version);
    }
    Ok(())
}

/// `conda run -n <env>` as interpreter wins; otherwise the first
/// `<prefix>/envs/<env>/bin` entry on `PATH` that names an existing env.
fn pip_target(state: &MockState, ctx: &ExecContext) -> Result<PipTarget, RuntimeError> {
    let shell: Vec<&str> = ctx.shell.iter().map(String::as_str).collect();
    if let ["conda", "run", "-n" | "--name", name, ..] = shell.as_slice() {
        if !state.installed.envs.contains_key(*name) {
            return Err(RuntimeError::EnvironmentNotFound((*name).to_owned()));
        }
        return Ok(PipTarget::Env((*name).to_owned()));
    }

    if let Some(path) = ctx.env.get("PATH") {
        for entry in path.split(':') {
            let Some(rest) = entry.strip_suffix("/bin") else {
                continue;
            };
            let Some((_, name)) = rest.rsplit_once("/envs/") else {
                continue;
            };
            if state.installed.envs.contains_key(name) {
                return Ok(PipTarget::Env(name.to_owned()));
            }
        }
    }
    Ok(PipTarget::Global)
}

impl ProvisionBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn copy_in(&self, source: &Path, dest: &str) -> Result<(), RuntimeError> {
        let content = std::fs::read_to_string(source).map_err(|e| RuntimeError::CopyFailed {
            source_path: source.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut state = self.lock()?;
        state.contents.insert(dest.to_owned(), content);
        state.installed.files.insert(dest.to_owned());
        Ok(())
    }

    fn run(
        &self,
        _stage: StageKind,
        command: &ResolvedCommand,
        ctx: &ExecContext,
    ) -> Result<(), RuntimeError> {
        let mut state = self.lock()?;
        state.commands.push(command.argv.join(" "));
        self.dispatch(&mut state, &command.argv, ctx)
    }
}
