use crate::shell;
use serde::{Deserialize, Serialize};
use std::fmt;
use strata_schema::{ActivationMode, EnvName, NormalizedManifest};

/// In-context file names the two input files are copied to.
pub const CONTEXT_ENV_SPEC: &str = "environment.yml";
pub const CONTEXT_REQUIREMENTS: &str = "requirements.txt";

/// The three stages, in the only order they ever run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    SystemUpdate,
    EnvironmentMaterialization,
    SecondaryInstall,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [
        StageKind::SystemUpdate,
        StageKind::EnvironmentMaterialization,
        StageKind::SecondaryInstall,
    ];

    pub fn id(self) -> &'static str {
        match self {
            StageKind::SystemUpdate => "system-update",
            StageKind::EnvironmentMaterialization => "environment-materialization",
            StageKind::SecondaryInstall => "secondary-install",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            StageKind::SystemUpdate => "System update",
            StageKind::EnvironmentMaterialization => "Environment materialization",
            StageKind::SecondaryInstall => "Secondary dependency installation",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A build-time parameter. Rendered as `${NAME}` in the Dockerfile and
/// substituted with its value when executed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BuildParam {
    BaseImage,
    EnvFile,
    EnvName,
    RequirementsFile,
    CondaDir,
}

impl BuildParam {
    pub fn arg_name(self) -> &'static str {
        match self {
            BuildParam::BaseImage => "BASE_IMAGE",
            BuildParam::EnvFile => "ENV_FILE",
            BuildParam::EnvName => "ENV_NAME",
            BuildParam::RequirementsFile => "REQUIREMENTS_FILE",
            BuildParam::CondaDir => "CONDA_DIR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildParams {
    pub base_image: String,
    pub env_file: String,
    pub env_name: EnvName,
    pub requirements_file: String,
    pub conda_dir: String,
}

impl BuildParams {
    pub fn value(&self, param: BuildParam) -> &str {
        match param {
            BuildParam::BaseImage => &self.base_image,
            BuildParam::EnvFile => &self.env_file,
            BuildParam::EnvName => &self.env_name,
            BuildParam::RequirementsFile => &self.requirements_file,
            BuildParam::CondaDir => &self.conda_dir,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Lit(String),
    Param(BuildParam),
    /// Reference to a variable of the execution environment, e.g. `$PATH`.
    EnvRef(String),
    /// Literal text left unquoted so the shell expands it as a pathname pattern.
    Glob(String),
}

/// One shell word, built from literal text, parameters and variable references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Word(pub Vec<Segment>);

impl Word {
    pub fn lit(s: impl Into<String>) -> Self {
        Self(vec![Segment::Lit(s.into())])
    }

    pub fn param(p: BuildParam) -> Self {
        Self(vec![Segment::Param(p)])
    }

    pub fn glob(pattern: impl Into<String>) -> Self {
        Self(vec![Segment::Glob(pattern.into())])
    }

    /// Substitute parameters and look variable references up with `env`.
    /// Unset variables expand to the empty string, as in a POSIX shell.
    pub fn resolve(&self, params: &BuildParams, env: &dyn Fn(&str) -> Option<String>) -> String {
        let mut out = String::new();
        for seg in &self.0 {
            match seg {
                Segment::Lit(s) | Segment::Glob(s) => out.push_str(s),
                Segment::Param(p) => out.push_str(params.value(*p)),
                Segment::EnvRef(name) => out.push_str(&env(name).unwrap_or_default()),
            }
        }
        out
    }

    /// Resolve for a POSIX shell: substituted text is quoted, `Glob`
    /// segments are not.
    pub fn shell_text(&self, params: &BuildParams) -> String {
        if !self.0.iter().any(|seg| matches!(seg, Segment::Glob(_))) {
            return shell::quote(&self.resolve(params, &|_: &str| None));
        }
        let mut out = String::new();
        for seg in &self.0 {
            match seg {
                Segment::Glob(s) => out.push_str(s),
                Segment::Lit(s) => out.push_str(&shell::quote(s)),
                Segment::Param(p) => out.push_str(&shell::quote(params.value(*p))),
                Segment::EnvRef(_) => {}
            }
        }
        out
    }

    /// Render with Dockerfile variable syntax.
    pub fn render(&self) -> String {
        self.render_with(str::to_owned)
    }

    /// Render for a Dockerfile `RUN` line, where literal text reaches the
    /// shell and must be quoted.
    pub fn render_shell(&self) -> String {
        self.render_with(shell::quote)
    }

    fn render_with(&self, lit: impl Fn(&str) -> String) -> String {
        let mut out = String::new();
        for seg in &self.0 {
            match seg {
                Segment::Lit(s) => out.push_str(&lit(s)),
                Segment::Glob(s) => out.push_str(s),
                Segment::Param(p) => {
                    out.push_str("${");
                    out.push_str(p.arg_name());
                    out.push('}');
                }
                Segment::EnvRef(name) => {
                    out.push('$');
                    out.push_str(name);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invocation {
    pub words: Vec<Word>,
}

impl Invocation {
    fn new(program: &str, args: &[&str]) -> Self {
        let mut words = vec![Word::lit(program)];
        words.extend(args.iter().map(|a| Word::lit(*a)));
        Self { words }
    }

    fn push(mut self, word: Word) -> Self {
        self.words.push(word);
        self
    }

    fn extend(mut self, args: &[&str]) -> Self {
        self.words.extend(args.iter().map(|a| Word::lit(*a)));
        self
    }

    pub fn argv(&self, params: &BuildParams) -> Vec<String> {
        self.words
            .iter()
            .map(|w| w.resolve(params, &|_: &str| None))
            .collect()
    }

    pub fn resolve(&self, params: &BuildParams) -> ResolvedCommand {
        ResolvedCommand {
            argv: self.argv(params),
            script: self
                .words
                .iter()
                .map(|w| w.shell_text(params))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    pub fn render(&self) -> String {
        self.words
            .iter()
            .map(Word::render_shell)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// An invocation with its build parameters substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub argv: Vec<String>,
    /// The same command as shell text. Every word is quoted except
    /// pathname patterns.
    pub script: String,
}

impl ResolvedCommand {
    /// A command without pathname patterns.
    pub fn from_argv(argv: Vec<String>) -> Self {
        let script = shell::join(&argv);
        Self { argv, script }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Copy a file from the build context to an absolute destination.
    Copy { source: Word, dest: String },
    /// Run invocations in order, stopping at the first failure.
    Run { invocations: Vec<Invocation> },
    /// Persistently set a variable for every later step.
    Env { key: String, value: Word },
    /// Persistently replace the interpreter later `Run` steps go through.
    Shell { argv: Vec<Word> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stage {
    pub kind: StageKind,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionPlan {
    pub params: BuildParams,
    pub activation: ActivationMode,
    pub system_packages: Vec<String>,
    /// Directory inside the target the input files are copied to.
    pub context_root: String,
    pub stages: Vec<Stage>,
}

impl ProvisionPlan {
    pub fn stage(&self, kind: StageKind) -> Option<&Stage> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    pub fn step_count(&self) -> usize {
        self.stages.iter().map(|s| s.steps.len()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOptions {
    pub context_root: String,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            context_root: "/tmp".to_owned(),
        }
    }
}

/// Build the fixed System Update → Environment Materialization → Secondary
/// Install sequence for a manifest.
pub fn build_plan(manifest: &NormalizedManifest, options: &PlanOptions) -> ProvisionPlan {
    let root = options.context_root.trim_end_matches('/');
    let spec_dest = format!("{root}/{CONTEXT_ENV_SPEC}");
    let req_dest = format!("{root}/{CONTEXT_REQUIREMENTS}");

    let params = BuildParams {
        base_image: manifest.base_image.clone(),
        env_file: manifest.env_spec.clone(),
        env_name: manifest.env_name.clone(),
        requirements_file: manifest.requirements.clone(),
        conda_dir: manifest.conda_dir.clone(),
    };

    let stages = vec![
        system_update(&manifest.system_packages),
        environment_materialization(&spec_dest),
        secondary_install(manifest.activation, &manifest.env_name, &req_dest),
    ];

    ProvisionPlan {
        params,
        activation: manifest.activation,
        system_packages: manifest.system_packages.clone(),
        context_root: root.to_owned(),
        stages,
    }
}

fn system_update(packages: &[String]) -> Stage {
    let mut invocations = vec![Invocation::new("apt-get", &["update"])];
    if !packages.is_empty() {
        let names: Vec<&str> = packages.iter().map(String::as_str).collect();
        invocations.push(
            Invocation::new("apt-get", &["install", "-y", "--no-install-recommends"])
                .extend(&names),
        );
    }
    invocations.push(Invocation::new("apt-get", &["clean"]));
    invocations.push(Invocation::new("rm", &["-rf"]).push(Word::glob("/var/lib/apt/lists/*")));

    Stage {
        kind: StageKind::SystemUpdate,
        steps: vec![Step::Run { invocations }],
    }
}

fn environment_materialization(spec_dest: &str) -> Stage {
    Stage {
        kind: StageKind::EnvironmentMaterialization,
        steps: vec![
            Step::Copy {
                source: Word::param(BuildParam::EnvFile),
                dest: spec_dest.to_owned(),
            },
            Step::Run {
                invocations: vec![
                    Invocation::new("conda", &["update", "-n", "base", "-c", "defaults", "conda", "-y"]),
                    Invocation::new("conda", &["env", "create", "-f", spec_dest]),
                    Invocation::new("conda", &["clean", "-afy"]),
                ],
            },
        ],
    }
}

fn secondary_install(mode: ActivationMode, env_name: &EnvName, req_dest: &str) -> Stage {
    let copy = Step::Copy {
        source: Word::param(BuildParam::RequirementsFile),
        dest: req_dest.to_owned(),
    };
    let upgrade = ["pip", "install", "--upgrade", "pip"];
    let install = ["pip", "install", "--no-cache-dir", "-r", req_dest];

    let steps = match mode {
        ActivationMode::Run => {
            let in_env = || {
                Invocation::new("conda", &["run", "-n"]).push(Word::param(BuildParam::EnvName))
            };
            vec![
                copy,
                Step::Run {
                    invocations: vec![in_env().extend(&upgrade), in_env().extend(&install)],
                },
            ]
        }
        ActivationMode::Path => vec![
            copy,
            Step::Env {
                key: "PATH".to_owned(),
                value: Word(vec![
                    Segment::Param(BuildParam::CondaDir),
                    Segment::Lit("/envs/".to_owned()),
                    Segment::Param(BuildParam::EnvName),
                    Segment::Lit("/bin:".to_owned()),
                    Segment::EnvRef("PATH".to_owned()),
                ]),
            },
            Step::Shell {
                argv: ["conda", "run", "-n", env_name.as_str(), "/bin/bash", "-c"]
                    .iter()
                    .map(|a| Word::lit(*a))
                    .collect(),
            },
            Step::Run {
                invocations: vec![
                    Invocation::new(upgrade[0], &upgrade[1..]),
                    Invocation::new(install[0], &install[1..]),
                ],
            },
        ],
    };

    Stage {
        kind: StageKind::SecondaryInstall,
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_schema::parse_manifest_str;

    fn manifest(mode: &str) -> NormalizedManifest {
        parse_manifest_str(&format!(
            r#"
manifest_version = 1
[base]
image = "continuumio/miniconda3"
[environment]
name = "stats"
[activation]
mode = "{mode}"
"#
        ))
        .unwrap()
        .normalize()
        .unwrap()
    }

    fn rendered(stage: &Stage) -> Vec<String> {
        stage
            .steps
            .iter()
            .flat_map(|s| match s {
                Step::Run { invocations } => invocations.iter().map(Invocation::render).collect(),
                _ => Vec::new(),
            })
            .collect()
    }

    #[test]
    fn stages_are_in_fixed_order() {
        let plan = build_plan(&manifest("run"), &PlanOptions::default());
        let kinds: Vec<StageKind> = plan.stages.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, StageKind::ALL.to_vec());
    }

    #[test]
    fn system_update_installs_then_purges_index() {
        let plan = build_plan(&manifest("run"), &PlanOptions::default());
        let cmds = rendered(plan.stage(StageKind::SystemUpdate).unwrap());
        assert_eq!(cmds[0], "apt-get update");
        assert_eq!(
            cmds[1],
            "apt-get install -y --no-install-recommends build-essential"
        );
        assert_eq!(cmds.last().unwrap(), "rm -rf /var/lib/apt/lists/*");
    }

    #[test]
    fn empty_package_list_skips_install() {
        let m = parse_manifest_str(
            r#"
manifest_version = 1
[base]
image = "continuumio/miniconda3"
[system]
packages = []
[environment]
name = "stats"
"#,
        )
        .unwrap()
        .normalize()
        .unwrap();
        let plan = build_plan(&m, &PlanOptions::default());
        let cmds = rendered(plan.stage(StageKind::SystemUpdate).unwrap());
        assert!(cmds.iter().all(|c| !c.contains("install")));
    }

    #[test]
    fn materialization_copies_then_creates_from_file() {
        let plan = build_plan(&manifest("run"), &PlanOptions::default());
        let stage = plan.stage(StageKind::EnvironmentMaterialization).unwrap();
        assert!(matches!(
            &stage.steps[0],
            Step::Copy { dest, .. } if dest == "/tmp/environment.yml"
        ));
        let cmds = rendered(stage);
        assert_eq!(
            cmds,
            vec![
                "conda update -n base -c defaults conda -y",
                "conda env create -f /tmp/environment.yml",
                "conda clean -afy",
            ]
        );
    }

    #[test]
    fn run_activation_prefixes_every_command() {
        let plan = build_plan(&manifest("run"), &PlanOptions::default());
        let stage = plan.stage(StageKind::SecondaryInstall).unwrap();
        let cmds = rendered(stage);
        assert_eq!(
            cmds,
            vec![
                "conda run -n ${ENV_NAME} pip install --upgrade pip",
                "conda run -n ${ENV_NAME} pip install --no-cache-dir -r /tmp/requirements.txt",
            ]
        );
        assert!(!stage
            .steps
            .iter()
            .any(|s| matches!(s, Step::Env { .. } | Step::Shell { .. })));
    }

    #[test]
    fn path_activation_rewrites_path_and_shell() {
        let plan = build_plan(&manifest("path"), &PlanOptions::default());
        let stage = plan.stage(StageKind::SecondaryInstall).unwrap();

        let Step::Env { key, value } = &stage.steps[1] else {
            panic!("expected ENV step, got {:?}", stage.steps[1]);
        };
        assert_eq!(key, "PATH");
        assert_eq!(value.render(), "${CONDA_DIR}/envs/${ENV_NAME}/bin:$PATH");
        let resolved = value.resolve(&plan.params, &|k: &str| {
            (k == "PATH").then(|| "/usr/bin".to_owned())
        });
        assert_eq!(resolved, "/opt/conda/envs/stats/bin:/usr/bin");

        let Step::Shell { argv } = &stage.steps[2] else {
            panic!("expected SHELL step");
        };
        let argv: Vec<String> = argv.iter().map(Word::render).collect();
        assert_eq!(argv, vec!["conda", "run", "-n", "stats", "/bin/bash", "-c"]);

        assert_eq!(
            rendered(stage),
            vec![
                "pip install --upgrade pip",
                "pip install --no-cache-dir -r /tmp/requirements.txt",
            ]
        );
    }

    #[test]
    fn context_root_moves_copy_destinations() {
        let plan = build_plan(
            &manifest("run"),
            &PlanOptions {
                context_root: "/var/tmp/strata/".to_owned(),
            },
        );
        assert_eq!(plan.context_root, "/var/tmp/strata");
        let cmds = rendered(plan.stage(StageKind::EnvironmentMaterialization).unwrap());
        assert!(cmds.contains(&"conda env create -f /var/tmp/strata/environment.yml".to_owned()));
    }

    #[test]
    fn only_the_purge_pattern_stays_unquoted() {
        let plan = build_plan(
            &manifest("run"),
            &PlanOptions {
                context_root: "/srv/ctx*".to_owned(),
            },
        );
        let Step::Run { invocations } = &plan.stage(StageKind::SystemUpdate).unwrap().steps[0]
        else {
            panic!("expected RUN step");
        };
        let purge = invocations.last().unwrap().resolve(&plan.params);
        assert_eq!(purge.argv, vec!["rm", "-rf", "/var/lib/apt/lists/*"]);
        assert_eq!(purge.script, "rm -rf /var/lib/apt/lists/*");

        let cmds = rendered(plan.stage(StageKind::EnvironmentMaterialization).unwrap());
        assert!(cmds.contains(&"conda env create -f '/srv/ctx*/environment.yml'".to_owned()));
    }

    #[test]
    fn rendered_literals_are_shell_quoted() {
        let inv = Invocation::new("apt-get", &["install", "-y"]).extend(&["curl; touch /pwned"]);
        assert_eq!(inv.render(), "apt-get install -y 'curl; touch /pwned'");
        let params = build_plan(&manifest("run"), &PlanOptions::default()).params;
        assert_eq!(
            inv.resolve(&params).script,
            "apt-get install -y 'curl; touch /pwned'"
        );
    }

    #[test]
    fn argv_substitutes_parameters() {
        let plan = build_plan(&manifest("run"), &PlanOptions::default());
        let Step::Run { invocations } = &plan.stage(StageKind::SecondaryInstall).unwrap().steps[1]
        else {
            panic!("expected RUN step");
        };
        assert_eq!(
            invocations[0].argv(&plan.params),
            vec!["conda", "run", "-n", "stats", "pip", "install", "--upgrade", "pip"]
        );
    }
}
