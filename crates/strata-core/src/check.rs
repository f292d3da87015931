//! Static checks over a manifest and its input files.
//!
//! Nothing here runs a package manager. The checks predict failures the
//! procedure itself would only surface mid-build, most importantly a
//! mismatch between the name declared inside the environment specification
//! and the name stage 3 targets.

use crate::engine::{load_manifest, read_input, Provisioner};
use crate::CoreError;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use strata_schema::{
    canonical_package_name, compute_recipe_id, parse_env_spec_str, parse_requirements_str,
    ManifestOverrides, NormalizedManifest, RecipeIdentity,
};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Short stable identifier, e.g. `env-name-mismatch`.
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub manifest: NormalizedManifest,
    /// Present when both input files could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<RecipeIdentity>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        !self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn has(&self, code: &str) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }

    fn push(&mut self, severity: Severity, code: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            code,
            message: message.into(),
        });
    }
}

impl Provisioner {
    /// Validate a manifest and its input files without executing anything.
    ///
    /// Manifest errors are returned as `Err`; problems with the input files
    /// are collected as diagnostics.
    pub fn check(
        &self,
        manifest_path: &Path,
        overrides: &ManifestOverrides,
    ) -> Result<CheckReport, CoreError> {
        let (manifest, context_dir) = load_manifest(manifest_path, overrides)?;
        let env_spec_path = manifest.env_spec_path(&context_dir);
        let requirements_path = manifest.requirements_path(&context_dir);

        let mut report = CheckReport {
            manifest,
            identity: None,
            diagnostics: Vec::new(),
        };

        check_base_image(&mut report);
        check_input_paths(&mut report);

        let env_spec = read_input(&env_spec_path);
        let requirements = read_input(&requirements_path);

        let mut env_pip = BTreeSet::new();
        match &env_spec {
            Ok(bytes) => check_env_spec(&mut report, bytes, &mut env_pip),
            Err(e) => report.push(Severity::Error, "env-spec-missing", e.to_string()),
        }
        match &requirements {
            Ok(bytes) => check_requirements(&mut report, bytes, &env_pip),
            Err(e) => report.push(Severity::Error, "requirements-missing", e.to_string()),
        }

        if let (Ok(spec), Ok(req)) = (&env_spec, &requirements) {
            report.identity = Some(compute_recipe_id(&report.manifest, spec, req)?);
        }

        report.diagnostics.sort_by(|a, b| b.severity.cmp(&a.severity));
        Ok(report)
    }
}

fn check_base_image(report: &mut CheckReport) {
    let image = report.manifest.base_image.clone();
    if image.contains("@sha256:") {
        return;
    }
    let last = image.rsplit('/').next().unwrap_or_default();
    let tag = last.split_once(':').map(|(_, t)| t);
    match tag {
        None | Some("latest") => report.push(
            Severity::Warning,
            "base-image-unpinned",
            format!("base image '{image}' is not pinned to a version tag or digest"),
        ),
        Some(_) => {}
    }
}

fn check_input_paths(report: &mut CheckReport) {
    let outside: Vec<(&'static str, String)> = report
        .manifest
        .inputs_outside_context()
        .into_iter()
        .map(|(field, path)| (field, path.to_owned()))
        .collect();
    for (field, path) in outside {
        report.push(
            Severity::Warning,
            "input-outside-context",
            format!("{field} '{path}' is outside the manifest directory; 'render' refuses it"),
        );
    }
}

fn check_env_spec(report: &mut CheckReport, bytes: &[u8], env_pip: &mut BTreeSet<String>) {
    let text = String::from_utf8_lossy(bytes);
    let spec = match parse_env_spec_str(&text) {
        Ok(spec) => spec,
        Err(e) => {
            report.push(
                Severity::Error,
                "env-spec-invalid",
                format!("environment specification is not valid YAML: {e}"),
            );
            return;
        }
    };

    let target = report.manifest.env_name.to_string();
    match spec.declared_name() {
        None => report.push(
            Severity::Error,
            "env-name-missing",
            "environment specification declares no 'name'; 'conda env create -f' needs one",
        ),
        Some(declared) if declared != target => report.push(
            Severity::Error,
            "env-name-mismatch",
            format!(
                "environment specification creates '{declared}' but stage 3 targets '{target}'; \
                 the secondary install would fail with 'environment not found'"
            ),
        ),
        Some(_) => {}
    }

    if spec.dependencies.is_empty() {
        report.push(
            Severity::Warning,
            "env-spec-empty",
            "environment specification declares no dependencies",
        );
    }
    if spec.channels.is_empty() {
        report.push(
            Severity::Info,
            "env-spec-default-channels",
            "no channels listed; conda falls back to its configured defaults",
        );
    }

    for pkg in spec.conda_packages() {
        if pkg.constraint.is_none() {
            report.push(
                Severity::Info,
                "conda-unpinned",
                format!("conda package '{}' has no version constraint", pkg.name),
            );
        }
    }

    for line in spec.pip_packages() {
        if let Ok(parsed) = parse_requirements_str(line) {
            env_pip.extend(parsed.names());
        }
    }
}

fn check_requirements(report: &mut CheckReport, bytes: &[u8], env_pip: &BTreeSet<String>) {
    let text = String::from_utf8_lossy(bytes);
    let parsed = match parse_requirements_str(&text) {
        Ok(parsed) => parsed,
        Err(e) => {
            report.push(Severity::Error, "requirements-invalid", e.to_string());
            return;
        }
    };

    if parsed.is_empty() {
        report.push(
            Severity::Warning,
            "requirements-empty",
            "requirements file lists no packages; stage 3 only upgrades pip",
        );
    }

    let mut seen = BTreeSet::new();
    for req in &parsed.entries {
        let name = canonical_package_name(&req.name);
        if !seen.insert(name.clone()) {
            report.push(
                Severity::Warning,
                "requirement-duplicate",
                format!("'{}' is listed more than once", req.name),
            );
        }
        if env_pip.contains(&name) {
            report.push(
                Severity::Warning,
                "requirement-overlap",
                format!(
                    "'{}' is also installed by the environment specification's pip block",
                    req.name
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PINNED_IMAGE: &str = "continuumio/miniconda3:24.1.2-0";
    const STATS_ENV: &str =
        "name: stats\nchannels:\n  - conda-forge\ndependencies:\n  - python=3.11\n";

    struct Project {
        dir: tempfile::TempDir,
    }

    impl Project {
        fn new(image: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(
                dir.path().join("strata.toml"),
                format!(
                    "manifest_version = 1\n[base]\nimage = \"{image}\"\n[environment]\nname = \"stats\"\n"
                ),
            )
            .unwrap();
            Self { dir }
        }

        fn file(self, name: &str, content: &str) -> Self {
            fs::write(self.dir.path().join(name), content).unwrap();
            self
        }

        fn inputs(self, env_yml: &str, requirements: &str) -> Self {
            self.file("environment.yml", env_yml)
                .file("requirements.txt", requirements)
        }

        fn check(&self) -> CheckReport {
            let state = tempfile::tempdir().unwrap();
            Provisioner::new(state.path())
                .check(
                    &self.dir.path().join("strata.toml"),
                    &ManifestOverrides::default(),
                )
                .unwrap()
        }
    }

    fn codes(report: &CheckReport) -> Vec<&'static str> {
        report.diagnostics.iter().map(|d| d.code).collect()
    }

    #[test]
    fn consistent_inputs_report_nothing() {
        let report = Project::new(PINNED_IMAGE)
            .inputs(STATS_ENV, "libfoo==1.2\n")
            .check();
        assert!(report.is_ok());
        assert!(report.diagnostics.is_empty(), "{:?}", codes(&report));
        assert!(report.identity.is_some());
    }

    #[test]
    fn name_mismatch_is_an_error() {
        let report = Project::new(PINNED_IMAGE)
            .inputs(&STATS_ENV.replace("name: stats", "name: other"), "libfoo\n")
            .check();
        assert!(report.has("env-name-mismatch"));
        assert!(!report.is_ok());
    }

    #[test]
    fn missing_declared_name_is_an_error() {
        let report = Project::new(PINNED_IMAGE)
            .inputs("channels:\n  - conda-forge\ndependencies:\n  - python=3.11\n", "libfoo\n")
            .check();
        assert!(report.has("env-name-missing"));
        assert!(!report.is_ok());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let report = Project::new(PINNED_IMAGE)
            .inputs("name: [unclosed\n", "libfoo\n")
            .check();
        assert!(report.has("env-spec-invalid"));
        assert!(!report.is_ok());
    }

    #[test]
    fn missing_input_files_are_errors_without_identity() {
        let report = Project::new(PINNED_IMAGE).check();
        assert!(report.has("env-spec-missing"));
        assert!(report.has("requirements-missing"));
        assert!(report.identity.is_none());
        assert!(!report.is_ok());
    }

    #[test]
    fn malformed_requirement_is_an_error() {
        let report = Project::new(PINNED_IMAGE)
            .inputs(STATS_ENV, "numpy\n?? what\n")
            .check();
        assert!(report.has("requirements-invalid"));
        assert!(!report.is_ok());
    }

    #[test]
    fn empty_requirements_only_warn() {
        let report = Project::new(PINNED_IMAGE)
            .inputs(STATS_ENV, "# nothing yet\n")
            .check();
        assert_eq!(codes(&report), vec!["requirements-empty"]);
        assert!(report.is_ok());
    }

    #[test]
    fn duplicate_requirements_warn_by_canonical_name() {
        let report = Project::new(PINNED_IMAGE)
            .inputs(STATS_ENV, "ruamel.yaml\nRuamel_YAML==0.18\n")
            .check();
        assert!(report.has("requirement-duplicate"));
        assert!(report.is_ok());
    }

    #[test]
    fn overlap_with_env_pip_block_warns() {
        let env = "name: stats\nchannels:\n  - conda-forge\ndependencies:\n  - python=3.11\n  - pip:\n      - rich==13.7\n";
        let report = Project::new(PINNED_IMAGE)
            .inputs(env, "Rich\n")
            .check();
        assert!(report.has("requirement-overlap"));
        assert!(report.is_ok());
    }

    #[test]
    fn bare_env_spec_reports_empty_and_default_channels() {
        let report = Project::new(PINNED_IMAGE)
            .inputs("name: stats\n", "libfoo\n")
            .check();
        assert!(report.has("env-spec-empty"));
        assert!(report.has("env-spec-default-channels"));
        assert!(report.is_ok());
    }

    #[test]
    fn unconstrained_conda_package_is_info() {
        let report = Project::new(PINNED_IMAGE)
            .inputs(
                "name: stats\nchannels:\n  - conda-forge\ndependencies:\n  - numpy\n",
                "libfoo\n",
            )
            .check();
        let diag = report
            .diagnostics
            .iter()
            .find(|d| d.code == "conda-unpinned")
            .unwrap();
        assert_eq!(diag.severity, Severity::Info);
    }

    #[test]
    fn base_image_pinning() {
        for image in [
            "continuumio/miniconda3",
            "continuumio/miniconda3:latest",
            "registry:5000/img",
        ] {
            let report = Project::new(image)
                .inputs(STATS_ENV, "libfoo\n")
                .check();
            assert!(report.has("base-image-unpinned"), "{image} must warn");
        }
        for image in [
            "registry:5000/img:1.0",
            "continuumio/miniconda3@sha256:0123abcd",
            PINNED_IMAGE,
        ] {
            let report = Project::new(image)
                .inputs(STATS_ENV, "libfoo\n")
                .check();
            assert!(!report.has("base-image-unpinned"), "{image} must pass");
        }
    }

    #[test]
    fn absolute_input_path_warns() {
        let project = Project::new(PINNED_IMAGE).file("environment.yml", STATS_ENV);
        let req = project.dir.path().join("reqs.txt");
        fs::write(&req, "libfoo\n").unwrap();
        let project = project.file(
            "strata.toml",
            &format!(
                "manifest_version = 1\n[base]\nimage = \"{PINNED_IMAGE}\"\n[environment]\nname = \"stats\"\n[requirements]\nfile = \"{}\"\n",
                req.display()
            ),
        );
        let report = project.check();
        assert!(report.has("input-outside-context"));
        assert!(report.is_ok());
    }

    #[test]
    fn diagnostics_are_sorted_errors_first() {
        let report = Project::new("continuumio/miniconda3")
            .inputs("name: other\n", "libfoo\nlibfoo\n")
            .check();
        let severities: Vec<Severity> = report.diagnostics.iter().map(|d| d.severity).collect();
        assert!(severities.len() >= 4, "{:?}", codes(&report));
        assert_eq!(severities[0], Severity::Error);
        assert!(severities.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(severities.last(), Some(&Severity::Info));
    }
}
