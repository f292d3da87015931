use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Compiler toolchain installed when `[system]` is omitted.
pub const DEFAULT_SYSTEM_PACKAGES: &[&str] = &["build-essential"];
pub const DEFAULT_CONDA_DIR: &str = "/opt/conda";
const DEFAULT_ENV_SPEC: &str = "environment.yml";
const DEFAULT_REQUIREMENTS: &str = "requirements.txt";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported manifest_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("base.image must not be empty")]
    EmptyBaseImage,
    #[error("invalid system package '{name}': {reason}")]
    InvalidPackage { name: String, reason: &'static str },
    #[error("{field} '{path}' is outside the build context")]
    OutsideBuildContext { field: &'static str, path: String },
    #[error("invalid environment name '{name}': {reason}")]
    InvalidEnvName { name: String, reason: &'static str },
    #[error("{0} must not be empty")]
    EmptyPath(&'static str),
    #[error("activation.conda_dir must be an absolute path, got '{0}'")]
    RelativeCondaDir(String),
    #[error("unknown activation mode '{0}' (expected 'run' or 'path')")]
    UnknownActivationMode(String),
    #[error("failed to read {path}: {source}")]
    InputRead {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid environment specification {path}: {source}")]
    EnvSpec {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid requirement on line {line}: '{content}'")]
    InvalidRequirement { line: usize, content: String },
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ManifestV1 {
    pub manifest_version: u32,
    pub base: BaseSection,
    #[serde(default)]
    pub system: SystemSection,
    pub environment: EnvironmentSection,
    #[serde(default)]
    pub requirements: RequirementsSection,
    #[serde(default)]
    pub activation: ActivationSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BaseSection {
    pub image: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SystemSection {
    #[serde(default = "default_system_packages")]
    pub packages: Vec<String>,
}

impl Default for SystemSection {
    fn default() -> Self {
        Self {
            packages: default_system_packages(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentSection {
    #[serde(default = "default_env_spec")]
    pub spec: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RequirementsSection {
    #[serde(default = "default_requirements")]
    pub file: String,
}

impl Default for RequirementsSection {
    fn default() -> Self {
        Self {
            file: default_requirements(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ActivationSection {
    #[serde(default)]
    pub mode: ActivationMode,
    #[serde(default = "default_conda_dir")]
    pub conda_dir: String,
}

impl Default for ActivationSection {
    fn default() -> Self {
        Self {
            mode: ActivationMode::default(),
            conda_dir: default_conda_dir(),
        }
    }
}

/// How stage 3 enters the named environment.
///
/// `Run` prefixes every command with `conda run -n <name>` and leaves no trace
/// in the resulting image. `Path` rewrites `PATH` and the default shell, so
/// containers started from the image are already inside the environment.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActivationMode {
    #[default]
    Run,
    Path,
}

impl fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationMode::Run => write!(f, "run"),
            ActivationMode::Path => write!(f, "path"),
        }
    }
}

impl FromStr for ActivationMode {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "run" => Ok(ActivationMode::Run),
            "path" => Ok(ActivationMode::Path),
            other => Err(ManifestError::UnknownActivationMode(other.to_owned())),
        }
    }
}

/// Build-time parameter overrides supplied on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestOverrides {
    pub base_image: Option<String>,
    pub env_file: Option<String>,
    pub env_name: Option<String>,
    pub requirements: Option<String>,
    pub conda_dir: Option<String>,
    pub activation: Option<ActivationMode>,
}

impl ManifestOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl ManifestV1 {
    pub fn apply_overrides(&mut self, overrides: &ManifestOverrides) {
        if let Some(image) = &overrides.base_image {
            self.base.image.clone_from(image);
        }
        if let Some(spec) = &overrides.env_file {
            self.environment.spec.clone_from(spec);
        }
        if let Some(name) = &overrides.env_name {
            self.environment.name.clone_from(name);
        }
        if let Some(file) = &overrides.requirements {
            self.requirements.file.clone_from(file);
        }
        if let Some(dir) = &overrides.conda_dir {
            self.activation.conda_dir.clone_from(dir);
        }
        if let Some(mode) = overrides.activation {
            self.activation.mode = mode;
        }
    }
}

/// Conda rejects names containing path separators, whitespace, `:` or `#`.
pub fn validate_env_name(name: &str) -> Result<(), ManifestError> {
    if name.is_empty() || name.len() > 64 {
        return Err(ManifestError::InvalidEnvName {
            name: name.to_owned(),
            reason: "must be 1-64 characters",
        });
    }
    if name == "base" {
        return Err(ManifestError::InvalidEnvName {
            name: name.to_owned(),
            reason: "'base' is reserved by conda",
        });
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return Err(ManifestError::InvalidEnvName {
            name: name.to_owned(),
            reason: "must match [a-zA-Z0-9_.-]",
        });
    }
    Ok(())
}

/// A Debian package name, optionally qualified with `:arch` and pinned
/// with `=version`.
pub fn validate_system_package(spec: &str) -> Result<(), ManifestError> {
    let invalid = |reason| ManifestError::InvalidPackage {
        name: spec.to_owned(),
        reason,
    };
    let (qualified, version) = match spec.split_once('=') {
        Some((q, v)) => (q, Some(v)),
        None => (spec, None),
    };
    let (name, arch) = match qualified.split_once(':') {
        Some((n, a)) => (n, Some(a)),
        None => (qualified, None),
    };

    if name.len() < 2
        || !name.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        || !name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.'))
    {
        return Err(invalid("name must match [a-z0-9][a-z0-9+.-]+"));
    }
    if arch.is_some_and(|a| {
        a.is_empty() || !a.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    }) {
        return Err(invalid("architecture must match [a-z0-9-]+"));
    }
    if version.is_some_and(|v| {
        !v.starts_with(|c: char| c.is_ascii_digit())
            || !v
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'+' | b'~' | b'-' | b':'))
    }) {
        return Err(invalid("version must start with a digit and match [A-Za-z0-9.+~:-]"));
    }
    Ok(())
}

fn default_system_packages() -> Vec<String> {
    DEFAULT_SYSTEM_PACKAGES
        .iter()
        .map(|p| (*p).to_owned())
        .collect()
}

fn default_env_spec() -> String {
    DEFAULT_ENV_SPEC.to_owned()
}

fn default_requirements() -> String {
    DEFAULT_REQUIREMENTS.to_owned()
}

fn default_conda_dir() -> String {
    DEFAULT_CONDA_DIR.to_owned()
}

pub fn parse_manifest_str(input: &str) -> Result<ManifestV1, ManifestError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<ManifestV1, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}
