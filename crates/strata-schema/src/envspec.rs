//! Reader for conda environment specification files (`environment.yml`).
//!
//! The provisioning procedure hands the file to conda untouched. Strata only
//! reads it to report diagnostics and to drive the mock backend.

use crate::manifest::ManifestError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct EnvironmentSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// One entry of `dependencies:`. Conda allows a nested `- pip: [...]` block
/// alongside plain match specs.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Dependency {
    Package(String),
    Pip { pip: Vec<String> },
}

/// A conda match spec split into its parts: `[channel::]name[constraint]`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CondaPackage {
    pub channel: Option<String>,
    pub name: String,
    pub constraint: Option<String>,
}

impl CondaPackage {
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        let (channel, rest) = match spec.split_once("::") {
            Some((c, r)) => (Some(c.trim().to_owned()), r.trim()),
            None => (None, spec),
        };
        let split = rest
            .find(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | ' '))
            .unwrap_or(rest.len());
        let name = rest[..split].trim().to_owned();
        let constraint = rest[split..].trim();
        Self {
            channel,
            name,
            constraint: if constraint.is_empty() {
                None
            } else {
                Some(constraint.to_owned())
            },
        }
    }
}

impl EnvironmentSpec {
    /// The environment name declared inside the file, if any.
    pub fn declared_name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }

    pub fn conda_packages(&self) -> Vec<CondaPackage> {
        self.dependencies
            .iter()
            .filter_map(|d| match d {
                Dependency::Package(spec) => Some(CondaPackage::parse(spec)),
                Dependency::Pip { .. } => None,
            })
            .filter(|p| !p.name.is_empty())
            .collect()
    }

    /// Requirements listed under the nested `pip:` block.
    pub fn pip_packages(&self) -> Vec<&str> {
        self.dependencies
            .iter()
            .flat_map(|d| match d {
                Dependency::Pip { pip } => pip.iter().map(String::as_str).collect(),
                Dependency::Package(_) => Vec::new(),
            })
            .collect()
    }
}

pub fn parse_env_spec_str(input: &str) -> Result<EnvironmentSpec, serde_yaml::Error> {
    serde_yaml::from_str(input)
}

pub fn parse_env_spec_file(path: &Path) -> Result<EnvironmentSpec, ManifestError> {
    let content = fs::read_to_string(path).map_err(|source| ManifestError::InputRead {
        path: path.display().to_string(),
        source,
    })?;
    parse_env_spec_str(&content).map_err(|source| ManifestError::EnvSpec {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATS: &str = r"
name: stats
channels:
  - conda-forge
  - defaults
dependencies:
  - python=3.11
  - conda-forge::pandas>=2.0
  - numpy 1.26.*
  - pip
  - pip:
      - seaborn==0.13.2
";

    #[test]
    fn parses_typical_environment_file() {
        let spec = parse_env_spec_str(STATS).unwrap();
        assert_eq!(spec.declared_name(), Some("stats"));
        assert_eq!(spec.channels, vec!["conda-forge", "defaults"]);
        assert_eq!(spec.dependencies.len(), 5);
        assert_eq!(spec.pip_packages(), vec!["seaborn==0.13.2"]);
    }

    #[test]
    fn splits_match_specs() {
        let spec = parse_env_spec_str(STATS).unwrap();
        let pkgs = spec.conda_packages();
        let names: Vec<&str> = pkgs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["python", "pandas", "numpy", "pip"]);

        assert_eq!(pkgs[0].constraint.as_deref(), Some("=3.11"));
        assert_eq!(pkgs[1].channel.as_deref(), Some("conda-forge"));
        assert_eq!(pkgs[1].constraint.as_deref(), Some(">=2.0"));
        assert_eq!(pkgs[2].constraint.as_deref(), Some("1.26.*"));
        assert_eq!(pkgs[3].constraint, None);
    }

    #[test]
    fn missing_name_is_none() {
        let spec = parse_env_spec_str("dependencies:\n  - python\n").unwrap();
        assert_eq!(spec.declared_name(), None);
        let blank = parse_env_spec_str("name: '  '\n").unwrap();
        assert_eq!(blank.declared_name(), None);
    }

    #[test]
    fn rejects_invalid_yaml() {
        assert!(parse_env_spec_str("name: [stats\ndependencies: {").is_err());
    }

    #[test]
    fn parse_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("environment.yml");
        fs::write(&path, "name: [unterminated").unwrap();
        let err = parse_env_spec_file(&path).unwrap_err();
        assert!(err.to_string().contains("environment.yml"));

        let missing = parse_env_spec_file(&dir.path().join("nope.yml")).unwrap_err();
        assert!(matches!(missing, ManifestError::InputRead { .. }));
    }
}
