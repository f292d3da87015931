use crate::manifest::{
    validate_env_name, validate_system_package, ActivationMode, ManifestError, ManifestV1,
};
use crate::types::EnvName;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Canonical, sorted, deduplicated representation of a parsed manifest.
///
/// All optional fields are resolved to defaults, system packages are sorted,
/// and names and paths are validated. This is the input to plan construction
/// and recipe identity hashing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedManifest {
    pub manifest_version: u32,
    pub base_image: String,
    pub system_packages: Vec<String>,
    pub env_spec: String,
    pub env_name: EnvName,
    pub requirements: String,
    pub activation: ActivationMode,
    pub conda_dir: String,
}

impl ManifestV1 {
    /// Normalize the manifest: validate fields, sort packages, resolve defaults.
    pub fn normalize(&self) -> Result<NormalizedManifest, ManifestError> {
        if self.manifest_version != 1 {
            return Err(ManifestError::UnsupportedVersion(self.manifest_version));
        }

        let base_image = self.base.image.trim().to_owned();
        if base_image.is_empty() {
            return Err(ManifestError::EmptyBaseImage);
        }

        let env_name = self.environment.name.trim().to_owned();
        validate_env_name(&env_name)?;

        let env_spec = non_empty_path(&self.environment.spec, "environment.spec")?;
        let requirements = non_empty_path(&self.requirements.file, "requirements.file")?;

        let conda_dir = self
            .activation
            .conda_dir
            .trim()
            .trim_end_matches('/')
            .to_owned();
        if !conda_dir.starts_with('/') {
            return Err(ManifestError::RelativeCondaDir(
                self.activation.conda_dir.clone(),
            ));
        }

        let system_packages = normalize_string_list(&self.system.packages);
        for pkg in &system_packages {
            validate_system_package(pkg)?;
        }

        Ok(NormalizedManifest {
            manifest_version: self.manifest_version,
            base_image,
            system_packages,
            env_spec,
            env_name: EnvName::new(env_name),
            requirements,
            activation: self.activation.mode,
            conda_dir,
        })
    }
}

impl NormalizedManifest {
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Path of the environment specification inside the build context.
    pub fn env_spec_path(&self, context_dir: &Path) -> PathBuf {
        resolve_in_context(context_dir, &self.env_spec)
    }

    /// Path of the secondary requirements file inside the build context.
    pub fn requirements_path(&self, context_dir: &Path) -> PathBuf {
        resolve_in_context(context_dir, &self.requirements)
    }

    /// Input files a container build cannot `COPY`: absolute paths and
    /// paths that climb out of the manifest directory with `..`.
    pub fn inputs_outside_context(&self) -> Vec<(&'static str, &str)> {
        [
            ("environment.spec", self.env_spec.as_str()),
            ("requirements.file", self.requirements.as_str()),
        ]
        .into_iter()
        .filter(|(_, path)| escapes_context(path))
        .collect()
    }

    /// Fail with [`ManifestError::OutsideBuildContext`] for the first input
    /// file reported by [`Self::inputs_outside_context`].
    pub fn require_inputs_in_context(&self) -> Result<(), ManifestError> {
        match self.inputs_outside_context().first() {
            Some((field, path)) => Err(ManifestError::OutsideBuildContext {
                field,
                path: (*path).to_owned(),
            }),
            None => Ok(()),
        }
    }

    /// `<conda_dir>/envs/<name>/bin`, prepended to `PATH` under path activation.
    pub fn env_bin_dir(&self) -> String {
        format!("{}/envs/{}/bin", self.conda_dir, self.env_name)
    }
}

fn resolve_in_context(context_dir: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        context_dir.join(p)
    }
}

fn escapes_context(path: &str) -> bool {
    let mut depth: usize = 0;
    for component in Path::new(path).components() {
        match component {
            Component::RootDir | Component::Prefix(_) => return true,
            Component::ParentDir => {
                if depth == 0 {
                    return true;
                }
                depth -= 1;
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
        }
    }
    false
}

fn non_empty_path(raw: &str, field: &'static str) -> Result<String, ManifestError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ManifestError::EmptyPath(field));
    }
    Ok(trimmed.to_owned())
}

fn normalize_string_list(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = values
        .iter()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
