//! Manifest parsing, normalization, input file parsing, and recipe identity for Strata.
//!
//! This crate defines the schema layer: TOML manifest parsing (`ManifestV1`),
//! normalized representations (`NormalizedManifest`), the conda environment
//! specification (`EnvironmentSpec`) and pip requirements (`RequirementsFile`)
//! readers, and deterministic recipe identity computation (`compute_recipe_id`).

pub mod envspec;
pub mod identity;
pub mod manifest;
pub mod normalize;
pub mod requirements;
pub mod types;

pub use envspec::{parse_env_spec_file, parse_env_spec_str, CondaPackage, Dependency, EnvironmentSpec};
pub use identity::{compute_recipe_id, RecipeIdentity};
pub use manifest::{
    parse_manifest_file, parse_manifest_str, validate_env_name, validate_system_package,
    ActivationMode, ActivationSection,
    BaseSection, EnvironmentSection, ManifestError, ManifestOverrides, ManifestV1,
    RequirementsSection, SystemSection, DEFAULT_CONDA_DIR, DEFAULT_SYSTEM_PACKAGES,
};
pub use normalize::NormalizedManifest;
pub use requirements::{
    canonical_package_name, parse_requirements_file, parse_requirements_str, Requirement,
    RequirementsFile,
};
pub use types::{EnvName, RecipeId, ShortId};
