use crate::normalize::NormalizedManifest;
use crate::types::{RecipeId, ShortId};
use serde::Serialize;

/// Deterministic identity for a provisioning recipe.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RecipeIdentity {
    pub recipe_id: RecipeId,
    pub short_id: ShortId,
}

/// Compute the recipe identity from the normalized manifest and the raw bytes
/// of the two input files.
///
/// The input files are hashed verbatim: they are opaque to the procedure, so
/// any byte change (even a comment) yields a new identity. Two runs with equal
/// identities are expected to produce the same installed state, modulo
/// upstream package-index drift.
pub fn compute_recipe_id(
    normalized: &NormalizedManifest,
    env_spec: &[u8],
    requirements: &[u8],
) -> Result<RecipeIdentity, serde_json::Error> {
    let mut hasher = blake3::Hasher::new();

    hasher.update(normalized.canonical_json()?.as_bytes());

    for pkg in &normalized.system_packages {
        hasher.update(format!("pkg:{pkg}").as_bytes());
    }

    let spec_digest = blake3::hash(env_spec).to_hex().to_string();
    hasher.update(format!("envspec:{spec_digest}").as_bytes());

    let req_digest = blake3::hash(requirements).to_hex().to_string();
    hasher.update(format!("requirements:{req_digest}").as_bytes());

    hasher.update(format!("activation:{}", normalized.activation).as_bytes());

    let hex = hasher.finalize().to_hex().to_string();
    let short = hex[..12].to_owned();

    Ok(RecipeIdentity {
        recipe_id: RecipeId::new(hex),
        short_id: ShortId::new(short),
    })
}
