use super::{json_pretty, write_atomic, EXIT_SUCCESS};
use std::path::Path;
use strata_schema::{
    parse_manifest_str, validate_env_name, ActivationMode, ActivationSection, BaseSection,
    EnvironmentSection, ManifestV1, RequirementsSection, SystemSection,
};

const DEST_MANIFEST: &str = "strata.toml";
const DEST_ENV_SPEC: &str = "environment.yml";
const DEST_REQUIREMENTS: &str = "requirements.txt";

const ENV_SPEC_TEMPLATE: &str = include_str!("../../templates/environment.yml");
const REQUIREMENTS_TEMPLATE: &str = include_str!("../../templates/requirements.txt");

fn build_manifest(name: &str, image: &str, activation: ActivationMode) -> ManifestV1 {
    ManifestV1 {
        manifest_version: 1,
        base: BaseSection {
            image: image.to_owned(),
        },
        system: SystemSection::default(),
        environment: EnvironmentSection {
            spec: DEST_ENV_SPEC.to_owned(),
            name: name.to_owned(),
        },
        requirements: RequirementsSection::default(),
        activation: ActivationSection {
            mode: activation,
            ..ActivationSection::default()
        },
    }
}

fn ensure_can_write(dest: &Path, force: bool) -> Result<(), String> {
    if dest.exists() && !force {
        return Err(format!(
            "refusing to overwrite existing {} (pass --force)",
            dest.display()
        ));
    }
    Ok(())
}

pub fn run(
    dir: &Path,
    name: &str,
    image: &str,
    activation: ActivationMode,
    force: bool,
    json: bool,
) -> Result<u8, String> {
    validate_env_name(name).map_err(|e| format!("manifest error: {e}"))?;

    let manifest = build_manifest(name, image, activation);
    let toml =
        toml::to_string_pretty(&manifest).map_err(|e| format!("TOML serialization failed: {e}"))?;
    // The scaffold must load with the same parser `check` uses.
    parse_manifest_str(&toml)
        .and_then(|m| m.normalize())
        .map_err(|e| format!("manifest error: {e}"))?;

    let files = [
        (dir.join(DEST_MANIFEST), toml),
        (
            dir.join(DEST_ENV_SPEC),
            ENV_SPEC_TEMPLATE.replace("{name}", name),
        ),
        (dir.join(DEST_REQUIREMENTS), REQUIREMENTS_TEMPLATE.to_owned()),
    ];
    for (dest, _) in &files {
        ensure_can_write(dest, force)?;
    }
    std::fs::create_dir_all(dir).map_err(|e| format!("create {}: {e}", dir.display()))?;
    for (dest, content) in &files {
        write_atomic(dest, content)?;
    }

    let written: Vec<String> = files
        .iter()
        .map(|(p, _)| p.display().to_string())
        .collect();
    if json {
        let payload = serde_json::json!({
            "status": "written",
            "files": written,
            "env_name": name,
            "activation": activation,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for path in &written {
            println!("wrote {path}");
        }
        println!("environment '{name}' ({activation} activation)");
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_schema::parse_env_spec_str;

    #[test]
    fn scaffold_round_trips_through_parser() {
        let m = build_manifest("stats", "continuumio/miniconda3:24.1.2-0", ActivationMode::Path);
        let toml = toml::to_string_pretty(&m).unwrap();
        let parsed = parse_manifest_str(&toml).unwrap();
        assert_eq!(parsed, m);
    }

    #[test]
    fn env_spec_template_declares_the_name() {
        let spec = parse_env_spec_str(&ENV_SPEC_TEMPLATE.replace("{name}", "stats")).unwrap();
        assert_eq!(spec.declared_name(), Some("stats"));
    }

    #[test]
    fn refuses_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join(DEST_MANIFEST);
        std::fs::write(&dest, "x").unwrap();
        assert!(ensure_can_write(&dest, false).is_err());
        assert!(ensure_can_write(&dest, true).is_ok());
    }
}
