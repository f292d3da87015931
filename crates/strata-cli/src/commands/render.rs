use super::{json_pretty, write_atomic, EXIT_SUCCESS};
use std::path::Path;
use strata_core::Provisioner;
use strata_schema::ManifestOverrides;

pub fn run(
    provisioner: &Provisioner,
    manifest: &Path,
    overrides: &ManifestOverrides,
    output: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let dockerfile = provisioner
        .render(manifest, overrides)
        .map_err(|e| e.to_string())?;

    match output {
        Some(dest) => {
            write_atomic(dest, &dockerfile)?;
            if json {
                let payload = serde_json::json!({
                    "status": "written",
                    "path": dest.display().to_string(),
                });
                println!("{}", json_pretty(&payload)?);
            } else {
                println!("wrote {}", dest.display());
            }
        }
        None if json => {
            let payload = serde_json::json!({ "dockerfile": dockerfile });
            println!("{}", json_pretty(&payload)?);
        }
        None => print!("{dockerfile}"),
    }
    Ok(EXIT_SUCCESS)
}
