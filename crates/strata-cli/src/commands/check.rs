use super::{json_pretty, EXIT_MANIFEST_ERROR, EXIT_SUCCESS};
use console::Style;
use std::path::Path;
use strata_core::{Provisioner, Severity};
use strata_schema::ManifestOverrides;

pub fn run(
    provisioner: &Provisioner,
    manifest: &Path,
    overrides: &ManifestOverrides,
    json: bool,
) -> Result<u8, String> {
    let report = provisioner
        .check(manifest, overrides)
        .map_err(|e| e.to_string())?;

    if json {
        let payload = serde_json::json!({
            "ok": report.is_ok(),
            "env_name": report.manifest.env_name,
            "activation": report.manifest.activation,
            "recipe_id": report.identity.as_ref().map(|i| &i.recipe_id),
            "diagnostics": report.diagnostics,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "environment '{}' ({} activation)",
            report.manifest.env_name, report.manifest.activation
        );
        if let Some(identity) = &report.identity {
            println!("recipe:  {}", identity.short_id);
        }
        for d in &report.diagnostics {
            let label = match d.severity {
                Severity::Error => Style::new().red().bold().apply_to("error"),
                Severity::Warning => Style::new().yellow().apply_to("warning"),
                Severity::Info => Style::new().dim().apply_to("info"),
            };
            println!("  {label}[{}]: {}", d.code, d.message);
        }
        if report.is_ok() {
            println!("inputs OK");
        }
    }

    Ok(if report.is_ok() {
        EXIT_SUCCESS
    } else {
        EXIT_MANIFEST_ERROR
    })
}
