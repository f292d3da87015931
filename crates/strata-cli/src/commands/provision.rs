use super::{colorize_state, json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use std::path::Path;
use strata_core::{ProvisionOptions, ProvisionResult, Provisioner};
use strata_runtime::{select_backend, InstalledState, MockBackend, ProvisionBackend};

fn execute(
    provisioner: &Provisioner,
    manifest: &Path,
    options: &ProvisionOptions,
    backend: &dyn ProvisionBackend,
    json: bool,
) -> Result<ProvisionResult, String> {
    // Tool output from the host backend goes straight to the terminal.
    let pb = if json || backend.name() == "host" {
        None
    } else {
        Some(spinner("provisioning environment..."))
    };

    match provisioner.provision(manifest, options, backend) {
        Ok(r) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "environment provisioned");
            }
            Ok(r)
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "provisioning failed");
            }
            Err(e.to_string())
        }
    }
}

fn report(
    result: &ProvisionResult,
    installed: Option<&InstalledState>,
    json: bool,
) -> Result<(), String> {
    let record = &result.record;
    if json {
        let payload = serde_json::json!({
            "recipe_id": record.recipe_id,
            "short_id": record.short_id,
            "env_name": record.env_name,
            "activation": record.activation,
            "backend": record.backend,
            "state": record.state.to_string(),
            "run_count": record.run_count,
            "stages": record.stages,
            "installed": installed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "provisioned environment '{}' ({})",
            record.env_name, record.short_id
        );
        println!("recipe_id: {}", record.recipe_id);
        for stage in &record.stages {
            println!(
                "  {:<28} {}",
                stage.stage,
                colorize_state(&stage.status.to_string())
            );
        }
        if let Some(env) = installed.and_then(|s| s.envs.get(record.env_name.as_str())) {
            println!(
                "  {} conda packages, {} pip packages in '{}'",
                env.conda.len(),
                env.pip.len(),
                record.env_name
            );
        }
    }
    Ok(())
}

pub fn run(
    provisioner: &Provisioner,
    manifest: &Path,
    options: &ProvisionOptions,
    backend_name: &str,
    json: bool,
) -> Result<u8, String> {
    tracing::debug!(backend = backend_name, manifest = %manifest.display(), "provision requested");
    if backend_name == "mock" {
        let mock = MockBackend::new();
        let result = execute(provisioner, manifest, options, &mock, json)?;
        let installed = mock.snapshot().map_err(|e| e.to_string())?;
        report(&result, Some(&installed), json)?;
    } else {
        let backend = select_backend(backend_name).map_err(|e| format!("runtime error: {e}"))?;
        let result = execute(provisioner, manifest, options, backend.as_ref(), json)?;
        report(&result, None, json)?;
    }
    Ok(EXIT_SUCCESS)
}

pub fn dry_run(
    provisioner: &Provisioner,
    manifest: &Path,
    options: &ProvisionOptions,
    json: bool,
) -> Result<u8, String> {
    let commands = provisioner
        .dry_run(manifest, options)
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&commands)?);
    } else {
        for cmd in &commands {
            println!("[{}] {}", cmd.stage, cmd.command);
        }
    }
    Ok(EXIT_SUCCESS)
}
