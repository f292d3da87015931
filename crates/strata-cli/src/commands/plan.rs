use super::{json_pretty, EXIT_SUCCESS};
use std::path::Path;
use strata_core::Provisioner;
use strata_runtime::{Invocation, Step, Word};
use strata_schema::ManifestOverrides;

fn describe(step: &Step) -> Vec<String> {
    match step {
        Step::Copy { source, dest } => vec![format!("copy  {} -> {dest}", source.render())],
        Step::Env { key, value } => vec![format!("env   {key}={}", value.render())],
        Step::Shell { argv } => {
            let words: Vec<String> = argv.iter().map(Word::render).collect();
            vec![format!("shell {}", words.join(" "))]
        }
        Step::Run { invocations } => invocations
            .iter()
            .map(|inv: &Invocation| format!("run   {}", inv.render()))
            .collect(),
    }
}

pub fn run(
    provisioner: &Provisioner,
    manifest: &Path,
    overrides: &ManifestOverrides,
    json: bool,
) -> Result<u8, String> {
    let plan = provisioner
        .plan(manifest, overrides)
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&plan)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("base image:  {}", plan.params.base_image);
    println!("environment: {}", plan.params.env_name);
    println!("activation:  {}", plan.activation);
    for (idx, stage) in plan.stages.iter().enumerate() {
        println!("\n{}. {} ({})", idx + 1, stage.kind.title(), stage.kind);
        for step in &stage.steps {
            for line in describe(step) {
                println!("   {line}");
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
