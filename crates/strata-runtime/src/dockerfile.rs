//! Render a [`ProvisionPlan`] as a Dockerfile.
//!
//! Every build-time parameter becomes an `ARG` whose default is the manifest
//! value, so `docker build --build-arg ENV_NAME=...` keeps working. Stages map
//! one-to-one onto instruction groups; each `Run` step becomes a single `RUN`
//! with its invocations chained by `&&`.

use crate::plan::{BuildParam, Invocation, ProvisionPlan, Step, Word};
use std::fmt::Write as _;
use strata_schema::ActivationMode;

fn arg_default(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '"') {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_owned()
    }
}

fn declare_arg(out: &mut String, plan: &ProvisionPlan, param: BuildParam) {
    let _ = writeln!(
        out,
        "ARG {}={}",
        param.arg_name(),
        arg_default(plan.params.value(param))
    );
}

pub fn render_dockerfile(plan: &ProvisionPlan) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# syntax=docker/dockerfile:1");
    let _ = writeln!(out, "# Generated by strata. Activation mode: {}.", plan.activation);
    declare_arg(&mut out, plan, BuildParam::BaseImage);
    let _ = writeln!(out, "FROM ${{{}}}", BuildParam::BaseImage.arg_name());
    out.push('\n');

    declare_arg(&mut out, plan, BuildParam::EnvFile);
    declare_arg(&mut out, plan, BuildParam::EnvName);
    declare_arg(&mut out, plan, BuildParam::RequirementsFile);
    if plan.activation == ActivationMode::Path {
        declare_arg(&mut out, plan, BuildParam::CondaDir);
    }

    for stage in &plan.stages {
        out.push('\n');
        let _ = writeln!(out, "# {}", stage.kind.title());
        for step in &stage.steps {
            render_step(&mut out, step, plan);
        }
    }

    out
}

fn render_step(out: &mut String, step: &Step, plan: &ProvisionPlan) {
    match step {
        Step::Copy { source, dest } => {
            let _ = writeln!(out, "COPY {} {dest}", source.render());
        }
        Step::Env { key, value } => {
            let _ = writeln!(out, "ENV {key}={}", value.render());
        }
        Step::Shell { argv } => {
            // SHELL takes no variable substitution, so the values are baked in.
            let resolved: Vec<String> = argv
                .iter()
                .map(|w: &Word| w.resolve(&plan.params, &|_: &str| None))
                .collect();
            let json = serde_json::to_string(&resolved).unwrap_or_else(|_| "[]".to_owned());
            let _ = writeln!(out, "SHELL {}", json.replace("\",\"", "\", \""));
        }
        Step::Run { invocations } => {
            let lines: Vec<String> = invocations.iter().map(Invocation::render).collect();
            let _ = writeln!(out, "RUN {}", lines.join(" \\\n    && "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{build_plan, PlanOptions};
    use strata_schema::parse_manifest_str;

    fn plan(extra: &str) -> ProvisionPlan {
        let manifest = parse_manifest_str(&format!(
            r#"
manifest_version = 1
[base]
image = "continuumio/miniconda3:24.1.2-0"
[environment]
name = "stats"
{extra}
"#
        ))
        .unwrap()
        .normalize()
        .unwrap();
        build_plan(&manifest, &PlanOptions::default())
    }

    #[test]
    fn run_activation_dockerfile() {
        let text = render_dockerfile(&plan(""));
        let expected = r"# syntax=docker/dockerfile:1
# Generated by strata. Activation mode: run.
ARG BASE_IMAGE=continuumio/miniconda3:24.1.2-0
FROM ${BASE_IMAGE}

ARG ENV_FILE=environment.yml
ARG ENV_NAME=stats
ARG REQUIREMENTS_FILE=requirements.txt

# System update
RUN apt-get update \
    && apt-get install -y --no-install-recommends build-essential \
    && apt-get clean \
    && rm -rf /var/lib/apt/lists/*

# Environment materialization
COPY ${ENV_FILE} /tmp/environment.yml
RUN conda update -n base -c defaults conda -y \
    && conda env create -f /tmp/environment.yml \
    && conda clean -afy

# Secondary dependency installation
COPY ${REQUIREMENTS_FILE} /tmp/requirements.txt
RUN conda run -n ${ENV_NAME} pip install --upgrade pip \
    && conda run -n ${ENV_NAME} pip install --no-cache-dir -r /tmp/requirements.txt
";
        assert_eq!(text, expected);
    }

    #[test]
    fn path_activation_sets_path_and_shell() {
        let text = render_dockerfile(&plan("[activation]\nmode = \"path\""));
        assert!(text.contains("ARG CONDA_DIR=/opt/conda\n"));
        assert!(text.contains("ENV PATH=${CONDA_DIR}/envs/${ENV_NAME}/bin:$PATH\n"));
        assert!(text.contains(
            "SHELL [\"conda\", \"run\", \"-n\", \"stats\", \"/bin/bash\", \"-c\"]\n"
        ));
        assert!(text.contains(
            "RUN pip install --upgrade pip \\\n    && pip install --no-cache-dir -r /tmp/requirements.txt\n"
        ));
        assert!(!text.contains("conda run -n ${ENV_NAME}"));
    }

    #[test]
    fn run_activation_omits_conda_dir() {
        let text = render_dockerfile(&plan(""));
        assert!(!text.contains("CONDA_DIR"));
        assert!(!text.contains("SHELL"));
    }

    #[test]
    fn arg_defaults_with_spaces_are_quoted() {
        assert_eq!(arg_default("envs/my env.yml"), "\"envs/my env.yml\"");
        assert_eq!(arg_default("plain.yml"), "plain.yml");
    }
}
