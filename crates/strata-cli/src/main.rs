mod commands;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_MANIFEST_ERROR, EXIT_STAGE_FAILED, EXIT_STORE_ERROR};
use std::path::PathBuf;
use std::process::ExitCode;
use strata_core::{install_signal_handler, ProvisionOptions, Provisioner};
use strata_schema::{ActivationMode, ManifestOverrides};

#[derive(Debug, Parser)]
#[command(
    name = "strata",
    version,
    about = "Deterministic conda environment provisioner for container images"
)]
struct Cli {
    /// Path to the Strata state directory.
    #[arg(long, default_value = "~/.local/share/strata")]
    state: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Build-time parameter overrides, applied on top of the manifest.
#[derive(Debug, Clone, Default, Args)]
struct OverrideArgs {
    /// Override base.image.
    #[arg(long)]
    base_image: Option<String>,
    /// Override environment.spec (the environment specification file).
    #[arg(long)]
    env_file: Option<String>,
    /// Override environment.name (the environment stage 3 installs into).
    #[arg(long)]
    env_name: Option<String>,
    /// Override requirements.file.
    #[arg(long)]
    requirements: Option<String>,
    /// Override activation.conda_dir.
    #[arg(long)]
    conda_dir: Option<String>,
    /// Override activation.mode (run or path).
    #[arg(long)]
    activation: Option<ActivationMode>,
}

impl From<OverrideArgs> for ManifestOverrides {
    fn from(args: OverrideArgs) -> Self {
        Self {
            base_image: args.base_image,
            env_file: args.env_file,
            env_name: args.env_name,
            requirements: args.requirements,
            conda_dir: args.conda_dir,
            activation: args.activation,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scaffold strata.toml, environment.yml and requirements.txt.
    New {
        /// Name of the conda environment to create.
        #[arg(long, default_value = "app")]
        name: String,
        /// Base image reference.
        #[arg(long, default_value = "continuumio/miniconda3:24.1.2-0")]
        image: String,
        /// How stage 3 enters the environment.
        #[arg(long, default_value = "run")]
        activation: ActivationMode,
        /// Directory to write the files to.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// Overwrite existing files.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Validate a manifest and its input files without running anything.
    Check {
        /// Path to manifest TOML file.
        #[arg(default_value = "strata.toml")]
        manifest: PathBuf,
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Print the stage plan.
    Plan {
        /// Path to manifest TOML file.
        #[arg(default_value = "strata.toml")]
        manifest: PathBuf,
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Render the plan as a Dockerfile.
    Render {
        /// Path to manifest TOML file.
        #[arg(default_value = "strata.toml")]
        manifest: PathBuf,
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Run the three stages through a backend.
    Provision {
        /// Path to manifest TOML file.
        #[arg(default_value = "strata.toml")]
        manifest: PathBuf,
        /// Execution backend: host or mock.
        #[arg(long, default_value = "host")]
        backend: String,
        /// Print the commands that would run and exit.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Directory the input files are copied to (default: a staging
        /// directory under the state directory).
        #[arg(long)]
        context_root: Option<String>,
        #[command(flatten)]
        overrides: OverrideArgs,
    },
    /// Show a build record.
    Inspect {
        /// Recipe ID (full or prefix) or environment name.
        id: String,
    },
    /// List build records.
    List,
    /// Delete a build record.
    Remove {
        /// Recipe ID (full or prefix) or environment name.
        id: String,
    },
    /// Run diagnostic checks on the host and the state directory.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("STRATA_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let state_path = expand_tilde(&cli.state);
    let provisioner = Provisioner::new(&state_path);
    let json_output = cli.json;

    let needs_host = matches!(
        &cli.command,
        Commands::Provision { backend, dry_run: false, .. } if backend == "host"
    );
    if needs_host && std::env::var("STRATA_SKIP_PREREQS").as_deref() != Ok("1") {
        let missing = strata_runtime::check_host_prereqs();
        if !missing.is_empty() {
            eprintln!("error: {}", strata_runtime::format_missing(&missing));
            return ExitCode::from(EXIT_FAILURE);
        }
    }

    let result = match cli.command {
        Commands::New {
            name,
            image,
            activation,
            dir,
            force,
        } => commands::new::run(&dir, &name, &image, activation, force, json_output),
        Commands::Check {
            manifest,
            overrides,
        } => commands::check::run(&provisioner, &manifest, &overrides.into(), json_output),
        Commands::Plan {
            manifest,
            overrides,
        } => commands::plan::run(&provisioner, &manifest, &overrides.into(), json_output),
        Commands::Render {
            manifest,
            output,
            overrides,
        } => commands::render::run(
            &provisioner,
            &manifest,
            &overrides.into(),
            output.as_deref(),
            json_output,
        ),
        Commands::Provision {
            manifest,
            backend,
            dry_run,
            context_root,
            overrides,
        } => {
            let options = ProvisionOptions {
                overrides: overrides.into(),
                context_root,
            };
            if dry_run {
                commands::provision::dry_run(&provisioner, &manifest, &options, json_output)
            } else {
                commands::provision::run(&provisioner, &manifest, &options, &backend, json_output)
            }
        }
        Commands::Inspect { id } => commands::inspect::run(&provisioner, &id, json_output),
        Commands::List => commands::list::run(&provisioner, json_output),
        Commands::Remove { id } => commands::remove::run(&provisioner, &id, json_output),
        Commands::Doctor => commands::doctor::run(&state_path, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("manifest error:")
                || msg.starts_with("failed to parse manifest")
                || msg.starts_with("failed to read manifest")
            {
                EXIT_MANIFEST_ERROR
            } else if msg.starts_with("store error:") || msg.starts_with("state lock:") {
                EXIT_STORE_ERROR
            } else if msg.starts_with("stage '") {
                EXIT_STAGE_FAILED
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
