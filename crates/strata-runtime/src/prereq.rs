use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the tools the host backend drives.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_host_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("sh") {
        missing.push(MissingPrereq {
            name: "sh",
            purpose: "command interpreter for every provisioning step",
            install_hint: "a POSIX shell at /bin/sh (part of every base image)",
        });
    }

    if !command_exists("apt-get") {
        missing.push(MissingPrereq {
            name: "apt-get",
            purpose: "system update stage (build toolchain packages)",
            install_hint: "use a Debian or Ubuntu based image, e.g. continuumio/miniconda3",
        });
    }

    if !command_exists("conda") {
        missing.push(MissingPrereq {
            name: "conda",
            purpose: "environment materialization and 'conda run' activation",
            install_hint: "install Miniconda or Miniforge and put its bin/ on PATH",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nThe host backend runs apt-get, conda and pip directly on this machine.");
    msg
}
