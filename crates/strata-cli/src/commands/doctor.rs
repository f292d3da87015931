use super::{EXIT_FAILURE, EXIT_SUCCESS};
use std::path::Path;
use strata_core::StateLock;
use strata_store::{ProvisionState, RecordStore, StateLayout};

pub fn run(state_path: &Path, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_prereqs(&mut checks, &mut all_pass);

    let layout = StateLayout::new(state_path);
    if layout.is_initialized() {
        checks.push(Check::pass("state_exists", "State directory exists"));
        check_state(&layout, &mut checks, &mut all_pass);
        check_disk_space(state_path, &mut checks);
    } else {
        checks.push(Check::info(
            "state_exists",
            "State directory not initialized (will be created on first provision)",
        ));
    }

    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = strata_runtime::check_host_prereqs();
    if missing.is_empty() {
        checks.push(Check::pass(
            "host_prereqs",
            "Host backend prerequisites satisfied (sh, apt-get, conda)",
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "host_prereqs",
            &format!(
                "Missing prerequisites: {}",
                strata_runtime::format_missing(&missing)
            ),
        ));
    }
}

fn check_state(layout: &StateLayout, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match layout.verify_version() {
        Ok(()) => checks.push(Check::pass("state_version", "State format version valid")),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "state_version",
                &format!("State version check failed: {e}"),
            ));
        }
    }

    match StateLock::try_acquire(&layout.lock_file()) {
        Ok(Some(_)) => checks.push(Check::pass("state_lock", "State lock is free")),
        Ok(None) => checks.push(Check::warn(
            "state_lock",
            "State lock is held by another process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "state_lock",
                &format!("Cannot check state lock: {e}"),
            ));
        }
    }

    let records = RecordStore::new(layout.clone());
    match records.list() {
        Ok(list) => {
            let failed = list
                .iter()
                .filter(|r| r.state == ProvisionState::Failed)
                .count();
            let unfinished = list
                .iter()
                .filter(|r| {
                    !matches!(r.state, ProvisionState::Provisioned | ProvisionState::Failed)
                })
                .count();
            checks.push(Check::info(
                "records",
                &format!("{} build records ({failed} failed)", list.len()),
            ));
            if unfinished > 0 {
                checks.push(Check::warn(
                    "records_unfinished",
                    &format!("{unfinished} build records stopped mid-run (rerun provision)"),
                ));
            }
        }
        Err(e) => checks.push(Check::warn(
            "records",
            &format!("Cannot list build records: {e}"),
        )),
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("Strata Doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}

fn check_disk_space(state_path: &Path, checks: &mut Vec<Check>) {
    let Ok(c_path) = std::ffi::CString::new(state_path.to_string_lossy().as_bytes()) else {
        return;
    };

    // SAFETY: zeroed statvfs is a valid initial state for the struct.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and stat is a valid out pointer; the
    // struct is only read when the call returns 0.
    #[allow(unsafe_code, clippy::undocumented_unsafe_blocks)]
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
    if ret != 0 {
        return;
    }

    #[allow(clippy::unnecessary_cast)]
    let avail_mb = (stat.f_bavail as u64 * stat.f_frsize as u64) / (1024 * 1024);

    // conda environments with a compiler toolchain routinely need several GB.
    if avail_mb < 1024 {
        checks.push(Check::fail(
            "disk_space",
            &format!("Low disk space: {avail_mb} MB available"),
        ));
    } else if avail_mb < 5 * 1024 {
        checks.push(Check::warn(
            "disk_space",
            &format!("Disk space: {avail_mb} MB available (conda environments are large)"),
        ));
    } else {
        let free_gb = avail_mb / 1024;
        checks.push(Check::pass(
            "disk_space",
            &format!("Disk space: {free_gb} GB available"),
        ));
    }
}
