use super::{colorize_state, json_pretty, EXIT_SUCCESS};
use strata_core::Provisioner;

pub fn run(provisioner: &Provisioner, json: bool) -> Result<u8, String> {
    let records = provisioner.list().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&records)?);
    } else if records.is_empty() {
        println!("no build records found");
    } else {
        println!(
            "{:<14} {:<16} {:<6} {:<26} UPDATED",
            "SHORT_ID", "ENV", "MODE", "STATE"
        );
        for r in &records {
            println!(
                "{:<14} {:<16} {:<6} {:<26} {}",
                r.short_id.as_str(),
                r.env_name.as_str(),
                r.activation.to_string(),
                colorize_state(&r.state.to_string()),
                r.updated_at
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
