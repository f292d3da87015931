use super::{json_pretty, EXIT_SUCCESS};
use strata_core::Provisioner;

pub fn run(provisioner: &Provisioner, id: &str, json: bool) -> Result<u8, String> {
    let record = provisioner.remove(id).map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "status": "removed",
            "recipe_id": record.recipe_id,
            "env_name": record.env_name,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "removed build record {} ('{}')",
            record.short_id, record.env_name
        );
    }
    Ok(EXIT_SUCCESS)
}
