use super::{colorize_state, json_pretty, EXIT_SUCCESS};
use strata_core::Provisioner;

pub fn run(provisioner: &Provisioner, id: &str, json: bool) -> Result<u8, String> {
    let record = provisioner.inspect(id).map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&record)?);
    } else {
        println!("recipe_id:   {}", record.recipe_id);
        println!("short_id:    {}", record.short_id);
        println!("env_name:    {}", record.env_name);
        println!("state:       {}", colorize_state(&record.state.to_string()));
        println!("base_image:  {}", record.base_image);
        println!("activation:  {}", record.activation);
        println!("backend:     {}", record.backend);
        println!("run_count:   {}", record.run_count);
        println!("created_at:  {}", record.created_at);
        println!("updated_at:  {}", record.updated_at);
        println!("stages:");
        for stage in &record.stages {
            println!(
                "  {:<28} {}",
                stage.stage,
                colorize_state(&stage.status.to_string())
            );
            if let Some(err) = &stage.error {
                println!("    {err}");
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
