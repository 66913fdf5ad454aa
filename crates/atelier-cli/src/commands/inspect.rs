use super::{colorize_status, json_pretty, resolve_env, EXIT_SUCCESS};
use atelier_core::{CoreError, Orchestrator};

pub async fn run(orchestrator: &Orchestrator, env: &str, json: bool) -> Result<u8, CoreError> {
    let record = resolve_env(orchestrator, env).await?;
    if json {
        println!("{}", json_pretty(&record)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("id:           {}", record.id);
    println!("name:         {}", record.name);
    println!("image:        {}", record.image);
    println!(
        "status:       {}",
        colorize_status(&record.status.to_string())
    );
    println!("content_path: {}", record.content_path.display());
    println!(
        "command:      {}",
        record.command.as_deref().unwrap_or("(image default)")
    );
    println!(
        "port:         {}",
        record
            .launch_options
            .port
            .map_or_else(|| "(default)".to_owned(), |p| p.to_string())
    );
    println!("gpu:          {}", record.launch_options.gpu);
    println!("duplicate:    {}", record.duplicate);
    println!(
        "folders:      {}",
        if record.folder_ids.is_empty() {
            "(none)".to_owned()
        } else {
            record.folder_ids.join(", ")
        }
    );
    if let Some(created) = record.metadata.created_at {
        println!("created_at:   {created}");
    }
    if let Some(deleted) = record.metadata.deleted_at {
        println!("deleted_at:   {deleted}");
    }
    Ok(EXIT_SUCCESS)
}
