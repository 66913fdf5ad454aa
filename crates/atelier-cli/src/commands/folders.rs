use super::{json_pretty, resolve_env, EXIT_SUCCESS};
use atelier_core::{CoreError, Orchestrator, UpdateRequest};

pub async fn run(
    orchestrator: &Orchestrator,
    env: &str,
    tags: Vec<String>,
    json: bool,
) -> Result<u8, CoreError> {
    let target = resolve_env(orchestrator, env).await?;
    let record = orchestrator
        .update(
            &target.id,
            UpdateRequest {
                name: None,
                folder_ids: Some(tags),
            },
        )
        .await?;

    if json {
        println!("{}", json_pretty(&record)?);
    } else if record.folder_ids.is_empty() {
        println!("cleared folders of {}", record.name);
    } else {
        println!(
            "environment {} now in: {}",
            record.name,
            record.folder_ids.join(", ")
        );
    }
    Ok(EXIT_SUCCESS)
}
