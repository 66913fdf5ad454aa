use super::{json_pretty, resolve_env, EXIT_SUCCESS};
use atelier_core::{CoreError, Orchestrator, UpdateRequest};

pub async fn run(
    orchestrator: &Orchestrator,
    env: &str,
    new_name: &str,
    json: bool,
) -> Result<u8, CoreError> {
    let target = resolve_env(orchestrator, env).await?;
    let record = orchestrator
        .update(
            &target.id,
            UpdateRequest {
                name: Some(new_name.to_owned()),
                folder_ids: None,
            },
        )
        .await?;

    if json {
        println!("{}", json_pretty(&record)?);
    } else {
        println!("renamed {} to {}", target.name, record.name);
    }
    Ok(EXIT_SUCCESS)
}
