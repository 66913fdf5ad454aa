use super::{json_line, resolve_env, EXIT_SUCCESS};
use atelier_core::{CoreError, DeleteOutcome, Orchestrator};

pub async fn run(orchestrator: &Orchestrator, env: &str, json: bool) -> Result<u8, CoreError> {
    let target = resolve_env(orchestrator, env).await?;
    let outcome = orchestrator.delete(&target.id).await?;

    if json {
        let payload = serde_json::json!({
            "id": target.id,
            "name": target.name,
            "outcome": match outcome {
                DeleteOutcome::SoftDeleted => "soft_deleted",
                DeleteOutcome::HardDeleted => "hard_deleted",
            },
        });
        println!("{}", json_line(&payload)?);
    } else {
        match outcome {
            DeleteOutcome::SoftDeleted => println!(
                "environment {} moved to deleted (delete again to remove permanently)",
                target.name
            ),
            DeleteOutcome::HardDeleted => {
                println!("environment {} permanently removed", target.name);
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
