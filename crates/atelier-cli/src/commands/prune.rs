use super::{json_line, EXIT_SUCCESS};
use atelier_core::{CoreError, Orchestrator};

pub async fn run(orchestrator: &Orchestrator, json: bool) -> Result<u8, CoreError> {
    let pruned = orchestrator.prune().await?;
    if json {
        println!("{}", json_line(&serde_json::json!({ "pruned": pruned }))?);
    } else if pruned == 0 {
        println!("nothing to prune");
    } else {
        println!("pruned {pruned} deleted environments");
    }
    Ok(EXIT_SUCCESS)
}
