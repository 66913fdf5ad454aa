use super::{json_line, resolve_env, EXIT_SUCCESS};
use atelier_core::{CoreError, Orchestrator};
use futures::StreamExt;
use std::pin::pin;

pub async fn run(orchestrator: &Orchestrator, env: &str, json: bool) -> Result<u8, CoreError> {
    let target = resolve_env(orchestrator, env).await?;

    let mut stream = pin!(orchestrator.logs(&target.id, None));
    while let Some(event) = stream.next().await {
        if json {
            println!("{}", json_line(&event)?);
        } else {
            println!("{}", event.line);
        }
    }
    Ok(EXIT_SUCCESS)
}
