use super::{json_line, EXIT_SUCCESS};
use atelier_core::{CoreError, Orchestrator};
use futures::StreamExt;
use std::pin::pin;
use tracing::debug;

pub async fn run(orchestrator: &Orchestrator, json: bool) -> Result<u8, CoreError> {
    let mut stream = pin!(orchestrator.engine_events());
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => {
                if json {
                    println!("{}", json_line(&event)?);
                } else {
                    let name = event.name.as_deref().unwrap_or("-");
                    println!(
                        "{} {} {} ({name})",
                        event.resource, event.action, event.actor_id
                    );
                }
            }
            Err(error) => {
                debug!(%error, "event stream ended");
                break;
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
