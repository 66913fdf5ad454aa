use super::{json_pretty, resolve_env, EXIT_SUCCESS};
use atelier_core::{CoreError, Orchestrator};

pub async fn run(orchestrator: &Orchestrator, env: &str, json: bool) -> Result<u8, CoreError> {
    let target = resolve_env(orchestrator, env).await?;
    let record = orchestrator.deactivate(&target.id).await?;

    if json {
        println!("{}", json_pretty(&record)?);
    } else {
        println!("environment {} stopped", record.name);
    }
    Ok(EXIT_SUCCESS)
}
