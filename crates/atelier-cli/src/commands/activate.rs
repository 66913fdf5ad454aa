use super::{json_pretty, resolve_env, EXIT_SUCCESS};
use atelier_core::{CoreError, Orchestrator};
use atelier_schema::DEFAULT_APP_PORT;

pub async fn run(
    orchestrator: &Orchestrator,
    env: &str,
    allow_multiple: bool,
    json: bool,
) -> Result<u8, CoreError> {
    let target = resolve_env(orchestrator, env).await?;
    let record = orchestrator.activate(&target.id, allow_multiple).await?;

    if json {
        println!("{}", json_pretty(&record)?);
    } else {
        let port = record.launch_options.port.unwrap_or(DEFAULT_APP_PORT);
        println!(
            "environment {} running on http://localhost:{port}",
            record.name
        );
    }
    Ok(EXIT_SUCCESS)
}
