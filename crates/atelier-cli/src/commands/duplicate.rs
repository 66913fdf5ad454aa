use super::{json_pretty, resolve_env, short_id, EXIT_SUCCESS};
use atelier_core::{CoreError, DuplicateRequest, Orchestrator};
use atelier_schema::MountSpec;
use std::path::Path;

pub async fn run(
    orchestrator: &Orchestrator,
    source: &str,
    name: &str,
    content: Option<&Path>,
    mounts: Option<&Path>,
    folders: Vec<String>,
    json: bool,
) -> Result<u8, CoreError> {
    let src = resolve_env(orchestrator, source).await?;

    let mount_spec = match mounts {
        Some(path) => MountSpec::load(path)?,
        None => src.mount_spec.clone(),
    };
    let request = DuplicateRequest {
        name: name.to_owned(),
        content_path: content
            .map(Path::to_path_buf)
            .unwrap_or_else(|| src.content_path.clone()),
        mount_spec,
        command: src.command.clone(),
        launch_options: src.launch_options.clone(),
        folder_ids: folders,
    };

    let record = orchestrator.duplicate(&src.id, request).await?;
    if json {
        println!("{}", json_pretty(&record)?);
    } else {
        println!(
            "duplicated {} as {} ({})",
            src.name,
            record.name,
            short_id(&record.id)
        );
    }
    Ok(EXIT_SUCCESS)
}
