use super::{json_pretty, short_id, EXIT_SUCCESS};
use atelier_core::{CoreError, CreateRequest, Orchestrator};
use atelier_schema::{LaunchOptions, MountSpec, LEGACY_MOUNT_KEYS};
use std::collections::BTreeMap;
use std::path::Path;

/// Launch-related flags of the create command.
#[derive(Debug, Clone)]
pub struct CreateOpts {
    pub command: Option<String>,
    pub port: Option<u16>,
    pub gpu: bool,
    pub runtime: Option<String>,
    pub folders: Vec<String>,
}

pub async fn run(
    orchestrator: &Orchestrator,
    name: &str,
    image: &str,
    content: &Path,
    mounts: Option<&Path>,
    opts: CreateOpts,
    json: bool,
) -> Result<u8, CoreError> {
    let mount_spec = match mounts {
        Some(path) => MountSpec::load(path)?,
        None => default_mount_spec(),
    };

    let record = orchestrator
        .create(CreateRequest {
            name: name.to_owned(),
            image: image.to_owned(),
            content_path: content.to_path_buf(),
            mount_spec,
            command: opts.command,
            launch_options: LaunchOptions {
                port: opts.port,
                runtime: opts.runtime,
                gpu: opts.gpu,
                extra: BTreeMap::new(),
            },
            folder_ids: opts.folders,
        })
        .await?;

    if json {
        println!("{}", json_pretty(&record)?);
    } else {
        println!(
            "created environment {} ({})",
            record.name,
            short_id(&record.id)
        );
    }
    Ok(EXIT_SUCCESS)
}

/// Without an explicit specification, bind every well-known content
/// directory writable.
fn default_mount_spec() -> MountSpec {
    MountSpec::Legacy(
        LEGACY_MOUNT_KEYS
            .iter()
            .map(|key| ((*key).to_owned(), "mount".to_owned()))
            .collect(),
    )
}
