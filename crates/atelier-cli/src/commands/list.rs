use super::{colorize_status, json_pretty, short_id, EXIT_SUCCESS};
use atelier_core::{CoreError, FolderFilter, Orchestrator};

pub async fn run(
    orchestrator: &Orchestrator,
    folder: Option<&str>,
    deleted: bool,
    json: bool,
) -> Result<u8, CoreError> {
    let filter = match folder {
        Some(folder) => FolderFilter::Folder(folder.to_owned()),
        None if deleted => FolderFilter::Unfiltered,
        None => FolderFilter::All,
    };
    let records = orchestrator.list(filter).await?;

    if json {
        println!("{}", json_pretty(&records)?);
    } else if records.is_empty() {
        println!("no environments found");
    } else {
        println!("{:<14} {:<24} {:<10} IMAGE", "ID", "NAME", "STATUS");
        for record in &records {
            println!(
                "{:<14} {:<24} {:<10} {}",
                short_id(&record.id),
                record.name,
                colorize_status(&record.status.to_string()),
                record.image
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
