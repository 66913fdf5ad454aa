use super::{json_line, EXIT_FAILURE, EXIT_SUCCESS};
use atelier_core::{CoreError, Orchestrator, PullEvent};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::pin::pin;

pub async fn run(
    orchestrator: &Orchestrator,
    reference: &str,
    json: bool,
) -> Result<u8, CoreError> {
    let mut stream = pin!(orchestrator.pull(reference));

    if json {
        let mut failed = false;
        while let Some(event) = stream.next().await {
            println!("{}", json_line(&event)?);
            failed |= matches!(event, PullEvent::Error { .. });
        }
        return Ok(if failed { EXIT_FAILURE } else { EXIT_SUCCESS });
    }

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos:>3}% {msg}")
            .expect("valid template"),
    );
    bar.set_message(reference.to_owned());

    let mut failed = None;
    while let Some(event) = stream.next().await {
        match event {
            PullEvent::Progress { progress } => bar.set_position(u64::from(progress)),
            PullEvent::Status { .. } => bar.finish_with_message("complete"),
            PullEvent::Error { error } => {
                bar.abandon_with_message("failed");
                failed = Some(error);
            }
        }
    }

    match failed {
        Some(error) => {
            eprintln!("error: {error}");
            Ok(EXIT_FAILURE)
        }
        None => Ok(EXIT_SUCCESS),
    }
}
