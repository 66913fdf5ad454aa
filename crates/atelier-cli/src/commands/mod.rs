pub mod activate;
pub mod completions;
pub mod create;
pub mod deactivate;
pub mod delete;
pub mod duplicate;
pub mod events;
pub mod folders;
pub mod inspect;
pub mod list;
pub mod logs;
pub mod prune;
pub mod pull;
pub mod rename;

use atelier_core::{CoreError, FolderFilter, Orchestrator};
use atelier_schema::EnvironmentRecord;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, CoreError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CoreError::Internal(format!("JSON serialization failed: {e}")))
}

pub fn json_line(value: &impl serde::Serialize) -> Result<String, CoreError> {
    serde_json::to_string(value)
        .map_err(|e| CoreError::Internal(format!("JSON serialization failed: {e}")))
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "running" => Style::new().cyan().bold().apply_to(status).to_string(),
        "created" => Style::new().yellow().apply_to(status).to_string(),
        "stopped" | "exited" => Style::new().blue().apply_to(status).to_string(),
        "dead" => Style::new().red().apply_to(status).to_string(),
        "paused" | "restarting" => Style::new().dim().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

pub fn short_id(id: &str) -> &str {
    &id[..12.min(id.len())]
}

/// Resolve user input to one environment record: exact id, exact name, then
/// unique id prefix. Soft-deleted records resolve too, so delete can reach
/// them.
pub async fn resolve_env(
    orchestrator: &Orchestrator,
    input: &str,
) -> Result<EnvironmentRecord, CoreError> {
    let records = orchestrator.list(FolderFilter::Unfiltered).await?;
    if let Some(record) = records.iter().find(|r| r.id == input || r.name == input) {
        return Ok(record.clone());
    }

    let matches: Vec<&EnvironmentRecord> =
        records.iter().filter(|r| r.id.starts_with(input)).collect();
    match matches.len() {
        0 => Err(CoreError::NotFound(format!(
            "no environment matching '{input}'"
        ))),
        1 => Ok(matches[0].clone()),
        n => Err(CoreError::Validation(format!(
            "ambiguous id prefix '{input}': matches {n} environments"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::{CreateRequest, OrchestratorConfig};
    use atelier_engine::MockEngine;
    use atelier_schema::{LaunchOptions, MountSpec};
    use std::sync::Arc;

    fn orchestrator(dir: &std::path::Path) -> (Arc<MockEngine>, Orchestrator) {
        let engine = Arc::new(MockEngine::new());
        let config = OrchestratorConfig::with_store_dir(dir);
        (engine.clone(), Orchestrator::new(engine, config))
    }

    async fn seed(orch: &Orchestrator, engine: &MockEngine, name: &str) -> String {
        engine.seed_image("studio:cu12");
        let record = orch
            .create(CreateRequest {
                name: name.to_owned(),
                image: "studio:cu12".to_owned(),
                content_path: "/srv/studio".into(),
                mount_spec: MountSpec::default(),
                command: None,
                launch_options: LaunchOptions::default(),
                folder_ids: Vec::new(),
            })
            .await
            .unwrap();
        record.id
    }

    #[test]
    fn json_pretty_serializes_value() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn json_line_is_single_line() {
        let val = serde_json::json!({"progress": 42});
        assert_eq!(json_line(&val).unwrap(), r#"{"progress":42}"#);
    }

    #[test]
    fn colorize_status_keeps_the_word() {
        for status in ["running", "created", "stopped", "exited", "dead", "paused"] {
            assert!(colorize_status(status).contains(status));
        }
        assert_eq!(colorize_status("unknown"), "unknown");
    }

    #[test]
    fn short_id_truncates_long_ids() {
        assert_eq!(short_id(&"a".repeat(64)), "a".repeat(12));
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_VALIDATION_ERROR);
        assert_ne!(EXIT_VALIDATION_ERROR, EXIT_STORE_ERROR);
    }

    #[tokio::test]
    async fn resolve_env_matches_name_and_id_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, orch) = orchestrator(dir.path());
        let id = seed(&orch, &engine, "studio-a").await;

        assert_eq!(resolve_env(&orch, "studio-a").await.unwrap().id, id);
        assert_eq!(resolve_env(&orch, &id).await.unwrap().id, id);
        assert_eq!(resolve_env(&orch, &id[..5]).await.unwrap().id, id);
    }

    #[tokio::test]
    async fn resolve_env_rejects_unknown_input() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, orch) = orchestrator(dir.path());
        seed(&orch, &engine, "studio-a").await;

        let err = resolve_env(&orch, "nope").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert!(err.to_string().contains("no environment matching"));
    }
}
