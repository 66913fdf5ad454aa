use crate::mounts::MountSpec;
use crate::SchemaError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Reserved folder tag marking a record as soft-deleted.
pub const DELETED_FOLDER: &str = "deleted";

/// Upper bound on environment name length, in characters.
pub const MAX_NAME_LEN: usize = 128;

/// Port the studio runtime listens on inside the container; also the default
/// host port it is published to.
pub const DEFAULT_APP_PORT: u16 = 8188;

/// Observed container status, reconciled from the engine on every load.
///
/// `stopped` is what a deliberate deactivation persists; `exited` is what the
/// engine reports for a container that terminated on its own; `dead` means
/// the container has vanished from the engine entirely.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Stopped,
    Dead,
}

impl std::fmt::Display for EnvStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EnvStatus::Created => "created",
            EnvStatus::Running => "running",
            EnvStatus::Paused => "paused",
            EnvStatus::Restarting => "restarting",
            EnvStatus::Exited => "exited",
            EnvStatus::Stopped => "stopped",
            EnvStatus::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

/// Recognized launch parameters plus a residual map for forward-compatible
/// extras. Validated at the boundary; the orchestrator only reads the typed
/// fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LaunchOptions {
    /// Host port the studio runtime is published on. `None` means
    /// [`DEFAULT_APP_PORT`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Container runtime name handed to the engine (e.g. `"nvidia"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,

    /// Request GPU device access for the container.
    #[serde(default)]
    pub gpu: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Open key/value bag attached to each record, with the keys the orchestrator
/// itself writes lifted into typed fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Stamped on soft delete; ordering key for retention pruning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Image the environment was originally created from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The unit of management: one persisted environment and its backing
/// container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentRecord {
    /// Container identifier assigned by the engine; stable once set.
    pub id: String,

    /// User-facing label, unique among non-deleted records.
    pub name: String,

    /// Image reference backing this environment.
    pub image: String,

    /// Derived, never trusted from disk; see `EnvStatus`.
    pub status: EnvStatus,

    /// Host content root; models/input/output/extensions live under it.
    pub content_path: PathBuf,

    #[serde(default)]
    pub mount_spec: MountSpec,

    /// Free-form arguments appended to the image entrypoint,
    /// whitespace-separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default)]
    pub launch_options: LaunchOptions,

    /// Grouping tags; the reserved `"deleted"` tag marks soft deletion.
    #[serde(default)]
    pub folder_ids: Vec<String>,

    /// True when this record's image is a private commit of another
    /// environment's container. Such a record owns its image exclusively.
    #[serde(default)]
    pub duplicate: bool,

    #[serde(default)]
    pub metadata: RecordMetadata,
}

impl EnvironmentRecord {
    pub fn is_deleted(&self) -> bool {
        self.folder_ids.iter().any(|f| f == DELETED_FOLDER)
    }

    pub fn in_folder(&self, folder_id: &str) -> bool {
        self.folder_ids.iter().any(|f| f == folder_id)
    }
}

/// Validate an environment name: 1-128 characters, leading alphanumeric,
/// the rest drawn from `[A-Za-z0-9_.-]`.
pub fn validate_name(name: &str) -> Result<(), SchemaError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(SchemaError::Validation(format!(
            "environment name must be 1-{MAX_NAME_LEN} characters"
        )));
    }
    let mut bytes = name.bytes();
    let first = bytes.next().unwrap_or(b' ');
    if !first.is_ascii_alphanumeric() {
        return Err(SchemaError::Validation(
            "environment name must start with a letter or digit".to_owned(),
        ));
    }
    if !bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-') {
        return Err(SchemaError::Validation(
            "environment name must match [A-Za-z0-9][A-Za-z0-9_.-]*".to_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_names() {
        for name in ["studio", "Studio-2", "a", "env_1.5", "0gpu"] {
            assert!(validate_name(name).is_ok(), "rejected {name}");
        }
    }

    #[test]
    fn rejects_empty_and_oversized_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn rejects_bad_leading_and_inner_characters() {
        assert!(validate_name("-studio").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("slash/name").is_err());
        assert!(validate_name("émigré").is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&EnvStatus::Running).unwrap(),
            "\"running\""
        );
        let parsed: EnvStatus = serde_json::from_str("\"dead\"").unwrap();
        assert_eq!(parsed, EnvStatus::Dead);
    }

    #[test]
    fn minimal_record_json_fills_defaults() {
        let json = r#"{
            "id": "abc123",
            "name": "studio",
            "image": "studio-runtime:cu12",
            "status": "created",
            "content_path": "/srv/studio"
        }"#;
        let rec: EnvironmentRecord = serde_json::from_str(json).unwrap();
        assert!(rec.folder_ids.is_empty());
        assert!(!rec.duplicate);
        assert!(rec.command.is_none());
        assert!(rec.launch_options.port.is_none());
        assert!(!rec.is_deleted());
    }

    #[test]
    fn metadata_preserves_unknown_keys() {
        let json = r#"{"created_at":"2026-01-10T12:00:00Z","pinned":true}"#;
        let meta: RecordMetadata = serde_json::from_str(json).unwrap();
        assert!(meta.created_at.is_some());
        assert_eq!(meta.extra.get("pinned"), Some(&serde_json::json!(true)));

        let back = serde_json::to_string(&meta).unwrap();
        assert!(back.contains("pinned"));
    }

    #[test]
    fn deleted_tag_is_detected() {
        let json = r#"{
            "id": "abc",
            "name": "n",
            "image": "i",
            "status": "stopped",
            "content_path": "/tmp",
            "folder_ids": ["deleted", "archive"]
        }"#;
        let rec: EnvironmentRecord = serde_json::from_str(json).unwrap();
        assert!(rec.is_deleted());
        assert!(rec.in_folder("archive"));
        assert!(!rec.in_folder("other"));
    }
}
