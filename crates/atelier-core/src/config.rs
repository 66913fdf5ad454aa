use crate::CoreError;
use atelier_schema::CONTAINER_APP_ROOT;
use atelier_store::RecordStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

fn default_store_dir() -> PathBuf {
    PathBuf::from(".atelier")
}

fn default_app_root() -> String {
    CONTAINER_APP_ROOT.to_owned()
}

fn default_stop_timeout() -> u32 {
    2
}

fn default_lock_timeout() -> u64 {
    5
}

fn default_max_deleted() -> usize {
    10
}

fn default_blacklist() -> Vec<String> {
    vec!["torch".to_owned()]
}

fn default_archive_excludes() -> Vec<String> {
    vec!["__pycache__".to_owned(), "studio-manager".to_owned()]
}

/// Orchestrator tunables, loadable from a JSON file. Unknown keys are
/// ignored so older binaries keep reading newer files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Directory holding the record table and its sibling lock file.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Application root inside containers; well-known mount targets hang
    /// off this path.
    #[serde(default = "default_app_root")]
    pub app_root: String,

    /// Grace period in seconds handed to the engine for stop and restart.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u32,

    /// How long to wait for the record-store lock, in seconds.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,

    /// Retention bound: how many soft-deleted records to keep around.
    #[serde(default = "default_max_deleted")]
    pub max_deleted: usize,

    /// Package names stripped from extension dependency manifests before
    /// install, matched against the leading token of each line.
    #[serde(default = "default_blacklist")]
    pub package_blacklist: Vec<String>,

    /// Directory names excluded from provisioning: skipped when archiving
    /// at any depth, and never given a dependency install.
    #[serde(default = "default_archive_excludes")]
    pub archive_excludes: Vec<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            app_root: default_app_root(),
            stop_timeout_secs: default_stop_timeout(),
            lock_timeout_secs: default_lock_timeout(),
            max_deleted: default_max_deleted(),
            package_blacklist: default_blacklist(),
            archive_excludes: default_archive_excludes(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults with an explicit store directory.
    pub fn with_store_dir(dir: &Path) -> Self {
        Self {
            store_dir: dir.to_path_buf(),
            ..Self::default()
        }
    }

    /// Load from `path`. A missing file yields the defaults; an unparsable
    /// one is a validation failure, not a silent reset.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| CoreError::Validation(format!("config {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::Internal(format!("config encode: {e}")))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Record store rooted at [`Self::store_dir`].
    pub fn store(&self) -> RecordStore {
        RecordStore::new(&self.store_dir, self.lock_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.app_root, CONTAINER_APP_ROOT);
        assert_eq!(config.package_blacklist, vec!["torch".to_owned()]);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.json");

        let mut config = OrchestratorConfig::with_store_dir(dir.path());
        config.max_deleted = 3;
        config.package_blacklist.push("tensorflow".to_owned());
        config.save(&path).unwrap();

        let loaded = OrchestratorConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"max_deleted": 1, "future_knob": true}"#).unwrap();

        let config = OrchestratorConfig::load(&path).unwrap();
        assert_eq!(config.max_deleted, 1);
        assert_eq!(config.stop_timeout_secs, 2);
    }

    #[test]
    fn garbage_file_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{nope").unwrap();

        let err = OrchestratorConfig::load(&path).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
