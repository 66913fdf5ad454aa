use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Application root inside the studio container; well-known directories hang
/// off it.
pub const CONTAINER_APP_ROOT: &str = "/app/studio";

/// Directory keys understood by the legacy mount shape, resolved in this
/// order.
pub const LEGACY_MOUNT_KEYS: [&str; 5] = ["models", "user", "input", "output", "extensions"];

/// The directory whose contents carry installable dependency manifests.
pub const EXTENSIONS_KEY: &str = "extensions";

/// Host shared-library path passed through read-only when it exists, so GPU
/// drivers resolve inside containers on virtualized hosts.
pub const SHARED_LIB_PASSTHROUGH: &str = "/usr/lib/wsl";

/// How a host directory reaches the container: a live bind mount, or a
/// one-shot copy performed by the provisioning pipeline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    #[default]
    #[serde(alias = "mount")]
    Bind,
    Copy,
}

impl std::fmt::Display for MountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MountMode::Bind => write!(f, "bind"),
            MountMode::Copy => write!(f, "copy"),
        }
    }
}

/// One rule of the current mount shape. `host_path` may be absolute or
/// relative to the environment's content root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MountRule {
    pub host_path: PathBuf,
    pub container_path: String,
    #[serde(default, alias = "type")]
    pub mode: MountMode,
    #[serde(default)]
    pub read_only: bool,
}

/// A mount specification as stored on a record: either the current explicit
/// rule list or the legacy map from well-known directory keys to an action
/// token (`"mount"` | `"copy"`).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MountSpec {
    Rules { mounts: Vec<MountRule> },
    Legacy(BTreeMap<String, String>),
}

/// An object carrying a `mounts` key is always the current shape. An
/// untagged fallback would swallow a malformed rule list as a legacy map
/// whose one unrecognized key resolves to an empty plan.
impl<'de> Deserialize<'de> for MountSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        #[derive(Deserialize)]
        struct Current {
            mounts: Vec<MountRule>,
        }

        let value = serde_json::Value::deserialize(deserializer)?;
        if value
            .as_object()
            .is_some_and(|map| map.contains_key("mounts"))
        {
            let Current { mounts } = serde_json::from_value(value).map_err(Error::custom)?;
            Ok(MountSpec::Rules { mounts })
        } else {
            serde_json::from_value(value)
                .map(MountSpec::Legacy)
                .map_err(Error::custom)
        }
    }
}

impl Default for MountSpec {
    fn default() -> Self {
        MountSpec::Legacy(BTreeMap::new())
    }
}

impl MountSpec {
    pub fn from_value(value: serde_json::Value) -> Result<Self, SchemaError> {
        serde_json::from_value(value).map_err(|e| SchemaError::Mount(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| SchemaError::Mount(format!("{}: {e}", path.display())))
    }

    /// Reduce both accepted shapes to one ordered rule list. Legacy keys map
    /// host `content_root/<key>` to container `<app_root>/<key>`, writable;
    /// unrecognized keys and action tokens are skipped. Current-shape rules
    /// pass through untouched.
    pub fn normalize(&self, content_root: &Path, app_root: &str) -> Vec<MountRule> {
        match self {
            MountSpec::Rules { mounts } => mounts.clone(),
            MountSpec::Legacy(map) => {
                let mut rules = Vec::new();
                for key in LEGACY_MOUNT_KEYS {
                    let Some(action) = map.get(key) else {
                        continue;
                    };
                    let mode = match action.as_str() {
                        "mount" | "bind" => MountMode::Bind,
                        "copy" => MountMode::Copy,
                        other => {
                            debug!(key, action = other, "ignoring unrecognized mount action");
                            continue;
                        }
                    };
                    rules.push(MountRule {
                        host_path: content_root.join(key),
                        container_path: join_container_path(app_root, key),
                        mode,
                        read_only: false,
                    });
                }
                for key in map.keys() {
                    if !LEGACY_MOUNT_KEYS.contains(&key.as_str()) {
                        debug!(key = key.as_str(), "ignoring unrecognized mount key");
                    }
                }
                rules
            }
        }
    }
}

/// A resolved descriptor: absolute host path, container path, action,
/// read-only flag.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MountPoint {
    pub host_path: PathBuf,
    pub container_path: String,
    pub mode: MountMode,
    pub read_only: bool,
}

/// The ordered output of mount resolution. `binds()` feeds container
/// creation; `copies()` feeds the provisioning pipeline.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MountPlan {
    pub points: Vec<MountPoint>,
}

impl MountPlan {
    pub fn binds(&self) -> impl Iterator<Item = &MountPoint> {
        self.points.iter().filter(|p| p.mode == MountMode::Bind)
    }

    pub fn copies(&self) -> impl Iterator<Item = &MountPoint> {
        self.points.iter().filter(|p| p.mode == MountMode::Copy)
    }

    pub fn has_extensions_bind(&self, app_root: &str) -> bool {
        let target = extensions_container_path(app_root);
        self.binds().any(|p| p.container_path == target)
    }
}

/// Resolve a mount specification against a content root.
///
/// Relative host paths resolve under `content_root`; missing `bind`
/// directories are created (parents included) before their descriptor is
/// emitted; missing `copy` directories are logged and skipped, never
/// created. The shared-library passthrough is appended last when present on
/// this host. Re-resolving against unchanged host state yields an identical
/// plan.
pub fn resolve(
    spec: &MountSpec,
    content_root: &Path,
    app_root: &str,
) -> Result<MountPlan, SchemaError> {
    resolve_with_passthrough(
        spec,
        content_root,
        app_root,
        Some(Path::new(SHARED_LIB_PASSTHROUGH)),
    )
}

/// [`resolve`] with an explicit passthrough candidate, for callers and tests
/// that need to control the host-dependent part.
pub fn resolve_with_passthrough(
    spec: &MountSpec,
    content_root: &Path,
    app_root: &str,
    passthrough: Option<&Path>,
) -> Result<MountPlan, SchemaError> {
    let mut points = Vec::new();

    for rule in spec.normalize(content_root, app_root) {
        let host_path = absolutize(&rule.host_path, content_root);
        match rule.mode {
            MountMode::Bind => {
                std::fs::create_dir_all(&host_path)?;
                points.push(MountPoint {
                    host_path,
                    container_path: rule.container_path,
                    mode: MountMode::Bind,
                    read_only: rule.read_only,
                });
            }
            MountMode::Copy => {
                if host_path.is_dir() {
                    points.push(MountPoint {
                        host_path,
                        container_path: rule.container_path,
                        mode: MountMode::Copy,
                        read_only: rule.read_only,
                    });
                } else {
                    warn!(
                        path = %host_path.display(),
                        "copy source directory missing, skipping"
                    );
                }
            }
        }
    }

    if let Some(candidate) = passthrough {
        if candidate.exists() {
            points.push(MountPoint {
                host_path: candidate.to_path_buf(),
                container_path: candidate.to_string_lossy().into_owned(),
                mode: MountMode::Bind,
                read_only: true,
            });
        }
    }

    Ok(MountPlan { points })
}

pub fn extensions_container_path(app_root: &str) -> String {
    join_container_path(app_root, EXTENSIONS_KEY)
}

fn join_container_path(app_root: &str, key: &str) -> String {
    format!("{}/{key}", app_root.trim_end_matches('/'))
}

fn absolutize(path: &Path, content_root: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        content_root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy(pairs: &[(&str, &str)]) -> MountSpec {
        MountSpec::Legacy(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        )
    }

    #[test]
    fn legacy_maps_each_recognized_key() {
        let root = tempfile::tempdir().unwrap();
        let spec = legacy(&[
            ("models", "mount"),
            ("user", "mount"),
            ("input", "mount"),
            ("output", "mount"),
            ("extensions", "mount"),
        ]);

        let plan =
            resolve_with_passthrough(&spec, root.path(), CONTAINER_APP_ROOT, None).unwrap();

        assert_eq!(plan.points.len(), LEGACY_MOUNT_KEYS.len());
        for (point, key) in plan.points.iter().zip(LEGACY_MOUNT_KEYS) {
            assert_eq!(point.host_path, root.path().join(key));
            assert_eq!(point.container_path, format!("{CONTAINER_APP_ROOT}/{key}"));
            assert_eq!(point.mode, MountMode::Bind);
            assert!(!point.read_only);
            assert!(point.host_path.is_dir(), "bind dir not created for {key}");
        }
    }

    #[test]
    fn legacy_ignores_unknown_actions_and_keys() {
        let root = tempfile::tempdir().unwrap();
        let spec = legacy(&[
            ("models", "symlink"),
            ("scratch", "mount"),
            ("input", "mount"),
        ]);

        let plan =
            resolve_with_passthrough(&spec, root.path(), CONTAINER_APP_ROOT, None).unwrap();

        assert_eq!(plan.points.len(), 1);
        assert_eq!(plan.points[0].host_path, root.path().join("input"));
    }

    #[test]
    fn copy_of_missing_directory_is_skipped_not_created() {
        let root = tempfile::tempdir().unwrap();
        let spec = legacy(&[("models", "copy")]);

        let plan =
            resolve_with_passthrough(&spec, root.path(), CONTAINER_APP_ROOT, None).unwrap();

        assert!(plan.points.is_empty());
        assert!(!root.path().join("models").exists());
    }

    #[test]
    fn copy_of_existing_directory_is_emitted() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("models")).unwrap();
        let spec = legacy(&[("models", "copy")]);

        let plan =
            resolve_with_passthrough(&spec, root.path(), CONTAINER_APP_ROOT, None).unwrap();

        assert_eq!(plan.points.len(), 1);
        assert_eq!(plan.points[0].mode, MountMode::Copy);
    }

    #[test]
    fn relative_rule_resolves_under_content_root() {
        let root = tempfile::tempdir().unwrap();
        let spec = MountSpec::Rules {
            mounts: vec![MountRule {
                host_path: PathBuf::from("custom/checkpoints"),
                container_path: "/app/studio/models/checkpoints".to_owned(),
                mode: MountMode::Bind,
                read_only: false,
            }],
        };

        let plan =
            resolve_with_passthrough(&spec, root.path(), CONTAINER_APP_ROOT, None).unwrap();

        let expected = root.path().join("custom/checkpoints");
        assert_eq!(plan.points[0].host_path, expected);
        assert!(expected.is_dir());
    }

    #[test]
    fn absolute_rule_host_path_is_kept() {
        let root = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let spec = MountSpec::Rules {
            mounts: vec![MountRule {
                host_path: elsewhere.path().join("data"),
                container_path: "/data".to_owned(),
                mode: MountMode::Bind,
                read_only: true,
            }],
        };

        let plan =
            resolve_with_passthrough(&spec, root.path(), CONTAINER_APP_ROOT, None).unwrap();

        assert_eq!(plan.points[0].host_path, elsewhere.path().join("data"));
        assert!(plan.points[0].read_only);
    }

    #[test]
    fn resolution_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let spec = legacy(&[("models", "mount"), ("extensions", "copy")]);
        std::fs::create_dir(root.path().join("extensions")).unwrap();

        let first =
            resolve_with_passthrough(&spec, root.path(), CONTAINER_APP_ROOT, None).unwrap();
        let second =
            resolve_with_passthrough(&spec, root.path(), CONTAINER_APP_ROOT, None).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn passthrough_is_appended_read_only_only_when_present() {
        let root = tempfile::tempdir().unwrap();
        let shared = tempfile::tempdir().unwrap();
        let spec = legacy(&[("models", "mount")]);

        let with = resolve_with_passthrough(
            &spec,
            root.path(),
            CONTAINER_APP_ROOT,
            Some(shared.path()),
        )
        .unwrap();
        let last = with.points.last().unwrap();
        assert_eq!(last.host_path, shared.path());
        assert_eq!(last.container_path, shared.path().to_string_lossy());
        assert!(last.read_only);

        let missing = shared.path().join("nope");
        let without =
            resolve_with_passthrough(&spec, root.path(), CONTAINER_APP_ROOT, Some(&missing))
                .unwrap();
        assert_eq!(without.points.len(), 1);
    }

    #[test]
    fn both_shapes_and_aliases_deserialize() {
        let legacy_json = r#"{"models": "mount", "extensions": "copy"}"#;
        let spec: MountSpec = serde_json::from_str(legacy_json).unwrap();
        assert!(matches!(spec, MountSpec::Legacy(_)));

        let rules_json = r#"{"mounts": [
            {"host_path": "m", "container_path": "/app/studio/models", "type": "mount"},
            {"host_path": "/x", "container_path": "/y", "mode": "copy", "read_only": true}
        ]}"#;
        let spec: MountSpec = serde_json::from_str(rules_json).unwrap();
        let MountSpec::Rules { mounts } = spec else {
            panic!("expected rules shape");
        };
        assert_eq!(mounts[0].mode, MountMode::Bind);
        assert_eq!(mounts[1].mode, MountMode::Copy);
        assert!(mounts[1].read_only);
    }

    #[test]
    fn garbage_spec_is_a_mount_error() {
        let err = MountSpec::from_value(serde_json::json!({"mounts": "nope"})).unwrap_err();
        assert!(matches!(err, SchemaError::Mount(_)));
    }

    #[test]
    fn malformed_rule_lists_are_not_mistaken_for_legacy_maps() {
        // Missing container_path: must surface the rule error, not parse as
        // a legacy map with one unknown key.
        let err = MountSpec::from_value(serde_json::json!({
            "mounts": [{"host_path": "models"}]
        }))
        .unwrap_err();
        assert!(matches!(err, SchemaError::Mount(_)));

        let spec = MountSpec::from_value(serde_json::json!({"models": "mount"})).unwrap();
        assert!(matches!(spec, MountSpec::Legacy(_)));
    }

    #[test]
    fn extensions_bind_is_detected() {
        let root = tempfile::tempdir().unwrap();
        let spec = legacy(&[("extensions", "mount")]);
        let plan =
            resolve_with_passthrough(&spec, root.path(), CONTAINER_APP_ROOT, None).unwrap();
        assert!(plan.has_extensions_bind(CONTAINER_APP_ROOT));
        assert!(!plan.has_extensions_bind("/elsewhere"));
    }
}
