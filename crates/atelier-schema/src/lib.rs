//! Data model for Atelier environments.
//!
//! This crate defines the schema layer: the durable environment record
//! (`EnvironmentRecord`), the observed container status (`EnvStatus`), typed
//! launch options and metadata with open extension maps, and the mount
//! specification in both its accepted shapes (`MountSpec`) together with
//! normalization and resolution into concrete bind-mount descriptors
//! (`MountPlan`).

pub mod mounts;
pub mod record;

pub use mounts::{
    extensions_container_path, resolve, resolve_with_passthrough, MountMode, MountPlan,
    MountPoint, MountRule, MountSpec, CONTAINER_APP_ROOT, EXTENSIONS_KEY, LEGACY_MOUNT_KEYS,
    SHARED_LIB_PASSTHROUGH,
};
pub use record::{
    validate_name, EnvStatus, EnvironmentRecord, LaunchOptions, RecordMetadata, DEFAULT_APP_PORT,
    DELETED_FOLDER, MAX_NAME_LEN,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid mount specification: {0}")]
    Mount(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
