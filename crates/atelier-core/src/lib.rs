//! Lifecycle orchestration for Atelier environments.
//!
//! [`Orchestrator`] composes the record store, the mount resolver, the
//! container engine adapter and the provisioning pipeline into the user
//! facing operations: create, duplicate, activate, deactivate, update,
//! delete and prune, plus image-pull and log event streams. It owns the
//! environment status state machine and reconciles persisted statuses
//! against the engine on every load, so containers removed out-of-band
//! surface as `dead` instead of lingering as stale `running` records.

pub mod config;
pub mod lifecycle;
pub mod orchestrator;
pub mod progress;
pub mod provision;

pub use config::OrchestratorConfig;
pub use orchestrator::{
    CreateRequest, DeleteOutcome, DuplicateRequest, FolderFilter, Orchestrator, UpdateRequest,
};
pub use progress::{LogEvent, PullEvent};

use atelier_engine::EngineError;
use atelier_schema::SchemaError;
use atelier_store::StoreError;
use thiserror::Error;

/// Failure taxonomy of the orchestration layer.
///
/// Validation and not-found failures carry a human-readable reason and are
/// raised before any engine call where possible; engine, store and io
/// failures wrap the underlying error unchanged.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<SchemaError> for CoreError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::Io(e) => CoreError::Io(e),
            other => CoreError::Validation(other.to_string()),
        }
    }
}

impl CoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::NotFound(_) | CoreError::Engine(EngineError::NotFound(_))
        )
    }
}
