//! Container engine adapter for Atelier.
//!
//! [`ContainerEngine`] is a thin capability interface over an external
//! container engine: create/inspect/start/stop/restart/commit/remove
//! containers, image lookup/tag/remove/pull-with-progress, typed exec,
//! file and archive upload, and lazy log/event streams. The adapter holds no
//! lifecycle logic and never retries; callers decide. [`DockerEngine`] talks
//! to a local Docker daemon through bollard; [`MockEngine`] is an in-memory
//! double for tests.

pub mod adapter;
pub mod docker;
pub mod mock;

pub use adapter::{
    ContainerDetails, ContainerEngine, ContainerSpec, EngineEvent, EventStream, ExecOutput,
    ExecRequest, LogStream, PullPhase, PullProgress, PullStream,
};
pub use docker::DockerEngine;
pub use mock::MockEngine;

use thiserror::Error;

/// Engine failures, kept distinct so callers can tell an unreachable daemon
/// from a missing resource from a rejected request.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("container engine unreachable: {0}")]
    Unavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("engine API error: {0}")]
    Api(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, EngineError::Unavailable(_))
    }
}
