use crate::EngineError;
use async_trait::async_trait;
use atelier_schema::{EnvStatus, MountPoint};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;

pub type PullStream = BoxStream<'static, Result<PullProgress, EngineError>>;
pub type LogStream = BoxStream<'static, Result<String, EngineError>>;
pub type EventStream = BoxStream<'static, Result<EngineEvent, EngineError>>;

/// Everything the engine needs to create a container. Only `bind` mount
/// points belong here; `copy` directories are the provisioning pipeline's
/// business.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Arguments appended to the image entrypoint; empty keeps the image
    /// default.
    pub command: Vec<String>,
    pub env: Vec<String>,
    pub binds: Vec<MountPoint>,
    /// Host port the application port is published to (same number on both
    /// sides).
    pub port: Option<u16>,
    /// Ask the engine for all GPU devices.
    pub gpu: bool,
    /// Engine runtime name, e.g. `"nvidia"`.
    pub runtime: Option<String>,
}

/// Snapshot of one container as the engine reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub status: EnvStatus,
    /// When the container last started; `None` if it never ran.
    pub started_at: Option<DateTime<Utc>>,
}

/// A command to run inside a container: explicit argv, never a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub cmd: Vec<String>,
    pub workdir: Option<String>,
}

impl ExecRequest {
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            workdir: None,
        }
    }

    #[must_use]
    pub fn in_dir(mut self, workdir: &str) -> Self {
        self.workdir = Some(workdir.to_owned());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One progress event of an image pull, per layer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PullProgress {
    pub layer_id: Option<String>,
    pub phase: PullPhase,
    pub bytes_current: u64,
    pub bytes_total: u64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PullPhase {
    Downloading,
    AlreadyExists,
    Complete,
}

/// One entry of the engine's lifecycle event feed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EngineEvent {
    /// Resource kind the event concerns (`container`, `image`, ...).
    pub resource: String,
    pub action: String,
    pub actor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Capability interface over the external container engine.
///
/// Implementations do not retry and hold no orchestration logic. Streams are
/// lazy; dropping one cancels the underlying request.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn ping(&self) -> Result<(), EngineError>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    async fn stop_container(&self, id: &str, timeout_secs: u32) -> Result<(), EngineError>;

    async fn restart_container(&self, id: &str, timeout_secs: u32) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError>;

    /// Commit the container's filesystem to `repo:tag`; returns the new
    /// image reference.
    async fn commit_container(
        &self,
        id: &str,
        repo: &str,
        tag: &str,
    ) -> Result<String, EngineError>;

    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError>;

    async fn tag_image(&self, reference: &str, repo: &str, tag: &str)
        -> Result<(), EngineError>;

    async fn remove_image(&self, reference: &str, force: bool) -> Result<(), EngineError>;

    /// Lazy per-layer progress; unknown daemon status lines are dropped.
    fn pull_image(&self, reference: &str) -> PullStream;

    /// Lines since `since`, following while the container runs.
    fn container_logs(&self, id: &str, since: Option<DateTime<Utc>>) -> LogStream;

    fn events(&self) -> EventStream;

    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecOutput, EngineError>;

    /// Place `contents` at `dest_dir/file_name` inside the container through
    /// an archive upload. This is the only way file content reaches a
    /// container; it is never interpolated into a command line.
    async fn write_file(
        &self,
        id: &str,
        dest_dir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> Result<(), EngineError>;

    /// Unpack a tar archive into `dest_dir` inside the container.
    async fn upload_archive(
        &self,
        id: &str,
        dest_dir: &str,
        archive: Vec<u8>,
    ) -> Result<(), EngineError>;
}
