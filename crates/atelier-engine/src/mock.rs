//! In-memory engine for tests. State lives behind a mutex so a single
//! mock can be shared between an orchestrator under test and the test
//! body making assertions.

use crate::adapter::{
    ContainerDetails, ContainerEngine, ContainerSpec, EngineEvent, EventStream, ExecOutput,
    ExecRequest, LogStream, PullPhase, PullProgress, PullStream,
};
use crate::EngineError;
use async_trait::async_trait;
use atelier_schema::EnvStatus;
use chrono::{DateTime, Utc};
use futures::stream;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone)]
struct MockContainer {
    name: String,
    image: String,
    status: EnvStatus,
    started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MockState {
    containers: HashMap<String, MockContainer>,
    images: HashSet<String>,
    exec_queue: VecDeque<ExecOutput>,
    exec_log: Vec<(String, Vec<String>)>,
    written_files: Vec<(String, String, String, Vec<u8>)>,
    uploads: Vec<(String, String, usize)>,
    pull_feed: Vec<Result<PullProgress, EngineError>>,
    log_feed: Vec<String>,
    event_feed: Vec<EngineEvent>,
    removed_containers: Vec<String>,
    removed_images: Vec<String>,
    commits: Vec<(String, String)>,
    tags: Vec<(String, String)>,
    restarts: Vec<String>,
    unavailable: bool,
    fail_next_create: Option<String>,
    fail_stop: HashSet<String>,
    next_id: u64,
}

#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a container as if it had been created earlier.
    pub fn seed_container(&self, id: &str, name: &str, status: EnvStatus) {
        self.state().containers.insert(
            id.to_owned(),
            MockContainer {
                name: name.to_owned(),
                image: format!("{name}-image"),
                status,
                started_at: None,
            },
        );
    }

    pub fn seed_image(&self, reference: &str) {
        self.state().images.insert(reference.to_owned());
    }

    pub fn set_status(&self, id: &str, status: EnvStatus) {
        if let Some(c) = self.state().containers.get_mut(id) {
            c.status = status;
        }
    }

    pub fn image_of(&self, id: &str) -> Option<String> {
        self.state().containers.get(id).map(|c| c.image.clone())
    }

    pub fn status_of(&self, id: &str) -> Option<EnvStatus> {
        self.state().containers.get(id).map(|c| c.status)
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state()
            .containers
            .values()
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Queue the response for the next `exec` call. Calls beyond the queue
    /// succeed with empty output.
    pub fn push_exec(&self, output: ExecOutput) {
        self.state().exec_queue.push_back(output);
    }

    pub fn push_exec_ok(&self, stdout: &str) {
        self.push_exec(ExecOutput {
            exit_code: 0,
            stdout: stdout.to_owned(),
            stderr: String::new(),
        });
    }

    pub fn push_exec_fail(&self, exit_code: i64, stderr: &str) {
        self.push_exec(ExecOutput {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_owned(),
        });
    }

    pub fn exec_history(&self) -> Vec<(String, Vec<String>)> {
        self.state().exec_log.clone()
    }

    pub fn push_pull_progress(&self, layer: &str, phase: PullPhase, current: u64, total: u64) {
        self.state().pull_feed.push(Ok(PullProgress {
            layer_id: Some(layer.to_owned()),
            phase,
            bytes_current: current,
            bytes_total: total,
        }));
    }

    pub fn push_pull_error(&self, message: &str) {
        self.state()
            .pull_feed
            .push(Err(EngineError::Api(message.to_owned())));
    }

    pub fn push_log_line(&self, line: &str) {
        self.state().log_feed.push(line.to_owned());
    }

    pub fn push_event(&self, event: EngineEvent) {
        self.state().event_feed.push(event);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Make the next `create_container` fail with an API error.
    pub fn fail_next_create(&self, message: &str) {
        self.state().fail_next_create = Some(message.to_owned());
    }

    /// Make `stop_container` fail for one container id.
    pub fn fail_stop(&self, id: &str) {
        self.state().fail_stop.insert(id.to_owned());
    }

    pub fn written_files(&self) -> Vec<(String, String, String, Vec<u8>)> {
        self.state().written_files.clone()
    }

    pub fn uploads(&self) -> Vec<(String, String, usize)> {
        self.state().uploads.clone()
    }

    pub fn removed_containers(&self) -> Vec<String> {
        self.state().removed_containers.clone()
    }

    pub fn removed_images(&self) -> Vec<String> {
        self.state().removed_images.clone()
    }

    pub fn commits(&self) -> Vec<(String, String)> {
        self.state().commits.clone()
    }

    pub fn restarts(&self) -> Vec<String> {
        self.state().restarts.clone()
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        self.state().tags.clone()
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.state().images.contains(reference)
    }

    fn guard_available(state: &MockState) -> Result<(), EngineError> {
        if state.unavailable {
            Err(EngineError::Unavailable("mock engine is offline".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        Self::guard_available(&self.state())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mut state = self.state();
        Self::guard_available(&state)?;
        if let Some(message) = state.fail_next_create.take() {
            return Err(EngineError::Api(message));
        }
        state.next_id += 1;
        let id = format!("mock-{}", state.next_id);
        state.containers.insert(
            id.clone(),
            MockContainer {
                name: spec.name.clone(),
                image: spec.image.clone(),
                status: EnvStatus::Created,
                started_at: None,
            },
        );
        Ok(id)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        let state = self.state();
        Self::guard_available(&state)?;
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| EngineError::NotFound(format!("no such container: {id}")))?;
        Ok(ContainerDetails {
            id: id.to_owned(),
            name: container.name.clone(),
            status: container.status,
            started_at: container.started_at,
        })
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        Self::guard_available(&state)?;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("no such container: {id}")))?;
        container.status = EnvStatus::Running;
        container.started_at = Some(Utc::now());
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout_secs: u32) -> Result<(), EngineError> {
        let mut state = self.state();
        Self::guard_available(&state)?;
        if state.fail_stop.contains(id) {
            return Err(EngineError::Api(format!("cannot stop {id}")));
        }
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("no such container: {id}")))?;
        container.status = EnvStatus::Stopped;
        Ok(())
    }

    async fn restart_container(&self, id: &str, _timeout_secs: u32) -> Result<(), EngineError> {
        let mut state = self.state();
        Self::guard_available(&state)?;
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("no such container: {id}")))?;
        container.status = EnvStatus::Running;
        container.started_at = Some(Utc::now());
        state.restarts.push(id.to_owned());
        Ok(())
    }

    async fn remove_container(&self, id: &str, _force: bool) -> Result<(), EngineError> {
        let mut state = self.state();
        Self::guard_available(&state)?;
        state
            .containers
            .remove(id)
            .ok_or_else(|| EngineError::NotFound(format!("no such container: {id}")))?;
        state.removed_containers.push(id.to_owned());
        Ok(())
    }

    async fn commit_container(
        &self,
        id: &str,
        repo: &str,
        tag: &str,
    ) -> Result<String, EngineError> {
        let mut state = self.state();
        Self::guard_available(&state)?;
        if !state.containers.contains_key(id) {
            return Err(EngineError::NotFound(format!("no such container: {id}")));
        }
        let reference = format!("{repo}:{tag}");
        state.images.insert(reference.clone());
        state.commits.push((id.to_owned(), reference.clone()));
        Ok(reference)
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        let state = self.state();
        Self::guard_available(&state)?;
        Ok(state.images.contains(reference))
    }

    async fn tag_image(&self, reference: &str, repo: &str, tag: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        Self::guard_available(&state)?;
        if !state.images.contains(reference) {
            return Err(EngineError::NotFound(format!("no such image: {reference}")));
        }
        let target = format!("{repo}:{tag}");
        state.images.insert(target.clone());
        state.tags.push((reference.to_owned(), target));
        Ok(())
    }

    async fn remove_image(&self, reference: &str, _force: bool) -> Result<(), EngineError> {
        let mut state = self.state();
        Self::guard_available(&state)?;
        if !state.images.remove(reference) {
            return Err(EngineError::NotFound(format!("no such image: {reference}")));
        }
        state.removed_images.push(reference.to_owned());
        Ok(())
    }

    fn pull_image(&self, reference: &str) -> PullStream {
        let mut state = self.state();
        if state.unavailable {
            return Box::pin(stream::iter(vec![Err(EngineError::Unavailable(
                "mock engine is offline".to_owned(),
            ))]));
        }
        let mut feed: Vec<Result<PullProgress, EngineError>> =
            state.pull_feed.drain(..).collect();
        if feed.is_empty() {
            feed.push(Ok(PullProgress {
                layer_id: None,
                phase: PullPhase::Complete,
                bytes_current: 0,
                bytes_total: 0,
            }));
        }
        if feed.iter().all(Result::is_ok) {
            state.images.insert(reference.to_owned());
        }
        Box::pin(stream::iter(feed))
    }

    fn container_logs(&self, _id: &str, _since: Option<DateTime<Utc>>) -> LogStream {
        let lines: Vec<Result<String, EngineError>> =
            self.state().log_feed.drain(..).map(Ok).collect();
        Box::pin(stream::iter(lines))
    }

    fn events(&self) -> EventStream {
        let events: Vec<Result<EngineEvent, EngineError>> =
            self.state().event_feed.drain(..).map(Ok).collect();
        Box::pin(stream::iter(events))
    }

    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecOutput, EngineError> {
        let mut state = self.state();
        Self::guard_available(&state)?;
        if !state.containers.contains_key(id) {
            return Err(EngineError::NotFound(format!("no such container: {id}")));
        }
        state.exec_log.push((id.to_owned(), request.cmd.clone()));
        Ok(state.exec_queue.pop_front().unwrap_or(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }))
    }

    async fn write_file(
        &self,
        id: &str,
        dest_dir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> Result<(), EngineError> {
        let mut state = self.state();
        Self::guard_available(&state)?;
        state.written_files.push((
            id.to_owned(),
            dest_dir.to_owned(),
            file_name.to_owned(),
            contents.to_vec(),
        ));
        Ok(())
    }

    async fn upload_archive(
        &self,
        id: &str,
        dest_dir: &str,
        archive: Vec<u8>,
    ) -> Result<(), EngineError> {
        let mut state = self.state();
        Self::guard_available(&state)?;
        state
            .uploads
            .push((id.to_owned(), dest_dir.to_owned(), archive.len()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_owned(),
            image: "studio:latest".to_owned(),
            command: vec![],
            env: vec![],
            binds: vec![],
            port: None,
            gpu: false,
            runtime: None,
        }
    }

    #[tokio::test]
    async fn lifecycle_round_trip() {
        let engine = MockEngine::new();
        let id = engine.create_container(&spec("alpha")).await.unwrap();

        assert_eq!(
            engine.inspect_container(&id).await.unwrap().status,
            EnvStatus::Created
        );
        engine.start_container(&id).await.unwrap();
        assert_eq!(engine.status_of(&id), Some(EnvStatus::Running));
        engine.stop_container(&id, 2).await.unwrap();
        assert_eq!(engine.status_of(&id), Some(EnvStatus::Stopped));
        engine.remove_container(&id, false).await.unwrap();
        assert!(engine.inspect_container(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn unavailable_engine_fails_everything() {
        let engine = MockEngine::new();
        engine.seed_container("c1", "alpha", EnvStatus::Running);
        engine.set_unavailable(true);

        assert!(engine.ping().await.unwrap_err().is_unavailable());
        assert!(engine
            .inspect_container("c1")
            .await
            .unwrap_err()
            .is_unavailable());
    }

    #[tokio::test]
    async fn exec_queue_pops_in_order() {
        let engine = MockEngine::new();
        engine.seed_container("c1", "alpha", EnvStatus::Running);
        engine.push_exec_ok("first");
        engine.push_exec_fail(1, "boom");

        let a = engine
            .exec("c1", &ExecRequest::new(["echo", "first"]))
            .await
            .unwrap();
        let b = engine
            .exec("c1", &ExecRequest::new(["echo", "second"]))
            .await
            .unwrap();
        let c = engine
            .exec("c1", &ExecRequest::new(["echo", "third"]))
            .await
            .unwrap();

        assert_eq!(a.stdout, "first");
        assert_eq!(b.exit_code, 1);
        assert!(c.success());
        assert_eq!(engine.exec_history().len(), 3);
    }

    #[tokio::test]
    async fn pull_drains_feed_and_registers_image() {
        let engine = MockEngine::new();
        engine.push_pull_progress("l1", PullPhase::Downloading, 5, 10);
        engine.push_pull_progress("l1", PullPhase::Complete, 10, 10);

        let events: Vec<_> = engine.pull_image("studio:latest").collect().await;
        assert_eq!(events.len(), 2);
        assert!(engine.has_image("studio:latest"));

        // An empty feed still yields a terminal event.
        let events: Vec<_> = engine.pull_image("other:latest").collect().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn failed_pull_does_not_register_image() {
        let engine = MockEngine::new();
        engine.push_pull_progress("l1", PullPhase::Downloading, 5, 10);
        engine.push_pull_error("manifest unknown");

        let events: Vec<_> = engine.pull_image("missing:latest").collect().await;
        assert!(events.last().unwrap().is_err());
        assert!(!engine.has_image("missing:latest"));
    }

    #[tokio::test]
    async fn commit_and_tag_track_images() {
        let engine = MockEngine::new();
        engine.seed_container("c1", "alpha", EnvStatus::Stopped);

        let reference = engine
            .commit_container("c1", "studio-alpha", "snapshot")
            .await
            .unwrap();
        assert_eq!(reference, "studio-alpha:snapshot");
        assert!(engine.image_exists(&reference).await.unwrap());

        engine
            .tag_image(&reference, "studio-alpha", "backup")
            .await
            .unwrap();
        assert!(engine.has_image("studio-alpha:backup"));

        engine.remove_image("studio-alpha:backup", true).await.unwrap();
        assert!(!engine.has_image("studio-alpha:backup"));
        assert_eq!(engine.removed_images(), vec!["studio-alpha:backup".to_owned()]);
    }
}
