use crate::adapter::{
    ContainerDetails, ContainerEngine, ContainerSpec, EngineEvent, EventStream, ExecOutput,
    ExecRequest, LogStream, PullPhase, PullProgress, PullStream,
};
use crate::EngineError;
use async_trait::async_trait;
use atelier_schema::EnvStatus;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    RestartContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CommitContainerOptions, CreateImageOptions, RemoveImageOptions, TagImageOptions};
use bollard::service::{
    ContainerStateStatusEnum, CreateImageInfo, DeviceRequest, EventMessage, HostConfig, Mount,
    MountTypeEnum, PortBinding,
};
use bollard::system::EventsOptions;
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use tracing::debug;

/// [`ContainerEngine`] backed by a local Docker daemon.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using the platform defaults (unix socket, or the environment
    /// overrides Docker itself honors). The connection is lazy; the daemon
    /// is first contacted by the first call.
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults().map_err(map_engine_err)?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.docker.ping().await.map_err(map_engine_err)?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        let mounts: Vec<Mount> = spec
            .binds
            .iter()
            .map(|point| Mount {
                target: Some(point.container_path.clone()),
                source: Some(point.host_path.to_string_lossy().into_owned()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(point.read_only),
                ..Default::default()
            })
            .collect();

        let device_requests = spec.gpu.then(|| {
            vec![DeviceRequest {
                driver: None,
                count: Some(-1),
                device_ids: None,
                capabilities: Some(vec![vec!["gpu".to_owned()]]),
                options: None,
            }]
        });

        let mut exposed_ports = HashMap::new();
        let mut port_bindings = HashMap::new();
        if let Some(port) = spec.port {
            let key = format!("{port}/tcp");
            exposed_ports.insert(key.clone(), HashMap::new());
            port_bindings.insert(
                key,
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(port.to_string()),
                }]),
            );
        }

        let host_config = HostConfig {
            mounts: (!mounts.is_empty()).then_some(mounts),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            device_requests,
            runtime: spec.runtime.clone(),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: (!spec.command.is_empty()).then(|| spec.command.clone()),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_engine_err)?;
        debug!(id = %created.id, name = %spec.name, "container created");
        Ok(created.id)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails, EngineError> {
        let resp = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(map_engine_err)?;

        let state = resp.state.as_ref();
        let status = state
            .and_then(|s| s.status)
            .map_or(EnvStatus::Dead, map_container_state);
        let started_at = state
            .and_then(|s| s.started_at.as_deref())
            .and_then(parse_engine_time);

        Ok(ContainerDetails {
            id: resp.id.unwrap_or_else(|| id.to_owned()),
            name: resp
                .name
                .unwrap_or_default()
                .trim_start_matches('/')
                .to_owned(),
            status,
            started_at,
        })
    }

    async fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_engine_err)
    }

    async fn stop_container(&self, id: &str, timeout_secs: u32) -> Result<(), EngineError> {
        self.docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: i64::from(timeout_secs),
                }),
            )
            .await
            .map_err(map_engine_err)
    }

    async fn restart_container(&self, id: &str, timeout_secs: u32) -> Result<(), EngineError> {
        self.docker
            .restart_container(
                id,
                Some(RestartContainerOptions {
                    t: timeout_secs.try_into().unwrap_or(0),
                }),
            )
            .await
            .map_err(map_engine_err)
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), EngineError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_engine_err)
    }

    async fn commit_container(
        &self,
        id: &str,
        repo: &str,
        tag: &str,
    ) -> Result<String, EngineError> {
        let options = CommitContainerOptions {
            container: id.to_owned(),
            repo: repo.to_owned(),
            tag: tag.to_owned(),
            pause: true,
            ..Default::default()
        };
        self.docker
            .commit_container(options, Config::<String>::default())
            .await
            .map_err(map_engine_err)?;
        Ok(format!("{repo}:{tag}"))
    }

    async fn image_exists(&self, reference: &str) -> Result<bool, EngineError> {
        match self.docker.inspect_image(reference).await {
            Ok(_) => Ok(true),
            Err(e) => match map_engine_err(e) {
                EngineError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn tag_image(
        &self,
        reference: &str,
        repo: &str,
        tag: &str,
    ) -> Result<(), EngineError> {
        self.docker
            .tag_image(
                reference,
                Some(TagImageOptions {
                    repo: repo.to_owned(),
                    tag: tag.to_owned(),
                }),
            )
            .await
            .map_err(map_engine_err)
    }

    async fn remove_image(&self, reference: &str, force: bool) -> Result<(), EngineError> {
        self.docker
            .remove_image(
                reference,
                Some(RemoveImageOptions {
                    force,
                    ..Default::default()
                }),
                None,
            )
            .await
            .map_err(map_engine_err)?;
        Ok(())
    }

    fn pull_image(&self, reference: &str) -> PullStream {
        let (from_image, tag) = split_reference(reference);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };
        let stream = self
            .docker
            .create_image(Some(options), None, None)
            .filter_map(|item| async move {
                match item {
                    Ok(info) => {
                        if let Some(message) = info.error {
                            return Some(Err(EngineError::Api(message)));
                        }
                        map_pull_info(&info).map(Ok)
                    }
                    Err(e) => Some(Err(map_engine_err(e))),
                }
            });
        Box::pin(stream)
    }

    fn container_logs(&self, id: &str, since: Option<DateTime<Utc>>) -> LogStream {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            since: since.map_or(0, |t| t.timestamp()),
            ..Default::default()
        };
        let stream = self.docker.logs(id, Some(options)).map(|item| match item {
            Ok(chunk) => Ok(format_log_chunk(&chunk)),
            Err(e) => Err(map_engine_err(e)),
        });
        Box::pin(stream)
    }

    fn events(&self) -> EventStream {
        let stream = self
            .docker
            .events(None::<EventsOptions<String>>)
            .map(|item| match item {
                Ok(message) => Ok(map_event(message)),
                Err(e) => Err(map_engine_err(e)),
            });
        Box::pin(stream)
    }

    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecOutput, EngineError> {
        let options = CreateExecOptions {
            cmd: Some(request.cmd.clone()),
            working_dir: request.workdir.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let created = self
            .docker
            .create_exec(id, options)
            .await
            .map_err(map_engine_err)?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        match self
            .docker
            .start_exec(&created.id, None)
            .await
            .map_err(map_engine_err)?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk.map_err(map_engine_err)? {
                        LogOutput::StdOut { message } => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        LogOutput::StdErr { message } => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .docker
            .inspect_exec(&created.id)
            .await
            .map_err(map_engine_err)?;
        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(0),
            stdout,
            stderr,
        })
    }

    async fn write_file(
        &self,
        id: &str,
        dest_dir: &str,
        file_name: &str,
        contents: &[u8],
    ) -> Result<(), EngineError> {
        let archive = single_file_archive(file_name, contents)
            .map_err(|e| EngineError::Api(format!("archive encode failed: {e}")))?;
        self.upload_archive(id, dest_dir, archive).await
    }

    async fn upload_archive(
        &self,
        id: &str,
        dest_dir: &str,
        archive: Vec<u8>,
    ) -> Result<(), EngineError> {
        let options = UploadToContainerOptions {
            path: dest_dir.to_owned(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id, Some(options), archive.into())
            .await
            .map_err(map_engine_err)
    }
}

fn map_engine_err(err: bollard::errors::Error) -> EngineError {
    use bollard::errors::Error;
    match &err {
        Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => EngineError::NotFound(message.clone()),
        Error::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Api(format!("status {status_code}: {message}")),
        _ => {
            let text = err.to_string();
            if is_transport_failure(&text) {
                EngineError::Unavailable(text)
            } else {
                EngineError::Api(text)
            }
        }
    }
}

fn is_transport_failure(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("connection refused")
        || m.contains("connection reset")
        || m.contains("error trying to connect")
        || m.contains("no such file or directory")
        || m.contains("socket")
        || m.contains("timed out")
}

fn map_container_state(status: ContainerStateStatusEnum) -> EnvStatus {
    match status {
        ContainerStateStatusEnum::CREATED => EnvStatus::Created,
        ContainerStateStatusEnum::RUNNING => EnvStatus::Running,
        ContainerStateStatusEnum::PAUSED => EnvStatus::Paused,
        ContainerStateStatusEnum::RESTARTING => EnvStatus::Restarting,
        ContainerStateStatusEnum::EXITED => EnvStatus::Exited,
        _ => EnvStatus::Dead,
    }
}

fn parse_engine_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Map one daemon pull status line to a typed event; lines outside the three
/// phases the callers care about are dropped.
fn map_pull_info(info: &CreateImageInfo) -> Option<PullProgress> {
    let status = info.status.as_deref().unwrap_or("");
    let phase = if status.eq_ignore_ascii_case("downloading") {
        PullPhase::Downloading
    } else if status.eq_ignore_ascii_case("already exists") {
        PullPhase::AlreadyExists
    } else if status.eq_ignore_ascii_case("download complete")
        || status.eq_ignore_ascii_case("pull complete")
    {
        PullPhase::Complete
    } else {
        return None;
    };

    let detail = info.progress_detail.as_ref();
    Some(PullProgress {
        layer_id: info.id.clone(),
        phase,
        bytes_current: detail.and_then(|d| d.current).unwrap_or(0).max(0) as u64,
        bytes_total: detail.and_then(|d| d.total).unwrap_or(0).max(0) as u64,
    })
}

fn map_event(message: EventMessage) -> EngineEvent {
    let (actor_id, name) = message
        .actor
        .map(|actor| {
            let name = actor
                .attributes
                .as_ref()
                .and_then(|attrs| attrs.get("name").cloned());
            (actor.id.unwrap_or_default(), name)
        })
        .unwrap_or_default();

    EngineEvent {
        resource: message.typ.map(|t| t.to_string()).unwrap_or_default(),
        action: message.action.unwrap_or_default(),
        actor_id,
        name,
    }
}

fn format_log_chunk(chunk: &LogOutput) -> String {
    let bytes = match chunk {
        LogOutput::StdOut { message }
        | LogOutput::StdErr { message }
        | LogOutput::Console { message }
        | LogOutput::StdIn { message } => message,
    };
    clean_line(bytes)
}

fn clean_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(&['\r', '\n'][..])
        .to_owned()
}

/// Build an in-memory tar holding exactly one file, for the file-write
/// primitive.
fn single_file_archive(file_name: &str, contents: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, file_name, contents)?;
    builder.into_inner()
}

fn split_reference(reference: &str) -> (String, String) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo.to_owned(), tag.to_owned()),
        _ => (reference.to_owned(), "latest".to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn reference_splits_into_repo_and_tag() {
        assert_eq!(
            split_reference("studio-runtime:cu12"),
            ("studio-runtime".to_owned(), "cu12".to_owned())
        );
        assert_eq!(
            split_reference("studio-runtime"),
            ("studio-runtime".to_owned(), "latest".to_owned())
        );
        assert_eq!(
            split_reference("registry:5000/studio"),
            ("registry:5000/studio".to_owned(), "latest".to_owned())
        );
        assert_eq!(
            split_reference("registry:5000/studio:v2"),
            ("registry:5000/studio".to_owned(), "v2".to_owned())
        );
    }

    #[test]
    fn pull_info_maps_known_phases_and_drops_noise() {
        let mut info = CreateImageInfo {
            id: Some("abc123".to_owned()),
            status: Some("Downloading".to_owned()),
            ..Default::default()
        };
        info.progress_detail = Some(bollard::service::ProgressDetail {
            current: Some(10),
            total: Some(100),
        });

        let progress = map_pull_info(&info).unwrap();
        assert_eq!(progress.phase, PullPhase::Downloading);
        assert_eq!(progress.bytes_current, 10);
        assert_eq!(progress.bytes_total, 100);
        assert_eq!(progress.layer_id.as_deref(), Some("abc123"));

        info.status = Some("Already exists".to_owned());
        assert_eq!(map_pull_info(&info).unwrap().phase, PullPhase::AlreadyExists);

        info.status = Some("Pull complete".to_owned());
        assert_eq!(map_pull_info(&info).unwrap().phase, PullPhase::Complete);

        info.status = Some("Pulling fs layer".to_owned());
        assert!(map_pull_info(&info).is_none());
    }

    #[test]
    fn container_states_map_onto_statuses() {
        assert_eq!(
            map_container_state(ContainerStateStatusEnum::RUNNING),
            EnvStatus::Running
        );
        assert_eq!(
            map_container_state(ContainerStateStatusEnum::EXITED),
            EnvStatus::Exited
        );
        assert_eq!(
            map_container_state(ContainerStateStatusEnum::REMOVING),
            EnvStatus::Dead
        );
    }

    #[test]
    fn transport_failures_are_classified_unavailable() {
        assert!(is_transport_failure("error trying to connect: Connection refused"));
        assert!(is_transport_failure(
            "IO error: No such file or directory (os error 2)"
        ));
        assert!(!is_transport_failure("invalid reference format"));
    }

    #[test]
    fn single_file_archive_round_trips() {
        let archive = single_file_archive("temp_requirements.txt", b"numpy\npillow\n").unwrap();

        let mut reader = tar::Archive::new(archive.as_slice());
        let mut entries = reader.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(
            entry.path().unwrap().to_string_lossy(),
            "temp_requirements.txt"
        );
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        assert_eq!(body, "numpy\npillow\n");
    }

    #[test]
    fn log_lines_are_trimmed() {
        assert_eq!(clean_line(b"hello world\r\n"), "hello world");
        assert_eq!(clean_line(b"no newline"), "no newline");
    }

    #[test]
    fn engine_time_parses_rfc3339() {
        let parsed = parse_engine_time("2026-02-01T10:30:00.123456789Z").unwrap();
        assert_eq!(parsed.timestamp(), 1_769_941_800);
        assert!(parse_engine_time("not a time").is_none());
    }
}
