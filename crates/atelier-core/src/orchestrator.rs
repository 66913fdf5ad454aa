use crate::config::OrchestratorConfig;
use crate::lifecycle::{self, DUPLICATE_TAG};
use crate::progress::{log_events, pull_events, LogEvent, PullEvent};
use crate::provision::Provisioner;
use crate::CoreError;
use atelier_engine::{ContainerEngine, ContainerSpec, EventStream};
use atelier_schema::{
    resolve, validate_name, EnvStatus, EnvironmentRecord, LaunchOptions, MountPlan, MountSpec,
    RecordMetadata, DEFAULT_APP_PORT, DELETED_FOLDER,
};
use atelier_store::RecordStore;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info, warn};

/// Parameters for creating a fresh environment.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub image: String,
    pub content_path: PathBuf,
    pub mount_spec: MountSpec,
    pub command: Option<String>,
    pub launch_options: LaunchOptions,
    pub folder_ids: Vec<String>,
}

/// Parameters for duplicating an environment. The image is not chosen by
/// the caller; it comes from committing the source container.
#[derive(Debug, Clone)]
pub struct DuplicateRequest {
    pub name: String,
    pub content_path: PathBuf,
    pub mount_spec: MountSpec,
    pub command: Option<String>,
    pub launch_options: LaunchOptions,
    pub folder_ids: Vec<String>,
}

/// Mutable record fields; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub name: Option<String>,
    pub folder_ids: Option<Vec<String>>,
}

/// Listing scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderFilter {
    /// Every record, soft-deleted ones included.
    Unfiltered,
    /// Every record except soft-deleted ones.
    All,
    /// Only records carrying this folder tag.
    Folder(String),
}

/// What a delete request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    SoftDeleted,
    HardDeleted,
}

/// Drives the environment state machine over a record store and a
/// container engine.
///
/// The store lock is never held across an engine call; operations read a
/// snapshot, talk to the engine, then merge their changes back by record
/// id. Two concurrent operations can therefore interleave engine-visible
/// effects, but never corrupt the table itself.
pub struct Orchestrator {
    store: RecordStore,
    engine: Arc<dyn ContainerEngine>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: OrchestratorConfig) -> Self {
        let store = config.store();
        Self {
            store,
            engine,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Create a container for the request and persist its record with
    /// status `created`. Nothing is persisted when any step fails.
    pub async fn create(&self, request: CreateRequest) -> Result<EnvironmentRecord, CoreError> {
        let records = self.load_reconciled().await?;
        Self::ensure_name_free(&records, &request.name, None)?;

        self.ensure_image(&request.image).await?;
        let plan = self
            .resolve_plan(&request.mount_spec, &request.content_path)
            .await?;
        let spec = Self::container_spec(
            &request.name,
            &request.image,
            request.command.as_deref(),
            &request.launch_options,
            &plan,
        );

        let id = self.engine.create_container(&spec).await?;
        info!(id = %id, name = %request.name, image = %request.image, "environment created");

        let record = EnvironmentRecord {
            id,
            name: request.name,
            image: request.image.clone(),
            status: EnvStatus::Created,
            content_path: request.content_path,
            mount_spec: request.mount_spec,
            command: request.command,
            launch_options: request.launch_options,
            folder_ids: request.folder_ids,
            duplicate: false,
            metadata: RecordMetadata {
                created_at: Some(Utc::now()),
                deleted_at: None,
                base_image: Some(request.image),
                extra: Default::default(),
            },
        };

        let stored = record.clone();
        self.store_update(move |records| records.push(stored)).await?;
        Ok(record)
    }

    /// Duplicate an environment by committing its container to a private
    /// image and creating a new container from it.
    ///
    /// If a previous duplicate already published the target image tag, that
    /// image is parked under a backup tag first and restored if container
    /// creation fails.
    pub async fn duplicate(
        &self,
        source_id: &str,
        request: DuplicateRequest,
    ) -> Result<EnvironmentRecord, CoreError> {
        let records = self.load_reconciled().await?;
        let source = Self::find(&records, source_id)?.clone();

        if !lifecycle::can_duplicate(source.status) {
            return Err(CoreError::Validation(format!(
                "environment {} has never been activated; activate it once before duplicating",
                source.name
            )));
        }
        Self::ensure_name_free(&records, &request.name, None)?;

        let repo = lifecycle::duplicate_repo(&request.name);
        let published = format!("{repo}:{DUPLICATE_TAG}");
        let backup_tag = lifecycle::backup_tag(Utc::now());
        let backup = format!("{repo}:{backup_tag}");

        let had_previous = self.engine.image_exists(&published).await?;
        if had_previous {
            self.engine
                .tag_image(&published, &repo, &backup_tag)
                .await?;
            debug!(image = %published, backup = %backup, "previous duplicate image parked");
        }

        let image = self
            .engine
            .commit_container(&source.id, &repo, DUPLICATE_TAG)
            .await?;
        info!(source = %source.id, image = %image, "source container committed");

        let plan = self
            .resolve_plan(&request.mount_spec, &request.content_path)
            .await?;
        let spec = Self::container_spec(
            &request.name,
            &image,
            request.command.as_deref(),
            &request.launch_options,
            &plan,
        );

        let id = match self.engine.create_container(&spec).await {
            Ok(id) => id,
            Err(create_err) => {
                if had_previous {
                    self.restore_parked_image(&repo, &backup).await;
                }
                return Err(create_err.into());
            }
        };

        let mut metadata = source.metadata.clone();
        metadata.created_at = Some(Utc::now());
        metadata.deleted_at = None;
        metadata.base_image = Some(source.image.clone());

        let record = EnvironmentRecord {
            id,
            name: request.name,
            image,
            status: EnvStatus::Created,
            content_path: request.content_path,
            mount_spec: request.mount_spec,
            command: request.command,
            launch_options: request.launch_options,
            folder_ids: request.folder_ids,
            duplicate: true,
            metadata,
        };

        let stored = record.clone();
        self.store_update(move |records| records.push(stored)).await?;
        Ok(record)
    }

    /// Start an environment. Unless `allow_multiple` is set, every other
    /// running environment is stopped first, best-effort: a single peer's
    /// stop failure is logged and skipped, but an unreachable engine aborts.
    ///
    /// An environment activated for the first time (status `created`) is
    /// provisioned, and restarted once if the extensions directory was
    /// provisioned, so freshly installed code is loaded.
    pub async fn activate(
        &self,
        id: &str,
        allow_multiple: bool,
    ) -> Result<EnvironmentRecord, CoreError> {
        let records = self.load_reconciled().await?;
        let mut target = Self::find(&records, id)?.clone();

        let mut statuses: Vec<(String, EnvStatus)> = Vec::new();
        if !allow_multiple {
            for peer in records
                .iter()
                .filter(|r| r.id != id && r.status == EnvStatus::Running)
            {
                match self
                    .engine
                    .stop_container(&peer.id, self.config.stop_timeout_secs)
                    .await
                {
                    Ok(()) => {
                        debug!(peer = %peer.id, "peer stopped");
                        statuses.push((peer.id.clone(), EnvStatus::Stopped));
                    }
                    Err(e) if e.is_unavailable() => return Err(e.into()),
                    Err(error) => {
                        warn!(peer = %peer.id, %error, "could not stop peer, continuing");
                    }
                }
            }
        }

        let pre_status = target.status;
        if pre_status != EnvStatus::Running {
            self.engine.start_container(&target.id).await?;
        }

        if pre_status == EnvStatus::Created {
            let plan = self
                .resolve_plan(&target.mount_spec, &target.content_path)
                .await?;
            let provisioner = Provisioner::new(
                self.engine.as_ref(),
                &self.config.package_blacklist,
                &self.config.archive_excludes,
            );
            let provisioned = provisioner
                .provision(&target.id, &plan, &self.config.app_root)
                .await?;
            if provisioned {
                info!(id = %target.id, "extensions provisioned, restarting");
                self.engine
                    .restart_container(&target.id, self.config.stop_timeout_secs)
                    .await?;
            }
        }

        statuses.push((target.id.clone(), EnvStatus::Running));
        self.persist_statuses(statuses).await?;

        info!(id = %target.id, name = %target.name, "environment activated");
        target.status = EnvStatus::Running;
        Ok(target)
    }

    /// Stop an environment. Already-inactive statuses are a no-op success.
    pub async fn deactivate(&self, id: &str) -> Result<EnvironmentRecord, CoreError> {
        let records = self.load_reconciled().await?;
        let mut target = Self::find(&records, id)?.clone();

        if lifecycle::is_idle(target.status) {
            debug!(id = %target.id, status = %target.status, "already inactive");
            return Ok(target);
        }

        self.engine
            .stop_container(&target.id, self.config.stop_timeout_secs)
            .await?;
        self.persist_statuses(vec![(target.id.clone(), EnvStatus::Stopped)])
            .await?;

        info!(id = %target.id, name = %target.name, "environment deactivated");
        target.status = EnvStatus::Stopped;
        Ok(target)
    }

    /// First delete soft-deletes: the record keeps its container and image
    /// but is tagged `deleted` and stamped. A second delete of the same
    /// record hard-deletes it: container and, for duplicates, image are
    /// removed and the record is erased. Soft deletion triggers retention
    /// pruning.
    pub async fn delete(&self, id: &str) -> Result<DeleteOutcome, CoreError> {
        let records = self.load_reconciled().await?;
        let target = Self::find(&records, id)?.clone();

        if target.is_deleted() {
            self.remove_backing(&target).await?;
            let target_id = target.id.clone();
            self.store_update(move |records| records.retain(|r| r.id != target_id))
                .await?;
            info!(id = %target.id, name = %target.name, "environment hard-deleted");
            return Ok(DeleteOutcome::HardDeleted);
        }

        let now = Utc::now();
        let target_id = target.id.clone();
        let found = self
            .store_update(move |records| {
                let Some(record) = records.iter_mut().find(|r| r.id == target_id) else {
                    return false;
                };
                record.folder_ids = vec![DELETED_FOLDER.to_owned()];
                record.metadata.deleted_at = Some(now);
                true
            })
            .await?;
        if !found {
            return Err(CoreError::NotFound(format!("environment {id}")));
        }
        info!(id = %target.id, name = %target.name, "environment soft-deleted");

        self.prune().await?;
        Ok(DeleteOutcome::SoftDeleted)
    }

    /// Enforce the retention bound: when more than `max_deleted` records
    /// are soft-deleted, hard-delete the oldest excess (missing deletion
    /// timestamps sort oldest). One record's failure is logged and does not
    /// stop the rest. Returns how many records were erased.
    pub async fn prune(&self) -> Result<usize, CoreError> {
        let records = self.store_read().await?;
        let mut deleted: Vec<&EnvironmentRecord> =
            records.iter().filter(|r| r.is_deleted()).collect();
        if deleted.len() <= self.config.max_deleted {
            return Ok(0);
        }

        deleted.sort_by_key(|r| r.metadata.deleted_at);
        let excess = deleted.len() - self.config.max_deleted;

        let mut erased: Vec<String> = Vec::new();
        for record in deleted.into_iter().take(excess) {
            match self.remove_backing(record).await {
                Ok(()) => erased.push(record.id.clone()),
                Err(error) => {
                    warn!(id = %record.id, %error, "prune skipped record");
                }
            }
        }

        if !erased.is_empty() {
            let ids = erased.clone();
            self.store_update(move |records| records.retain(|r| !ids.contains(&r.id)))
                .await?;
        }
        info!(pruned = erased.len(), excess, "retention pruning finished");
        Ok(erased.len())
    }

    /// One reconciled record.
    pub async fn get(&self, id: &str) -> Result<EnvironmentRecord, CoreError> {
        let records = self.load_reconciled().await?;
        Ok(Self::find(&records, id)?.clone())
    }

    /// Reconciled records in listing scope order.
    pub async fn list(&self, filter: FolderFilter) -> Result<Vec<EnvironmentRecord>, CoreError> {
        let records = self.load_reconciled().await?;
        Ok(match filter {
            FolderFilter::Unfiltered => records,
            FolderFilter::All => records.into_iter().filter(|r| !r.is_deleted()).collect(),
            FolderFilter::Folder(folder) => records
                .into_iter()
                .filter(|r| r.in_folder(&folder))
                .collect(),
        })
    }

    /// Rename an environment or replace its folder tags.
    pub async fn update(
        &self,
        id: &str,
        request: UpdateRequest,
    ) -> Result<EnvironmentRecord, CoreError> {
        let records = self.load_reconciled().await?;
        Self::find(&records, id)?;
        if let Some(name) = &request.name {
            Self::ensure_name_free(&records, name, Some(id))?;
        }

        let target_id = id.to_owned();
        let updated = self
            .store_update(move |records| {
                let record = records.iter_mut().find(|r| r.id == target_id)?;
                if let Some(name) = request.name {
                    record.name = name;
                }
                if let Some(folders) = request.folder_ids {
                    record.folder_ids = folders;
                }
                Some(record.clone())
            })
            .await?;
        updated.ok_or_else(|| CoreError::NotFound(format!("environment {id}")))
    }

    /// Image pull as front-end JSON events.
    pub fn pull(&self, reference: &str) -> impl Stream<Item = PullEvent> + Send {
        pull_events(self.engine.pull_image(reference))
    }

    /// Container log lines as front-end JSON events, following while the
    /// container runs.
    pub fn logs(
        &self,
        id: &str,
        since: Option<DateTime<Utc>>,
    ) -> impl Stream<Item = LogEvent> + Send {
        log_events(self.engine.container_logs(id, since))
    }

    /// Raw engine lifecycle events, for front ends that watch for
    /// out-of-band container changes.
    pub fn engine_events(&self) -> EventStream {
        self.engine.events()
    }

    /// Load all records with statuses reconciled against the engine.
    ///
    /// A container the engine no longer knows maps to `dead`; any other
    /// engine failure aborts the load and nothing is persisted. Changed
    /// statuses are written back before this returns, so a caller reading
    /// the store afterwards sees what this load saw.
    async fn load_reconciled(&self) -> Result<Vec<EnvironmentRecord>, CoreError> {
        let mut records = self.store_read().await?;

        let mut changes: Vec<(String, EnvStatus)> = Vec::new();
        for record in &mut records {
            let observed = match self.engine.inspect_container(&record.id).await {
                Ok(details) => details.status,
                Err(e) if e.is_not_found() => EnvStatus::Dead,
                Err(e) => return Err(e.into()),
            };
            if record.status != observed {
                debug!(id = %record.id, from = %record.status, to = %observed, "status reconciled");
                record.status = observed;
                changes.push((record.id.clone(), observed));
            }
        }

        if !changes.is_empty() {
            self.persist_statuses(changes).await?;
        }
        Ok(records)
    }

    async fn persist_statuses(
        &self,
        changes: Vec<(String, EnvStatus)>,
    ) -> Result<(), CoreError> {
        self.store_update(move |records| {
            for (id, status) in &changes {
                if let Some(record) = records.iter_mut().find(|r| r.id == *id) {
                    record.status = *status;
                }
            }
        })
        .await
    }

    /// Stop (tolerated to fail), force-remove the container, and remove the
    /// private image of a duplicate. Resources already gone are fine.
    async fn remove_backing(&self, record: &EnvironmentRecord) -> Result<(), CoreError> {
        match self
            .engine
            .stop_container(&record.id, self.config.stop_timeout_secs)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(error) => debug!(id = %record.id, %error, "stop before removal failed"),
        }

        match self.engine.remove_container(&record.id, true).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        if record.duplicate {
            match self.engine.remove_image(&record.image, true).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Best-effort restore of a parked duplicate image after container
    /// creation failed.
    async fn restore_parked_image(&self, repo: &str, backup: &str) {
        if let Err(error) = self.engine.tag_image(backup, repo, DUPLICATE_TAG).await {
            warn!(%backup, %error, "could not restore previous duplicate image");
            return;
        }
        if let Err(error) = self.engine.remove_image(backup, false).await {
            debug!(%backup, %error, "backup tag left behind");
        }
    }

    async fn ensure_image(&self, reference: &str) -> Result<(), CoreError> {
        if self.engine.image_exists(reference).await? {
            return Ok(());
        }
        info!(image = reference, "image missing locally, pulling");
        let mut stream = self.engine.pull_image(reference);
        while let Some(event) = stream.next().await {
            event?;
        }
        Ok(())
    }

    async fn resolve_plan(
        &self,
        spec: &MountSpec,
        content_root: &Path,
    ) -> Result<MountPlan, CoreError> {
        let spec = spec.clone();
        let root = content_root.to_path_buf();
        let app_root = self.config.app_root.clone();
        task::spawn_blocking(move || resolve(&spec, &root, &app_root))
            .await
            .map_err(join_err)?
            .map_err(CoreError::from)
    }

    fn container_spec(
        name: &str,
        image: &str,
        command: Option<&str>,
        launch: &LaunchOptions,
        plan: &MountPlan,
    ) -> ContainerSpec {
        ContainerSpec {
            name: name.to_owned(),
            image: image.to_owned(),
            command: lifecycle::split_command(command),
            env: Vec::new(),
            binds: plan.binds().cloned().collect(),
            port: Some(launch.port.unwrap_or(DEFAULT_APP_PORT)),
            gpu: launch.gpu,
            runtime: launch.runtime.clone(),
        }
    }

    fn find<'a>(
        records: &'a [EnvironmentRecord],
        id: &str,
    ) -> Result<&'a EnvironmentRecord, CoreError> {
        records
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("environment {id}")))
    }

    fn ensure_name_free(
        records: &[EnvironmentRecord],
        name: &str,
        except_id: Option<&str>,
    ) -> Result<(), CoreError> {
        validate_name(name)?;
        let clash = records
            .iter()
            .any(|r| !r.is_deleted() && r.name == name && Some(r.id.as_str()) != except_id);
        if clash {
            return Err(CoreError::Validation(format!(
                "environment name {name} is already in use"
            )));
        }
        Ok(())
    }

    async fn store_read(&self) -> Result<Vec<EnvironmentRecord>, CoreError> {
        let store = self.store.clone();
        task::spawn_blocking(move || store.read())
            .await
            .map_err(join_err)?
            .map_err(CoreError::from)
    }

    async fn store_update<T: Send + 'static>(
        &self,
        apply: impl FnOnce(&mut Vec<EnvironmentRecord>) -> T + Send + 'static,
    ) -> Result<T, CoreError> {
        let store = self.store.clone();
        task::spawn_blocking(move || store.update(apply))
            .await
            .map_err(join_err)?
            .map_err(CoreError::from)
    }
}

fn join_err(err: task::JoinError) -> CoreError {
    CoreError::Internal(format!("store task failed: {err}"))
}
