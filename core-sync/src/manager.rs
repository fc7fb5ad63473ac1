//! Owner-facing CRUD for sync job definitions.
//!
//! Edits go through the same [`JobStore`] the scheduler reads, so a change is
//! picked up on the next tick. Run-state fields are never written here.

use crate::{
    job::{format_interval, JobChange, JobEdit, NewSyncJob, SyncJob, SyncJobId},
    repository::{find_job, update_job, JobStore},
    Result, SyncError,
};
use bridge_traits::{
    AccountDirectory, ActionKind, ActivityEntry, ActivityRecorder, ActivitySource, Clock,
};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct SyncJobManager {
    store: Arc<dyn JobStore>,
    accounts: Arc<dyn AccountDirectory>,
    recorder: Arc<dyn ActivityRecorder>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl SyncJobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        accounts: Arc<dyn AccountDirectory>,
        recorder: Arc<dyn ActivityRecorder>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            accounts,
            recorder,
            event_bus,
            clock,
        }
    }

    /// Create and persist a new job.
    ///
    /// # Errors
    ///
    /// - [`SyncError::AccountNotFound`] if the account does not exist
    /// - [`SyncError::InvalidJob`] if a required field is blank
    #[instrument(skip(self, request), fields(account_id = %request.account_id, bucket = %request.bucket))]
    pub async fn create_job(&self, request: NewSyncJob) -> Result<SyncJob> {
        let account = self
            .accounts
            .find(&request.account_id)
            .await?
            .ok_or_else(|| SyncError::AccountNotFound {
                account_id: request.account_id.clone(),
            })?;

        let job = SyncJob::create(request, self.clock.unix_timestamp_millis())?;

        {
            let _edit = self.store.edit_lock().lock().await;
            let mut jobs = self.store.load_all().await?;
            jobs.push(job.clone());
            self.store.replace_all(&jobs).await?;
        }

        info!(job_id = %job.id, name = %job.name, "Sync job created");
        self.recorder
            .record(
                &account,
                ActivityEntry::success(&job.bucket, ActionKind::SyncCreated, ActivitySource::User)
                    .with_paths(Some(local_path_of(&job)), Some(job.remote_path.clone())),
            )
            .await;
        self.notify();

        Ok(job)
    }

    /// Apply an owner edit.
    ///
    /// Each field that actually changed produces one activity record.
    /// Renames carry `"old → new"`, interval edits carry the human form of
    /// both intervals, mirror toggles carry the local folder.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::JobNotFound`] if the job does not exist
    #[instrument(skip(self, edit), fields(job_id = %job_id))]
    pub async fn update_job(&self, job_id: &SyncJobId, edit: JobEdit) -> Result<SyncJob> {
        let now = self.clock.unix_timestamp_millis();

        let (job, changes) = update_job(self.store.as_ref(), job_id, |job| {
            let changes = job.apply_edit(edit, now);
            Ok((job.clone(), changes))
        })
        .await?
        .ok_or_else(|| SyncError::JobNotFound {
            job_id: job_id.to_string(),
        })?;

        if changes.is_empty() {
            return Ok(job);
        }

        info!(job_id = %job.id, changes = changes.len(), "Sync job updated");
        self.record_changes(&job, &changes).await;
        self.notify();

        Ok(job)
    }

    /// Remove a job. A run in flight finishes but its outcome is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::JobNotFound`] if the job does not exist
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn delete_job(&self, job_id: &SyncJobId) -> Result<SyncJob> {
        let edit = self.store.edit_lock().lock().await;
        let mut jobs = self.store.load_all().await?;
        let index = jobs
            .iter()
            .position(|job| &job.id == job_id)
            .ok_or_else(|| SyncError::JobNotFound {
                job_id: job_id.to_string(),
            })?;

        let removed = jobs.remove(index);
        self.store.replace_all(&jobs).await?;
        drop(edit);

        info!(job_id = %removed.id, name = %removed.name, "Sync job deleted");
        if let Some(account) = self.accounts.find(&removed.account_id).await.ok().flatten() {
            self.recorder
                .record(
                    &account,
                    ActivityEntry::success(
                        &removed.bucket,
                        ActionKind::SyncDeleted,
                        ActivitySource::User,
                    )
                    .with_paths(Some(local_path_of(&removed)), None),
                )
                .await;
        }
        self.notify();

        Ok(removed)
    }

    /// All jobs in storage order.
    pub async fn list_jobs(&self) -> Result<Vec<SyncJob>> {
        self.store.load_all().await
    }

    pub async fn get_job(&self, job_id: &SyncJobId) -> Result<Option<SyncJob>> {
        find_job(self.store.as_ref(), job_id).await
    }

    async fn record_changes(&self, job: &SyncJob, changes: &[JobChange]) {
        let account = match self.accounts.find(&job.account_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                warn!(account_id = %job.account_id, "Edit not recorded: account not found");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Edit not recorded: account lookup failed");
                return;
            }
        };

        for change in changes {
            let (action, before) = match change {
                JobChange::Renamed { from, to } => {
                    (ActionKind::SyncNameChanged, format!("{} → {}", from, to))
                }
                JobChange::IntervalChanged { from, to } => (
                    ActionKind::SyncIntervalChanged,
                    format!("{} → {}", format_interval(*from), format_interval(*to)),
                ),
                JobChange::MirrorToggled { enabled: true } => {
                    (ActionKind::SyncMirrorEnabled, local_path_of(job))
                }
                JobChange::MirrorToggled { enabled: false } => {
                    (ActionKind::SyncMirrorDisabled, local_path_of(job))
                }
            };

            self.recorder
                .record(
                    &account,
                    ActivityEntry::success(&job.bucket, action, ActivitySource::User)
                        .with_paths(Some(before), None),
                )
                .await;
        }
    }

    fn notify(&self) {
        let _ = self.event_bus.emit(CoreEvent::Sync(SyncEvent::JobsChanged));
    }
}

fn local_path_of(job: &SyncJob) -> String {
    job.local_path.to_string_lossy().into_owned()
}
