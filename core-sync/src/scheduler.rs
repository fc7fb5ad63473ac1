//! # Background Sync Scheduler
//!
//! Periodically picks at most one due sync job and hands it to the storage
//! backend for reconciliation.
//!
//! ## Overview
//!
//! The scheduler is a single owned value shared behind an `Arc`. Its only
//! in-memory state is the single-flight slot naming the job currently in
//! flight; everything else is re-read from the [`JobStore`] and the
//! [`AccountDirectory`] on every tick.
//!
//! ## Workflow
//!
//! ### Startup
//! 1. [`recover_interrupted`](SyncScheduler::recover_interrupted) turns every
//!    job persisted as `running` into `error` ("Job interrupted (app closed?)")
//! 2. The polling loop starts
//!
//! ### Tick
//! 1. Return immediately if a run is in flight
//! 2. Force any stray `running` record to `error` (self-heal)
//! 3. Collect due jobs whose account still exists (missing accounts are skipped
//!    with a warning), pick the earliest `next_run`, ties in storage order
//! 4. Claim the single-flight slot, persist `running`, spawn the run
//! 5. The run reconciles through the backend, then re-reads the store and
//!    writes only the run-state fields (status, last run, stats, next run)
//! 6. The slot is released when the run task ends, whatever the outcome
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::SyncScheduler;
//! use tokio_util::sync::CancellationToken;
//!
//! let scheduler = Arc::new(SyncScheduler::new(
//!     config.scheduler.clone(),
//!     store,
//!     backend,
//!     accounts,
//!     recorder,
//!     event_bus,
//!     clock,
//! ));
//!
//! let shutdown = CancellationToken::new();
//! let loop_handle = Arc::clone(&scheduler).spawn(shutdown.clone());
//!
//! // Manual trigger from the UI
//! scheduler.run_now(&job_id).await?;
//!
//! shutdown.cancel();
//! loop_handle.await?;
//! ```

use crate::{
    job::{SyncJob, SyncJobId, SyncStatus},
    repository::{update_job, JobStore},
    Result, SyncError,
};
use bridge_traits::{
    Account, AccountDirectory, ActionKind, ActivityEntry, ActivityRecorder, ActivitySource, Clock,
    ReconcileRequest, StorageBackend, SyncDirection, SyncStats,
};
use core_runtime::config::SchedulerConfig;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Message recorded when a `running` record is found with nothing in flight.
pub const INCONSISTENT_STATE_MESSAGE: &str = "Job state was inconsistent (no active run)";

// ============================================================================
// Single-Flight Guard
// ============================================================================

/// Slot holding the id of the job currently in flight.
#[derive(Debug, Default, Clone)]
struct FlightSlot {
    inner: Arc<StdMutex<Option<SyncJobId>>>,
}

impl FlightSlot {
    fn current(&self) -> Option<SyncJobId> {
        *self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_acquire(&self, job_id: SyncJobId) -> Option<FlightGuard> {
        let mut slot = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return None;
        }
        *slot = Some(job_id);
        Some(FlightGuard {
            slot: Arc::clone(&self.inner),
        })
    }
}

/// Releases the single-flight slot when dropped, including during unwinding.
#[derive(Debug)]
struct FlightGuard {
    slot: Arc<StdMutex<Option<SyncJobId>>>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }
}

// ============================================================================
// Tick Outcome
// ============================================================================

/// Result of a single polling step.
#[derive(Debug)]
pub enum TickOutcome {
    /// A run was already in flight; nothing was looked at.
    Busy { running: SyncJobId },
    /// No job was due.
    Idle,
    /// A run was launched. The handle resolves once the outcome is persisted.
    Started {
        job_id: SyncJobId,
        handle: JoinHandle<()>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Timer,
    Manual,
}

impl Trigger {
    fn activity_source(self) -> ActivitySource {
        match self {
            Trigger::Timer => ActivitySource::Scheduler,
            Trigger::Manual => ActivitySource::User,
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Single-flight background scheduler for sync jobs.
pub struct SyncScheduler {
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    backend: Arc<dyn StorageBackend>,
    accounts: Arc<dyn AccountDirectory>,
    recorder: Arc<dyn ActivityRecorder>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    flight: FlightSlot,
    /// Serializes selection (tick / run_now / recovery) so that the slot check,
    /// orphan healing and the `running` write happen as one step.
    selection: Mutex<()>,
}

impl SyncScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        backend: Arc<dyn StorageBackend>,
        accounts: Arc<dyn AccountDirectory>,
        recorder: Arc<dyn ActivityRecorder>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            backend,
            accounts,
            recorder,
            event_bus,
            clock,
            flight: FlightSlot::default(),
            selection: Mutex::new(()),
        }
    }

    /// Id of the job currently in flight, if any.
    pub fn running_job(&self) -> Option<SyncJobId> {
        self.flight.current()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Mark every job left `running` by a previous process as failed.
    ///
    /// Safe to call repeatedly; a store with no orphaned jobs is left untouched.
    /// Returns the ids of the recovered jobs.
    #[instrument(skip(self))]
    pub async fn recover_interrupted(&self) -> Result<Vec<SyncJobId>> {
        let _selection = self.selection.lock().await;
        let _edit = self.store.edit_lock().lock().await;

        let mut jobs = self.store.load_all().await?;
        let recovered = self.fail_orphans(&mut jobs, &self.config.interrupted_message)?;

        if recovered.is_empty() {
            debug!("No interrupted sync jobs found");
            return Ok(recovered);
        }

        self.store.replace_all(&jobs).await?;
        warn!(count = recovered.len(), "Recovered interrupted sync jobs");
        for job_id in &recovered {
            self.emit(SyncEvent::Recovered {
                job_id: job_id.to_string(),
                message: self.config.interrupted_message.clone(),
            });
        }

        Ok(recovered)
    }

    /// Run one polling step.
    ///
    /// # Errors
    ///
    /// Returns an error when the job store or the account directory cannot
    /// be read or the `running` state cannot be persisted. The tick is then
    /// abandoned without launching anything.
    #[instrument(skip(self))]
    pub async fn tick(self: &Arc<Self>) -> Result<TickOutcome> {
        let _selection = self.selection.lock().await;

        if let Some(running) = self.flight.current() {
            debug!(job_id = %running, "Sync run in flight, skipping tick");
            return Ok(TickOutcome::Busy { running });
        }

        let now = self.clock.unix_timestamp_millis();
        let _edit = self.store.edit_lock().lock().await;
        let mut jobs = self.store.load_all().await?;

        let healed = self.fail_orphans(&mut jobs, INCONSISTENT_STATE_MESSAGE)?;
        if !healed.is_empty() {
            warn!(count = healed.len(), "Reset sync jobs stuck in running state");
            self.store.replace_all(&jobs).await?;
            for job_id in &healed {
                self.emit(SyncEvent::Failed {
                    job_id: job_id.to_string(),
                    message: INCONSISTENT_STATE_MESSAGE.to_string(),
                    next_run: jobs
                        .iter()
                        .find(|job| &job.id == job_id)
                        .and_then(|job| job.next_run),
                });
            }
        }

        let accounts = self.accounts.accounts().await?;
        let Some((index, account)) = select_due_job(&jobs, &accounts, now) else {
            return Ok(TickOutcome::Idle);
        };

        let (job_id, handle) = self.launch(jobs, index, account, Trigger::Timer).await?;
        Ok(TickOutcome::Started { job_id, handle })
    }

    /// Start a job immediately, regardless of its schedule.
    ///
    /// Unlike timer runs, configuration problems are reported to the caller.
    ///
    /// # Errors
    ///
    /// - [`SyncError::SyncInProgress`] if any run is in flight
    /// - [`SyncError::JobNotFound`] if the job does not exist
    /// - [`SyncError::AccountNotFound`] if the job's account is gone
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn run_now(self: &Arc<Self>, job_id: &SyncJobId) -> Result<JoinHandle<()>> {
        let _selection = self.selection.lock().await;

        if let Some(running) = self.flight.current() {
            return Err(SyncError::SyncInProgress {
                job_id: running.to_string(),
            });
        }

        let _edit = self.store.edit_lock().lock().await;
        let mut jobs = self.store.load_all().await?;
        if !self.fail_orphans(&mut jobs, INCONSISTENT_STATE_MESSAGE)?.is_empty() {
            self.store.replace_all(&jobs).await?;
        }

        let index = jobs
            .iter()
            .position(|job| &job.id == job_id)
            .ok_or_else(|| SyncError::JobNotFound {
                job_id: job_id.to_string(),
            })?;

        let account_id = jobs[index].account_id.clone();
        let account = self
            .accounts
            .find(&account_id)
            .await?
            .ok_or(SyncError::AccountNotFound { account_id })?;

        let (_, handle) = self.launch(jobs, index, account, Trigger::Manual).await?;
        Ok(handle)
    }

    /// Spawn the polling loop.
    ///
    /// Runs startup recovery once, then ticks every
    /// [`SchedulerConfig::tick_interval`] until `shutdown` is cancelled.
    /// Runs already in flight are not interrupted by shutdown.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.recover_interrupted().await {
                error!(error = %e, "Startup recovery failed");
            }

            let mut ticker = tokio::time::interval(self.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of a tokio interval completes immediately.
            ticker.tick().await;

            info!(
                tick_interval_ms = self.config.tick_interval.as_millis() as u64,
                "Sync scheduler started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Sync scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match self.tick().await {
                            Ok(TickOutcome::Started { job_id, .. }) => {
                                debug!(job_id = %job_id, "Scheduled sync launched");
                            }
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "Scheduler tick abandoned"),
                        }
                    }
                }
            }
        })
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Fail every `running` record in `jobs`. Must be called with the
    /// selection lock held and nothing in flight.
    fn fail_orphans(&self, jobs: &mut [SyncJob], message: &str) -> Result<Vec<SyncJobId>> {
        if self.flight.current().is_some() {
            return Ok(Vec::new());
        }

        let now = self.clock.unix_timestamp_millis();
        let retry = self.config.error_retry_delay_millis();
        let mut failed = Vec::new();

        for job in jobs.iter_mut().filter(|job| job.status == SyncStatus::Running) {
            *job = job.clone().fail(message, now, retry)?;
            failed.push(job.id);
        }

        Ok(failed)
    }

    async fn launch(
        self: &Arc<Self>,
        mut jobs: Vec<SyncJob>,
        index: usize,
        account: Account,
        trigger: Trigger,
    ) -> Result<(SyncJobId, JoinHandle<()>)> {
        let job_id = jobs[index].id;
        let guard = self
            .flight
            .try_acquire(job_id)
            .ok_or_else(|| SyncError::SyncInProgress {
                job_id: job_id.to_string(),
            })?;

        jobs[index] = jobs[index].clone().start()?;
        self.store.replace_all(&jobs).await?;

        let job = jobs.swap_remove(index);
        info!(
            job_id = %job.id,
            name = %job.name,
            bucket = %job.bucket,
            manual = trigger == Trigger::Manual,
            "Starting sync run"
        );
        self.emit(SyncEvent::Started {
            job_id: job.id.to_string(),
            account_id: job.account_id.clone(),
            manual: trigger == Trigger::Manual,
        });

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            scheduler.execute(job, trigger).await;
        });

        Ok((job_id, handle))
    }

    async fn execute(&self, job: SyncJob, trigger: Trigger) {
        let outcome = self.reconcile(&job).await;
        let account = self.accounts.find(&job.account_id).await.ok().flatten();
        self.finish(&job, outcome).await;

        if let Some(account) = account {
            self.record_run(&account, &job, trigger).await;
        }
    }

    async fn reconcile(&self, job: &SyncJob) -> Result<SyncStats> {
        if job.direction != SyncDirection::Upload {
            return Err(SyncError::UnsupportedDirection(job.direction.to_string()));
        }

        let account = self
            .accounts
            .find(&job.account_id)
            .await?
            .ok_or_else(|| SyncError::AccountNotFound {
                account_id: job.account_id.clone(),
            })?;

        let request = ReconcileRequest {
            bucket: job.bucket.clone(),
            local_path: job.local_path.clone(),
            remote_path: job.remote_path.clone(),
            direction: job.direction,
            mirror: job.mirror_sync,
        };

        Ok(self.backend.reconcile(&account, &request).await?)
    }

    /// Persist the run outcome on a fresh read of the job.
    async fn finish(&self, job: &SyncJob, outcome: Result<SyncStats>) {
        let now = self.clock.unix_timestamp_millis();
        let retry = self.config.error_retry_delay_millis();
        let failure = outcome.as_ref().err().map(failure_message);

        let persisted = update_job(self.store.as_ref(), &job.id, |current| {
            let running = if current.status == SyncStatus::Running {
                current.clone()
            } else {
                current.clone().start()?
            };

            let finished = match &outcome {
                Ok(stats) => running.complete(stats.clone(), now)?,
                Err(e) => running.fail(failure_message(e), now, retry)?,
            };

            *current = finished.clone();
            Ok(finished)
        })
        .await;

        match persisted {
            Ok(Some(finished)) => match (&finished.last_stats, &failure) {
                (Some(stats), None) => {
                    info!(
                        job_id = %finished.id,
                        files_transferred = stats.files_transferred,
                        bytes_transferred = stats.bytes_transferred,
                        errors = stats.errors.len(),
                        "Sync run completed"
                    );
                    self.emit(SyncEvent::Completed {
                        job_id: finished.id.to_string(),
                        files_scanned: stats.files_scanned,
                        files_transferred: stats.files_transferred,
                        bytes_transferred: stats.bytes_transferred,
                        error_count: stats.errors.len(),
                        next_run: finished.next_run,
                    });
                }
                (_, failure) => {
                    let message = failure.clone().unwrap_or_default();
                    warn!(job_id = %finished.id, error = %message, "Sync run failed");
                    self.emit(SyncEvent::Failed {
                        job_id: finished.id.to_string(),
                        message,
                        next_run: finished.next_run,
                    });
                }
            },
            Ok(None) => {
                info!(job_id = %job.id, "Sync job was deleted during its run, outcome dropped");
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to persist sync outcome");
            }
        }
    }

    async fn record_run(&self, account: &Account, job: &SyncJob, trigger: Trigger) {
        let Ok(Some(current)) = crate::repository::find_job(self.store.as_ref(), &job.id).await
        else {
            return;
        };

        let source = trigger.activity_source();
        let entry = match (current.status, current.last_stats) {
            (SyncStatus::Completed, Some(stats)) => {
                ActivityEntry::success(&job.bucket, ActionKind::Sync, source)
                    .with_bytes(stats.bytes_transferred)
            }
            (_, stats) => {
                let message = stats
                    .and_then(|stats| stats.errors.into_iter().next())
                    .unwrap_or_else(|| "sync failed".to_string());
                ActivityEntry::failure(&job.bucket, ActionKind::Sync, source, message)
            }
        }
        .with_paths(Some(job.remote_path.clone()), None);

        self.recorder.record(account, entry).await;
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is not an error for the scheduler.
        let _ = self.event_bus.emit(CoreEvent::Sync(event));
    }
}

/// Pick the due job with the earliest `next_run`, ties broken by storage
/// order. Jobs whose account is missing are skipped.
fn select_due_job(jobs: &[SyncJob], accounts: &[Account], now: i64) -> Option<(usize, Account)> {
    jobs.iter()
        .enumerate()
        .filter(|(_, job)| job.is_due(now))
        .filter_map(|(index, job)| {
            match accounts.iter().find(|account| account.id == job.account_id) {
                Some(account) => Some((index, job, account)),
                None => {
                    warn!(
                        job_id = %job.id,
                        account_id = %job.account_id,
                        "Sync job skipped: account not found"
                    );
                    None
                }
            }
        })
        .min_by_key(|(index, job, _)| (job.next_run.unwrap_or(i64::MIN), *index))
        .map(|(index, _, account)| (index, account.clone()))
}

fn failure_message(err: &SyncError) -> String {
    match err {
        SyncError::Backend(inner) => inner.to_string(),
        other => other.to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
