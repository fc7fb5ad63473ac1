//! Integration tests for the background sync scheduler
//!
//! These tests drive the scheduler against in-memory fakes and verify:
//! - Single-flight execution across timer and manual runs
//! - Crash recovery of jobs left running
//! - Retry scheduling after failures
//! - Soft-skip of jobs whose account disappeared
//! - Outcome persistence on a fresh read (concurrent edits, deletes)

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult, Account, AccountDirectory, ActionKind, ActivityEntry,
    ActivityRecorder, ActivitySource, ActivityStatus, BridgeError, Clock, ManualClock,
    ProgressFn, ProviderKind, ReconcileRequest, RemoteObject, StorageBackend, SyncDirection,
    SyncStats,
};
use core_runtime::config::SchedulerConfig;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_sync::{
    InMemoryJobStore, JobStore, NewSyncJob, SyncError, SyncJob, SyncJobId, SyncScheduler,
    SyncStatus, TickOutcome, INCONSISTENT_STATE_MESSAGE,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

const NOW: i64 = 1_700_000_000_000;
const RETRY_MS: i64 = 300_000;

// ============================================================================
// Fakes
// ============================================================================

/// Backend whose reconcile results are scripted per call.
struct ScriptedBackend {
    results: Mutex<VecDeque<BridgeResult<SyncStats>>>,
    requests: Mutex<Vec<ReconcileRequest>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Every reconcile waits for a permit on `gate`.
    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new()
        }
    }

    fn push_result(&self, result: BridgeResult<SyncStats>) {
        self.results.lock().unwrap().push_back(result);
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<ReconcileRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageBackend for ScriptedBackend {
    async fn reconcile(&self, _account: &Account, request: &ReconcileRequest) -> BridgeResult<SyncStats> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SyncStats::default()))
    }

    async fn copy_object_server_side(
        &self,
        _account: &Account,
        _src_bucket: &str,
        _src_key: &str,
        _dst_bucket: &str,
        _dst_key: &str,
    ) -> BridgeResult<()> {
        unreachable!("not used by the scheduler")
    }

    async fn rename_object(&self, _: &Account, _: &str, _: &str, _: &str) -> BridgeResult<()> {
        unreachable!("not used by the scheduler")
    }

    async fn stream_transfer_object(
        &self,
        _source: &Account,
        _src_bucket: &str,
        _src_key: &str,
        _dest: &Account,
        _dst_bucket: &str,
        _dst_key: &str,
        _progress: Option<ProgressFn>,
    ) -> BridgeResult<u64> {
        unreachable!("not used by the scheduler")
    }

    async fn list_objects(&self, _: &Account, _: &str, _: &str) -> BridgeResult<Vec<RemoteObject>> {
        Ok(Vec::new())
    }
}

struct FakeAccounts(Mutex<Vec<Account>>);

impl FakeAccounts {
    fn with(ids: &[&str]) -> Self {
        Self(Mutex::new(
            ids.iter()
                .map(|id| Account::new(*id, *id, ProviderKind::Minio).with_activity_log(true))
                .collect(),
        ))
    }

    fn remove(&self, id: &str) {
        self.0.lock().unwrap().retain(|account| account.id != id);
    }
}

#[async_trait]
impl AccountDirectory for FakeAccounts {
    async fn accounts(&self) -> BridgeResult<Vec<Account>> {
        Ok(self.0.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct CollectingRecorder(Mutex<Vec<(String, ActivityEntry)>>);

impl CollectingRecorder {
    fn entries(&self) -> Vec<(String, ActivityEntry)> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivityRecorder for CollectingRecorder {
    async fn record(&self, account: &Account, entry: ActivityEntry) {
        self.0.lock().unwrap().push((account.id.clone(), entry));
    }
}

/// Job store whose first `failures` loads fail.
struct FlakyStore {
    inner: InMemoryJobStore,
    failures: AtomicUsize,
    loads: AtomicUsize,
}

impl FlakyStore {
    fn new(jobs: Vec<SyncJob>, failures: usize) -> Self {
        Self {
            inner: InMemoryJobStore::with_jobs(jobs),
            failures: AtomicUsize::new(failures),
            loads: AtomicUsize::new(0),
        }
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn load_all(&self) -> core_sync::Result<Vec<SyncJob>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SyncError::Store("disk unavailable".to_string()));
        }
        self.inner.load_all().await
    }

    async fn replace_all(&self, jobs: &[SyncJob]) -> core_sync::Result<()> {
        self.inner.replace_all(jobs).await
    }

    fn edit_lock(&self) -> &tokio::sync::Mutex<()> {
        self.inner.edit_lock()
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    scheduler: Arc<SyncScheduler>,
    store: Arc<InMemoryJobStore>,
    backend: Arc<ScriptedBackend>,
    accounts: Arc<FakeAccounts>,
    recorder: Arc<CollectingRecorder>,
    clock: Arc<ManualClock>,
    event_bus: EventBus,
}

impl Harness {
    fn new(jobs: Vec<SyncJob>, backend: ScriptedBackend) -> Self {
        let store = Arc::new(InMemoryJobStore::with_jobs(jobs));
        let backend = Arc::new(backend);
        let accounts = Arc::new(FakeAccounts::with(&["acc-1", "acc-2"]));
        let recorder = Arc::new(CollectingRecorder::default());
        let clock = Arc::new(ManualClock::new(NOW));
        let event_bus = EventBus::new(64);

        let scheduler = Arc::new(SyncScheduler::new(
            SchedulerConfig::default(),
            store.clone(),
            backend.clone(),
            accounts.clone(),
            recorder.clone(),
            event_bus.clone(),
            clock.clone(),
        ));

        Self {
            scheduler,
            store,
            backend,
            accounts,
            recorder,
            clock,
            event_bus,
        }
    }

    async fn job(&self, id: &SyncJobId) -> Option<SyncJob> {
        self.store
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .find(|job| &job.id == id)
    }

    async fn tick_and_wait(&self) -> Option<SyncJobId> {
        match self.scheduler.tick().await.unwrap() {
            TickOutcome::Started { job_id, handle } => {
                handle.await.unwrap();
                Some(job_id)
            }
            _ => None,
        }
    }
}

/// A recurring upload job whose next run is `due_at`.
fn due_job(folder: &str, account: &str, interval: u64, due_at: i64) -> SyncJob {
    let mut job = SyncJob::create(
        NewSyncJob::new(account, "bucket", folder, SyncDirection::Upload)
            .with_remote_path(format!("backup{}/", folder))
            .with_interval(interval),
        NOW - 1_000_000,
    )
    .unwrap();
    job.next_run = Some(due_at);
    job
}

fn stats(transferred: u64, bytes: u64) -> SyncStats {
    SyncStats {
        files_scanned: transferred + 2,
        files_transferred: transferred,
        bytes_transferred: bytes,
        errors: Vec::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_successful_run_schedules_next_interval() {
    let job = due_job("/photos", "acc-1", 3_600, NOW - 1);
    let harness = Harness::new(vec![job.clone()], ScriptedBackend::new());
    harness.backend.push_result(Ok(stats(3, 4_096)));
    let mut events = harness.event_bus.subscribe();

    assert_eq!(harness.tick_and_wait().await, Some(job.id));

    let stored = harness.job(&job.id).await.unwrap();
    assert_eq!(stored.status, SyncStatus::Completed);
    assert_eq!(stored.last_run, Some(NOW));
    assert_eq!(stored.next_run, Some(NOW + 3_600_000));
    assert_eq!(stored.last_stats, Some(stats(3, 4_096)));

    let request = &harness.backend.requests()[0];
    assert_eq!(request.bucket, "bucket");
    assert_eq!(request.remote_path, "backup/photos/");
    assert!(!request.mirror);

    assert!(matches!(
        events.recv().await.unwrap(),
        CoreEvent::Sync(SyncEvent::Started { manual: false, .. })
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        CoreEvent::Sync(SyncEvent::Completed {
            files_transferred: 3,
            bytes_transferred: 4_096,
            ..
        })
    ));

    let entries = harness.recorder.entries();
    assert_eq!(entries.len(), 1);
    let (account_id, entry) = &entries[0];
    assert_eq!(account_id, "acc-1");
    assert_eq!(entry.action, ActionKind::Sync);
    assert_eq!(entry.status, ActivityStatus::Success);
    assert_eq!(entry.source, ActivitySource::Scheduler);
    assert_eq!(entry.path_before.as_deref(), Some("backup/photos/"));
    assert_eq!(entry.byte_count, Some(4_096));
}

#[tokio::test]
async fn test_failure_retries_after_fixed_delay() {
    let job = due_job("/photos", "acc-1", 86_400, NOW - 1);
    let harness = Harness::new(vec![job.clone()], ScriptedBackend::new());
    harness
        .backend
        .push_result(Err(BridgeError::OperationFailed("access denied".to_string())));

    harness.tick_and_wait().await.unwrap();

    let stored = harness.job(&job.id).await.unwrap();
    assert_eq!(stored.status, SyncStatus::Error);
    assert_eq!(stored.next_run, Some(NOW + RETRY_MS));
    let last_stats = stored.last_stats.unwrap();
    assert_eq!(last_stats.files_transferred, 0);
    assert_eq!(
        last_stats.errors,
        vec!["Bridge operation failed: access denied".to_string()]
    );

    let (_, entry) = &harness.recorder.entries()[0];
    assert_eq!(entry.status, ActivityStatus::Failed);
    assert!(entry.error_message.as_deref().unwrap().contains("access denied"));
}

#[tokio::test]
async fn test_download_direction_is_rejected() {
    let mut job = due_job("/docs", "acc-1", 60, NOW - 1);
    job.direction = SyncDirection::Download;
    let harness = Harness::new(vec![job.clone()], ScriptedBackend::new());

    harness.tick_and_wait().await.unwrap();

    let stored = harness.job(&job.id).await.unwrap();
    assert_eq!(stored.status, SyncStatus::Error);
    assert!(stored.last_stats.unwrap().errors[0].contains("Unsupported sync direction"));
    assert_eq!(harness.backend.calls(), 0);
}

#[tokio::test]
async fn test_manual_job_never_runs_on_timer() {
    let mut job = due_job("/photos", "acc-1", 0, NOW - 1);
    job.next_run = None;
    let harness = Harness::new(vec![job], ScriptedBackend::new());

    harness.clock.advance_millis(365 * 86_400_000);
    assert!(matches!(
        harness.scheduler.tick().await.unwrap(),
        TickOutcome::Idle
    ));
    assert_eq!(harness.backend.calls(), 0);
}

#[tokio::test]
async fn test_earliest_due_job_wins() {
    let later = due_job("/a", "acc-1", 60, NOW - 10);
    let earlier = due_job("/b", "acc-1", 60, NOW - 500);
    let tied = due_job("/c", "acc-1", 60, NOW - 500);
    let harness = Harness::new(
        vec![later.clone(), earlier.clone(), tied.clone()],
        ScriptedBackend::new(),
    );

    assert_eq!(harness.tick_and_wait().await, Some(earlier.id));
    assert_eq!(harness.tick_and_wait().await, Some(tied.id));
    assert_eq!(harness.tick_and_wait().await, Some(later.id));
    assert_eq!(harness.tick_and_wait().await, None);
}

#[tokio::test]
async fn test_single_flight_across_timer_and_manual_runs() {
    let gate = Arc::new(Semaphore::new(0));
    let first = due_job("/a", "acc-1", 60, NOW - 100);
    let second = due_job("/b", "acc-2", 60, NOW - 50);
    let harness = Harness::new(
        vec![first.clone(), second.clone()],
        ScriptedBackend::gated(gate.clone()),
    );

    let handle = match harness.scheduler.tick().await.unwrap() {
        TickOutcome::Started { job_id, handle } => {
            assert_eq!(job_id, first.id);
            handle
        }
        other => panic!("expected a run to start, got {:?}", other),
    };

    assert_eq!(harness.scheduler.running_job(), Some(first.id));
    assert!(matches!(
        harness.scheduler.tick().await.unwrap(),
        TickOutcome::Busy { running } if running == first.id
    ));
    assert!(matches!(
        harness.scheduler.run_now(&second.id).await,
        Err(SyncError::SyncInProgress { .. })
    ));

    let running: Vec<_> = harness
        .store
        .load_all()
        .await
        .unwrap()
        .into_iter()
        .filter(|job| job.status == SyncStatus::Running)
        .collect();
    assert_eq!(running.len(), 1);

    gate.add_permits(1);
    handle.await.unwrap();
    assert_eq!(harness.scheduler.running_job(), None);

    gate.add_permits(1);
    assert_eq!(harness.tick_and_wait().await, Some(second.id));
}

#[tokio::test]
async fn test_recovery_marks_interrupted_jobs() {
    let recurring = due_job("/a", "acc-1", 60, NOW + 60_000).start().unwrap();
    let mut manual = due_job("/b", "acc-1", 0, NOW);
    manual.next_run = None;
    let manual = manual.start().unwrap();
    let idle = due_job("/c", "acc-1", 60, NOW + 60_000);

    let harness = Harness::new(
        vec![recurring.clone(), manual.clone(), idle.clone()],
        ScriptedBackend::new(),
    );
    let mut events = harness.event_bus.subscribe();

    let recovered = harness.scheduler.recover_interrupted().await.unwrap();
    assert_eq!(recovered, vec![recurring.id, manual.id]);

    let stored = harness.job(&recurring.id).await.unwrap();
    assert_eq!(stored.status, SyncStatus::Error);
    assert_eq!(stored.next_run, Some(NOW + RETRY_MS));
    assert_eq!(
        stored.last_stats.unwrap().errors,
        vec!["Job interrupted (app closed?)".to_string()]
    );

    let stored_manual = harness.job(&manual.id).await.unwrap();
    assert_eq!(stored_manual.status, SyncStatus::Error);
    assert_eq!(stored_manual.next_run, None);

    assert_eq!(harness.job(&idle.id).await.unwrap(), idle);

    assert!(matches!(
        events.recv().await.unwrap(),
        CoreEvent::Sync(SyncEvent::Recovered { .. })
    ));
}

#[tokio::test]
async fn test_recovery_is_idempotent() {
    let running = due_job("/a", "acc-1", 60, NOW).start().unwrap();
    let harness = Harness::new(vec![running], ScriptedBackend::new());

    harness.scheduler.recover_interrupted().await.unwrap();
    let after_first = harness.store.load_all().await.unwrap();

    assert!(harness.scheduler.recover_interrupted().await.unwrap().is_empty());
    assert_eq!(harness.store.load_all().await.unwrap(), after_first);
}

#[tokio::test]
async fn test_tick_heals_stray_running_job() {
    let stray = due_job("/a", "acc-1", 60, NOW + 60_000).start().unwrap();
    let harness = Harness::new(vec![stray.clone()], ScriptedBackend::new());

    assert!(matches!(
        harness.scheduler.tick().await.unwrap(),
        TickOutcome::Idle
    ));

    let stored = harness.job(&stray.id).await.unwrap();
    assert_eq!(stored.status, SyncStatus::Error);
    assert_eq!(
        stored.last_stats.unwrap().errors,
        vec![INCONSISTENT_STATE_MESSAGE.to_string()]
    );
}

#[tokio::test]
async fn test_missing_account_is_skipped_not_failed() {
    let orphan = due_job("/a", "acc-1", 60, NOW - 1_000);
    let healthy = due_job("/b", "acc-2", 60, NOW - 1);
    let harness = Harness::new(vec![orphan.clone(), healthy.clone()], ScriptedBackend::new());
    harness.accounts.remove("acc-1");

    assert_eq!(harness.tick_and_wait().await, Some(healthy.id));
    assert_eq!(harness.job(&orphan.id).await.unwrap(), orphan);

    assert!(matches!(
        harness.scheduler.run_now(&orphan.id).await,
        Err(SyncError::AccountNotFound { .. })
    ));
}

#[tokio::test]
async fn test_run_now_ignores_schedule() {
    let mut manual = due_job("/a", "acc-1", 0, NOW);
    manual.next_run = None;
    let harness = Harness::new(vec![manual.clone()], ScriptedBackend::new());
    harness.backend.push_result(Ok(stats(1, 10)));
    let mut events = harness.event_bus.subscribe();

    harness.scheduler.run_now(&manual.id).await.unwrap().await.unwrap();

    let stored = harness.job(&manual.id).await.unwrap();
    assert_eq!(stored.status, SyncStatus::Completed);
    assert_eq!(stored.next_run, None);
    assert!(matches!(
        events.recv().await.unwrap(),
        CoreEvent::Sync(SyncEvent::Started { manual: true, .. })
    ));
    assert_eq!(harness.recorder.entries()[0].1.source, ActivitySource::User);

    assert!(matches!(
        harness.scheduler.run_now(&SyncJobId::new()).await,
        Err(SyncError::JobNotFound { .. })
    ));
}

#[tokio::test]
async fn test_owner_edit_during_run_survives() {
    let gate = Arc::new(Semaphore::new(0));
    let job = due_job("/a", "acc-1", 60, NOW - 1);
    let harness = Harness::new(vec![job.clone()], ScriptedBackend::gated(gate.clone()));

    let TickOutcome::Started { handle, .. } = harness.scheduler.tick().await.unwrap() else {
        panic!("expected a run to start");
    };

    core_sync::repository::update_job(harness.store.as_ref(), &job.id, |job| {
        job.name = "Renamed".to_string();
        job.mirror_sync = true;
        Ok(())
    })
    .await
    .unwrap();

    gate.add_permits(1);
    handle.await.unwrap();

    let stored = harness.job(&job.id).await.unwrap();
    assert_eq!(stored.name, "Renamed");
    assert!(stored.mirror_sync);
    assert_eq!(stored.status, SyncStatus::Completed);
}

#[tokio::test]
async fn test_job_deleted_during_run_is_not_resurrected() {
    let gate = Arc::new(Semaphore::new(0));
    let job = due_job("/a", "acc-1", 60, NOW - 1);
    let harness = Harness::new(vec![job.clone()], ScriptedBackend::gated(gate.clone()));

    let TickOutcome::Started { handle, .. } = harness.scheduler.tick().await.unwrap() else {
        panic!("expected a run to start");
    };

    harness.store.replace_all(&[]).await.unwrap();
    gate.add_permits(1);
    handle.await.unwrap();

    assert!(harness.store.load_all().await.unwrap().is_empty());
    assert_eq!(harness.scheduler.running_job(), None);
}

#[tokio::test(start_paused = true)]
async fn test_background_loop_runs_due_jobs_until_cancelled() {
    let job = due_job("/a", "acc-1", 3_600, NOW - 1);
    let harness = Harness::new(vec![job.clone()], ScriptedBackend::new());

    let shutdown = CancellationToken::new();
    let handle = Arc::clone(&harness.scheduler).spawn(shutdown.clone());

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(harness.backend.calls(), 1);
    assert_eq!(
        harness.job(&job.id).await.unwrap().status,
        SyncStatus::Completed
    );

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(harness.clock.unix_timestamp_millis(), NOW);
}

#[tokio::test(start_paused = true)]
async fn test_background_loop_survives_store_failures() {
    let job = due_job("/a", "acc-1", 3_600, NOW - 1);
    let store = Arc::new(FlakyStore::new(vec![job.clone()], 3));
    let backend = Arc::new(ScriptedBackend::new());
    let scheduler = Arc::new(SyncScheduler::new(
        SchedulerConfig::default(),
        store.clone(),
        backend.clone(),
        Arc::new(FakeAccounts::with(&["acc-1"])),
        Arc::new(CollectingRecorder::default()),
        EventBus::new(16),
        Arc::new(ManualClock::new(NOW)),
    ));

    let shutdown = CancellationToken::new();
    let handle = Arc::clone(&scheduler).spawn(shutdown.clone());

    // Recovery and the first two ticks hit the failing store.
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(backend.calls(), 0);
    assert!(store.loads() >= 3);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(backend.calls(), 1);
    let saved = store.inner.load_all().await.unwrap();
    assert_eq!(saved[0].id, job.id);
    assert_eq!(saved[0].status, SyncStatus::Completed);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(scheduler.running_job(), None);
}
