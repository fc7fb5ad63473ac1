//! # Transfer Orchestrator
//!
//! Executes ad-hoc copy and move requests across storage accounts.
//!
//! ## Workflow
//!
//! 1. **Plan**: resolve accounts, reject configuration problems (unknown or
//!    read-only destinations, cross-bucket moves, moving a folder into
//!    itself), classify the route per destination and resolve every
//!    destination key against a listing of the destination prefix
//! 2. **Submit**: one task per (object, destination) pair, bounded by a
//!    semaphore; each task owns its progress channel
//! 3. **Execute**: rename / server-side copy / stream, depending on the route
//! 4. **Settle**: publish the final state, emit an event, record activity
//!
//! Configuration problems fail the whole request before anything runs.
//! Backend problems fail only the transfer they belong to; siblings keep going.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let request = TransferRequest::copy("acc-1", "media")
//!     .with_object(SelectedObject::file("reports/q3.pdf", 52_000))
//!     .with_destination(Destination::new("acc-2", "archive", "2024/"))
//!     .with_destination(Destination::new("acc-3", "offsite", ""));
//!
//! for handle in orchestrator.submit(request).await? {
//!     let mut progress = handle.subscribe();
//!     tokio::spawn(async move {
//!         while progress.changed().await.is_ok() {
//!             let job = progress.borrow().clone();
//!             println!("{} {}%", job.file_name, job.progress);
//!         }
//!     });
//! }
//! ```

use crate::{
    job::{ObjectRef, TransferJob, TransferKind, TransferRequest, TransferStatus},
    naming::{is_taken, join_key, normalize_prefix, object_name, resolve_free_key},
    progress::{ProgressTracker, TransferHandle},
    routing::TransferRoute,
    Result, TransferError,
};
use bridge_traits::{
    Account, AccountDirectory, ActionKind, ActivityEntry, ActivityRecorder, ActivitySource,
    ObjectProgress, ProgressFn, RemoteObject, StorageBackend,
};
use core_runtime::config::TransferConfig;
use core_runtime::events::{CoreEvent, EventBus, TransferEvent};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

/// A planned transfer together with the accounts it runs against.
struct PlannedTransfer {
    job: TransferJob,
    source: Account,
    dest: Account,
}

/// A validated destination.
struct Target {
    account: Account,
    bucket: String,
    prefix: String,
    route: TransferRoute,
}

/// Storage location of a destination prefix. Accounts on the same provider
/// endpoint see the same buckets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListingScope {
    provider: &'static str,
    endpoint: Option<String>,
    bucket: String,
    prefix: String,
}

impl ListingScope {
    fn of(target: &Target) -> Self {
        Self {
            provider: target.account.provider.as_str(),
            endpoint: target.account.endpoint.clone(),
            bucket: target.bucket.clone(),
            prefix: target.prefix.clone(),
        }
    }
}

pub struct TransferOrchestrator {
    backend: Arc<dyn StorageBackend>,
    accounts: Arc<dyn AccountDirectory>,
    recorder: Arc<dyn ActivityRecorder>,
    event_bus: EventBus,
    permits: Arc<Semaphore>,
}

impl TransferOrchestrator {
    pub fn new(
        config: TransferConfig,
        backend: Arc<dyn StorageBackend>,
        accounts: Arc<dyn AccountDirectory>,
        recorder: Arc<dyn ActivityRecorder>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            backend,
            accounts,
            recorder,
            event_bus,
            permits: Arc::new(Semaphore::new(config.max_parallel_transfers)),
        }
    }

    /// Resolve a request into transfer jobs without running anything.
    ///
    /// Jobs whose destination could not be listed or named are returned
    /// already failed.
    ///
    /// # Errors
    ///
    /// Fails the whole request on empty selections, unknown accounts,
    /// read-only destinations and invalid moves.
    pub async fn plan(&self, request: &TransferRequest) -> Result<Vec<TransferJob>> {
        Ok(self
            .plan_transfers(request)
            .await?
            .into_iter()
            .map(|planned| planned.job)
            .collect())
    }

    /// Plan a request and start every resulting transfer.
    #[instrument(skip(self, request), fields(kind = %request.kind, objects = request.objects.len(), destinations = request.destinations.len()))]
    pub async fn submit(self: &Arc<Self>, request: TransferRequest) -> Result<Vec<TransferHandle>> {
        let planned = self.plan_transfers(&request).await?;
        info!(transfers = planned.len(), "Transfer request accepted");

        let mut handles = Vec::with_capacity(planned.len());
        for transfer in planned {
            let job = transfer.job.clone();
            self.emit(TransferEvent::Queued {
                transfer_id: job.id.to_string(),
                file_name: job.file_name.clone(),
                destination: job.destination.to_string(),
            });

            let (tracker, receiver) = ProgressTracker::new(job.clone(), self.event_bus.clone());
            let orchestrator = Arc::clone(self);
            let task = tokio::spawn(async move { orchestrator.execute(transfer, Arc::new(tracker)).await });
            handles.push(TransferHandle::new(job.id, receiver, task));
        }

        Ok(handles)
    }

    /// Submit a request and wait for every transfer to settle.
    pub async fn run(self: &Arc<Self>, request: TransferRequest) -> Result<Vec<TransferJob>> {
        let handles = self.submit(request).await?;
        Ok(futures::future::join_all(handles.into_iter().map(TransferHandle::wait)).await)
    }

    // ------------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------------

    async fn plan_transfers(&self, request: &TransferRequest) -> Result<Vec<PlannedTransfer>> {
        if request.objects.is_empty() {
            return Err(TransferError::EmptySelection);
        }
        if request.destinations.is_empty() {
            return Err(TransferError::NoDestinations);
        }

        let accounts = self.accounts.accounts().await?;
        let lookup = |account_id: &str| {
            accounts
                .iter()
                .find(|account| account.id == account_id)
                .cloned()
                .ok_or_else(|| TransferError::AccountNotFound {
                    account_id: account_id.to_string(),
                })
        };

        let source = lookup(&request.source_account_id)?;

        let mut targets = Vec::with_capacity(request.destinations.len());
        for destination in &request.destinations {
            let account = lookup(&destination.account_id)?;
            if account.is_read_only() {
                return Err(TransferError::ReadOnlyDestination {
                    account_id: account.id,
                });
            }

            let route = TransferRoute::classify(
                &source,
                &request.source_bucket,
                &account,
                &destination.bucket,
            );
            if request.kind == TransferKind::Move && route != TransferRoute::SameBucket {
                return Err(TransferError::CrossBucketMove);
            }

            targets.push(Target {
                account,
                bucket: destination.bucket.clone(),
                prefix: normalize_prefix(&destination.prefix),
                route,
            });
        }

        if request.kind == TransferKind::Move {
            validate_moves(request, &targets)?;
        }

        // Destinations that resolve to the same location share one listing, so
        // a name reserved for one of them is taken for the others.
        let mut listings: HashMap<ListingScope, std::result::Result<HashSet<String>, String>> =
            HashMap::new();

        let mut planned = Vec::with_capacity(request.objects.len() * targets.len());
        for target in targets {
            let listing = match listings.entry(ListingScope::of(&target)) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(self.list_destination(&target).await),
            };

            for object in &request.objects {
                let is_folder = object.is_folder();
                let name = object_name(&object.key);

                let resolved = match &*listing {
                    Err(message) => Err(message.clone()),
                    Ok(existing) => match request.kind {
                        TransferKind::Copy => {
                            resolve_free_key(existing, &target.prefix, name, is_folder)
                                .map_err(|e| e.to_string())
                        }
                        TransferKind::Move => {
                            let key = join_key(&target.prefix, name, is_folder);
                            if is_taken(existing, &key, is_folder) {
                                Err(TransferError::DestinationExists { key }.to_string())
                            } else {
                                Ok(key)
                            }
                        }
                    },
                };

                let dest_key = match &resolved {
                    Ok(key) => key.clone(),
                    Err(_) => join_key(&target.prefix, name, is_folder),
                };
                if let Ok(existing) = listing.as_mut() {
                    existing.insert(dest_key.clone());
                }

                let job = TransferJob::new(
                    request.kind,
                    ObjectRef::new(&source.id, &request.source_bucket, &object.key),
                    ObjectRef::new(&target.account.id, &target.bucket, &dest_key),
                    target.route,
                    object.size,
                );
                let job = match resolved {
                    Ok(_) => job,
                    Err(message) => job.fail(message)?,
                };

                debug!(
                    transfer_id = %job.id,
                    source = %job.source,
                    destination = %job.destination,
                    route = %job.route,
                    "Transfer planned"
                );
                planned.push(PlannedTransfer {
                    job,
                    source: source.clone(),
                    dest: target.account.clone(),
                });
            }
        }

        Ok(planned)
    }

    async fn list_destination(&self, target: &Target) -> std::result::Result<HashSet<String>, String> {
        self.backend
            .list_objects(&target.account, &target.bucket, &target.prefix)
            .await
            .map(|objects| objects.into_iter().map(|object| object.key).collect())
            .map_err(|e| format!("Failed to list destination: {}", e))
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    async fn execute(self: Arc<Self>, planned: PlannedTransfer, tracker: Arc<ProgressTracker>) -> TransferJob {
        let PlannedTransfer { job, source, dest } = planned;

        let finished = if job.status == TransferStatus::Failed {
            job
        } else {
            match self.perform(job, &source, &dest, &tracker).await {
                Ok(done) => done,
                Err(e) => mark_failed(tracker.snapshot(), failure_message(&e)),
            }
        };
        tracker.publish(finished.clone());

        match finished.status {
            TransferStatus::Done => {
                info!(
                    transfer_id = %finished.id,
                    destination = %finished.destination,
                    bytes = finished.bytes_transferred,
                    "Transfer completed"
                );
                self.emit(TransferEvent::Completed {
                    transfer_id: finished.id.to_string(),
                    destination: finished.destination.key.clone(),
                    bytes_transferred: finished.bytes_transferred,
                });
            }
            _ => {
                let message = finished.error.clone().unwrap_or_default();
                warn!(transfer_id = %finished.id, error = %message, "Transfer failed");
                self.emit(TransferEvent::Failed {
                    transfer_id: finished.id.to_string(),
                    message,
                });
            }
        }

        self.record(&source, &finished).await;
        finished
    }

    async fn perform(
        &self,
        job: TransferJob,
        source: &Account,
        dest: &Account,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<TransferJob> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TransferError::QueueClosed)?;

        let running = job.start()?;
        tracker.publish(running.clone());

        let bytes = match (running.route, running.kind) {
            (TransferRoute::SameBucket, TransferKind::Move) => self.rename_in_place(&running, source).await?,
            (TransferRoute::Streaming, _) => self.stream(&running, source, dest, tracker).await?,
            _ => self.copy_server_side(&running, source).await?,
        };

        tracker.snapshot().complete(bytes)
    }

    /// Rename a file, or every object under a folder with the marker last.
    async fn rename_in_place(&self, job: &TransferJob, account: &Account) -> Result<u64> {
        let bucket = &job.source.bucket;

        if !job.is_folder {
            self.backend
                .rename_object(account, bucket, &job.source.key, &job.destination.key)
                .await?;
            return Ok(job.total_bytes);
        }

        let members = self.folder_members(account, bucket, &job.source.key).await?;
        let mut bytes = 0;
        for object in members {
            if let Some(new_key) = rekey(&object.key, &job.source.key, &job.destination.key) {
                self.backend
                    .rename_object(account, bucket, &object.key, &new_key)
                    .await?;
                bytes += object.size;
            }
        }
        Ok(bytes)
    }

    /// Copy through the backend without moving bytes through the host.
    async fn copy_server_side(&self, job: &TransferJob, source: &Account) -> Result<u64> {
        let (src, dst) = (&job.source, &job.destination);

        if !job.is_folder {
            self.backend
                .copy_object_server_side(source, &src.bucket, &src.key, &dst.bucket, &dst.key)
                .await?;
            return Ok(job.total_bytes);
        }

        let members = self.folder_members(source, &src.bucket, &src.key).await?;
        let mut bytes = 0;
        for object in members {
            if let Some(dst_key) = rekey(&object.key, &src.key, &dst.key) {
                self.backend
                    .copy_object_server_side(source, &src.bucket, &object.key, &dst.bucket, &dst_key)
                    .await?;
                bytes += object.size;
            }
        }
        Ok(bytes)
    }

    /// Stream object by object, preserving relative paths under the destination.
    async fn stream(
        &self,
        job: &TransferJob,
        source: &Account,
        dest: &Account,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<u64> {
        let (src, dst) = (&job.source, &job.destination);

        let members = if job.is_folder {
            self.folder_members(source, &src.bucket, &src.key).await?
        } else {
            vec![RemoteObject::new(src.key.clone(), job.total_bytes)]
        };
        let total: u64 = members.iter().map(|object| object.size).sum();

        let mut done = 0u64;
        for object in members {
            let Some(dst_key) = rekey(&object.key, &src.key, &dst.key) else {
                continue;
            };

            let progress: ProgressFn = {
                let tracker = Arc::clone(tracker);
                let base = done;
                Arc::new(move |update: ObjectProgress| {
                    let total = if total > 0 { total } else { base + update.total_bytes };
                    tracker.report(base + update.bytes_transferred, total);
                })
            };

            let written = self
                .backend
                .stream_transfer_object(
                    source,
                    &src.bucket,
                    &object.key,
                    dest,
                    &dst.bucket,
                    &dst_key,
                    Some(progress),
                )
                .await?;
            done += written;

            if job.is_folder {
                tracker.report(done, total);
            }
        }

        Ok(done)
    }

    /// Every object under a folder prefix, marker last.
    async fn folder_members(&self, account: &Account, bucket: &str, prefix: &str) -> Result<Vec<RemoteObject>> {
        let mut members: Vec<_> = self
            .backend
            .list_objects(account, bucket, prefix)
            .await?
            .into_iter()
            .filter(|object| object.key.starts_with(prefix))
            .collect();
        members.sort_by_key(|object| object.key == prefix);
        Ok(members)
    }

    async fn record(&self, source: &Account, job: &TransferJob) {
        let action = match job.kind {
            TransferKind::Copy => ActionKind::Copy,
            TransferKind::Move => ActionKind::Move,
        };

        let entry = match (&job.status, &job.error) {
            (TransferStatus::Done, _) => {
                ActivityEntry::success(&job.source.bucket, action, ActivitySource::User)
                    .with_bytes(job.bytes_transferred)
            }
            (_, error) => ActivityEntry::failure(
                &job.source.bucket,
                action,
                ActivitySource::User,
                error.clone().unwrap_or_default(),
            ),
        }
        .with_paths(Some(job.source.key.clone()), Some(job.destination.to_string()));

        self.recorder.record(source, entry).await;
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.event_bus.emit(CoreEvent::Transfer(event));
    }
}

fn validate_moves(request: &TransferRequest, targets: &[Target]) -> Result<()> {
    for target in targets {
        for object in &request.objects {
            let dest_key = join_key(&target.prefix, object_name(&object.key), object.is_folder());
            if dest_key == object.key {
                return Err(TransferError::InvalidMove(format!(
                    "{} is already at the destination",
                    object.key
                )));
            }
            if object.is_folder() && dest_key.starts_with(&object.key) {
                return Err(TransferError::InvalidMove(format!(
                    "cannot move {} into itself",
                    object.key
                )));
            }
        }
    }
    Ok(())
}

/// Map `key` from under `from` to under `to`.
fn rekey(key: &str, from: &str, to: &str) -> Option<String> {
    key.strip_prefix(from).map(|rest| format!("{}{}", to, rest))
}

fn mark_failed(job: TransferJob, message: String) -> TransferJob {
    let fallback = job.clone();
    job.fail(message).unwrap_or(fallback)
}

fn failure_message(err: &TransferError) -> String {
    match err {
        TransferError::Backend(inner) => inner.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{NoopActivityRecorder, ProviderKind, ReconcileRequest, SyncStats};
    use mockall::mock;

    mock! {
        Backend {}

        #[async_trait]
        impl StorageBackend for Backend {
            async fn reconcile(&self, account: &Account, request: &ReconcileRequest) -> BridgeResult<SyncStats>;
            async fn copy_object_server_side(
                &self,
                account: &Account,
                src_bucket: &str,
                src_key: &str,
                dst_bucket: &str,
                dst_key: &str,
            ) -> BridgeResult<()>;
            async fn rename_object(&self, account: &Account, bucket: &str, old_key: &str, new_key: &str)
                -> BridgeResult<()>;
            #[allow(clippy::too_many_arguments)]
            async fn stream_transfer_object(
                &self,
                source: &Account,
                src_bucket: &str,
                src_key: &str,
                dest: &Account,
                dst_bucket: &str,
                dst_key: &str,
                progress: Option<ProgressFn>,
            ) -> BridgeResult<u64>;
            async fn list_objects(&self, account: &Account, bucket: &str, prefix: &str)
                -> BridgeResult<Vec<RemoteObject>>;
        }
    }

    mock! {
        Directory {}

        #[async_trait]
        impl AccountDirectory for Directory {
            async fn accounts(&self) -> bridge_traits::error::Result<Vec<Account>>;
        }
    }

    fn orchestrator(backend: MockBackend, accounts: Vec<Account>) -> TransferOrchestrator {
        let mut directory = MockDirectory::new();
        directory
            .expect_accounts()
            .returning(move || Ok(accounts.clone()));

        TransferOrchestrator::new(
            TransferConfig::default(),
            Arc::new(backend),
            Arc::new(directory),
            Arc::new(NoopActivityRecorder),
            EventBus::new(8),
        )
    }

    #[tokio::test]
    async fn test_rejected_plan_never_touches_backend() {
        let mut backend = MockBackend::new();
        backend.expect_list_objects().never();

        let source = Account::new("src", "Source", ProviderKind::Aws);
        let vault = Account::new("vault", "Vault", ProviderKind::Wasabi).read_only();
        let orchestrator = orchestrator(backend, vec![source, vault]);

        let request = TransferRequest::copy("src", "media")
            .with_object(crate::SelectedObject::file("a.txt", 3))
            .with_destination(crate::Destination::new("vault", "cold", ""));

        assert!(matches!(
            orchestrator.plan(&request).await,
            Err(TransferError::ReadOnlyDestination { .. })
        ));
    }

    #[tokio::test]
    async fn test_listing_failure_fails_only_that_destination() {
        let mut backend = MockBackend::new();
        backend
            .expect_list_objects()
            .withf(|_, bucket, _| bucket.to_string() == "broken")
            .returning(|_, _, _| Err(bridge_traits::BridgeError::OperationFailed("denied".into())));
        backend
            .expect_list_objects()
            .withf(|_, bucket, _| bucket.to_string() == "fine")
            .returning(|_, _, _| Ok(Vec::new()));

        let account = Account::new("a", "A", ProviderKind::Aws);
        let orchestrator = orchestrator(backend, vec![account]);

        let request = TransferRequest::copy("a", "media")
            .with_object(crate::SelectedObject::file("a.txt", 3))
            .with_destination(crate::Destination::new("a", "broken", ""))
            .with_destination(crate::Destination::new("a", "fine", ""));

        let jobs = orchestrator.plan(&request).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].status, TransferStatus::Failed);
        assert!(jobs[0].error.as_deref().unwrap_or_default().contains("denied"));
        assert_eq!(jobs[1].status, TransferStatus::Pending);
        assert_eq!(jobs[1].destination.key, "a.txt");
    }

    #[test]
    fn test_rekey() {
        assert_eq!(
            rekey("photos/2024/a.jpg", "photos/", "backup/photos/").as_deref(),
            Some("backup/photos/2024/a.jpg")
        );
        assert_eq!(rekey("photos/", "photos/", "x/").as_deref(), Some("x/"));
        assert_eq!(rekey("other/a.jpg", "photos/", "x/"), None);
        assert_eq!(rekey("a.jpg", "a.jpg", "b.jpg").as_deref(), Some("b.jpg"));
    }

    #[test]
    fn test_validate_moves() {
        let target = |prefix: &str| Target {
            account: Account::new("a", "a", bridge_traits::ProviderKind::Aws),
            bucket: "media".to_string(),
            prefix: normalize_prefix(prefix),
            route: TransferRoute::SameBucket,
        };

        let request = TransferRequest::move_within("a", "media")
            .with_object(crate::SelectedObject::folder("photos"));

        assert!(validate_moves(&request, &[target("archive")]).is_ok());
        assert!(matches!(
            validate_moves(&request, &[target("photos/2024")]),
            Err(TransferError::InvalidMove(_))
        ));

        let file = TransferRequest::move_within("a", "media")
            .with_object(crate::SelectedObject::file("docs/a.txt", 1));
        assert!(matches!(
            validate_moves(&file, &[target("docs")]),
            Err(TransferError::InvalidMove(_))
        ));
    }
}
