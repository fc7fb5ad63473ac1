//! Core service façade and bootstrap helpers.
//!
//! This crate wires a [`CoreConfig`] into the running pieces of the core: the
//! JSON job store, the activity log, the sync job manager, the background
//! scheduler and the transfer orchestrator. Desktop hosts enable the
//! `desktop-shims` feature (which depends on `bridge-desktop`) to get the
//! SQLite activity log when `activity_db_path` is configured.

pub mod error;

pub use error::{CoreError, Result};

pub use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
pub use core_runtime::{CoreConfig, CoreConfigBuilder};

use std::sync::Arc;

use bridge_traits::ActivityRecorder;
use core_runtime::{EventBus, EventStream};
use core_sync::{JobStore, JsonFileJobStore, SyncJobId, SyncJobManager, SyncScheduler};
use core_transfer::{TransferHandle, TransferJob, TransferOrchestrator, TransferRequest};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[cfg(feature = "desktop-shims")]
use bridge_desktop::SqliteActivityLog;

struct Background {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// Primary façade exposed to host applications.
pub struct CoreService {
    config: CoreConfig,
    event_bus: EventBus,
    manager: Arc<SyncJobManager>,
    scheduler: Arc<SyncScheduler>,
    orchestrator: Arc<TransferOrchestrator>,
    #[cfg(feature = "desktop-shims")]
    activity_log: Option<Arc<SqliteActivityLog>>,
    background: Mutex<Option<Background>>,
}

impl CoreService {
    /// Build every component from `config`. Nothing runs until [`start`](Self::start).
    pub async fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let event_bus = EventBus::new(config.event_buffer_size);
        let store: Arc<dyn JobStore> = Arc::new(JsonFileJobStore::new(config.job_store_path.clone()));

        #[cfg(feature = "desktop-shims")]
        let activity_log = match &config.activity_db_path {
            Some(path) => Some(Arc::new(
                SqliteActivityLog::open(path.clone(), config.clock.clone()).await?,
            )),
            None => None,
        };

        #[cfg(feature = "desktop-shims")]
        let recorder: Arc<dyn ActivityRecorder> = match &activity_log {
            Some(log) => log.clone() as Arc<dyn ActivityRecorder>,
            None => config.activity_recorder.clone(),
        };

        #[cfg(not(feature = "desktop-shims"))]
        let recorder: Arc<dyn ActivityRecorder> = {
            if config.activity_db_path.is_some() {
                warn!("Activity database requires the desktop-shims feature; using configured recorder");
            }
            config.activity_recorder.clone()
        };

        let manager = Arc::new(SyncJobManager::new(
            store.clone(),
            config.account_directory.clone(),
            recorder.clone(),
            event_bus.clone(),
            config.clock.clone(),
        ));

        let scheduler = Arc::new(SyncScheduler::new(
            config.scheduler.clone(),
            store,
            config.storage_backend.clone(),
            config.account_directory.clone(),
            recorder.clone(),
            event_bus.clone(),
            config.clock.clone(),
        ));

        let orchestrator = Arc::new(TransferOrchestrator::new(
            config.transfer.clone(),
            config.storage_backend.clone(),
            config.account_directory.clone(),
            recorder,
            event_bus.clone(),
        ));

        Ok(Self {
            config,
            event_bus,
            manager,
            scheduler,
            orchestrator,
            #[cfg(feature = "desktop-shims")]
            activity_log,
            background: Mutex::new(None),
        })
    }

    /// Start the background scheduler. Calling it again while running is a no-op.
    pub async fn start(&self) {
        let mut background = self.background.lock().await;
        if background.is_some() {
            return;
        }

        let shutdown = CancellationToken::new();
        let task = self.scheduler.clone().spawn(shutdown.clone());
        info!(
            tick_interval = ?self.config.scheduler.tick_interval,
            "Core service started"
        );
        *background = Some(Background { shutdown, task });
    }

    /// Stop the scheduler loop and wait for it to exit. A run already in
    /// flight keeps going and settles on its own.
    pub async fn shutdown(&self) {
        let Some(background) = self.background.lock().await.take() else {
            return;
        };

        background.shutdown.cancel();
        if let Err(e) = background.task.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
        info!("Core service stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.background.lock().await.is_some()
    }

    /// Trigger a sync job outside its schedule.
    pub async fn run_sync_now(&self, job_id: &SyncJobId) -> Result<JoinHandle<()>> {
        Ok(self.scheduler.run_now(job_id).await?)
    }

    /// Plan and launch a transfer request.
    pub async fn submit_transfer(&self, request: TransferRequest) -> Result<Vec<TransferHandle>> {
        Ok(self.orchestrator.submit(request).await?)
    }

    /// Plan a transfer request and wait for every job to settle.
    pub async fn run_transfer(&self, request: TransferRequest) -> Result<Vec<TransferJob>> {
        Ok(self.orchestrator.run(request).await?)
    }

    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn manager(&self) -> Arc<SyncJobManager> {
        Arc::clone(&self.manager)
    }

    pub fn scheduler(&self) -> Arc<SyncScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn orchestrator(&self) -> Arc<TransferOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    /// SQLite activity log, when `activity_db_path` was configured.
    #[cfg(feature = "desktop-shims")]
    pub fn activity_log(&self) -> Option<Arc<SqliteActivityLog>> {
        self.activity_log.clone()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }
}
