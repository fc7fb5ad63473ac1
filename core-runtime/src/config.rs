//! # Core Configuration Module
//!
//! Provides configuration management for the sync and transfer cores.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all injected bridges and tunables. It enforces fail-fast
//! validation so a missing capability is reported at startup rather than on
//! the first scheduler tick.
//!
//! ## Required Dependencies
//!
//! - `StorageBackend` - Object-store operations
//! - `AccountDirectory` - Snapshot of configured accounts
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `ActivityRecorder` - Audit trail (desktop default: tracing-backed recorder;
//!   otherwise a no-op recorder)
//! - `Clock` - Time source (default: system clock)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .job_store_path("/path/to/sync_jobs.json")
//!     .activity_db_path("/path/to/activity.db")
//!     .storage_backend(Arc::new(MyBackend))
//!     .account_directory(Arc::new(MyAccounts))
//!     .tick_interval(Duration::from_secs(10))
//!     .build()
//!     .expect("Failed to build config");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{AccountDirectory, ActivityRecorder, Clock, StorageBackend, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default polling period of the background scheduler.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

/// Default delay before a failed recurring job becomes due again.
pub const DEFAULT_ERROR_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Message recorded on jobs found `running` at startup.
pub const DEFAULT_INTERRUPTED_MESSAGE: &str = "Job interrupted (app closed?)";

const MAX_TICK_INTERVAL: Duration = Duration::from_secs(3600);
const MAX_PARALLEL_TRANSFERS: usize = 64;

/// Tunables for the background sync scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How often the scheduler polls for due jobs
    pub tick_interval: Duration,
    /// Delay applied to `next_run` after a failed or interrupted run
    pub error_retry_delay: Duration,
    /// Error message stored on jobs recovered at startup
    pub interrupted_message: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            error_retry_delay: DEFAULT_ERROR_RETRY_DELAY,
            interrupted_message: DEFAULT_INTERRUPTED_MESSAGE.to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn error_retry_delay_millis(&self) -> i64 {
        i64::try_from(self.error_retry_delay.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(Error::Config(
                "Scheduler tick interval must be greater than 0".to_string(),
            ));
        }

        if self.tick_interval > MAX_TICK_INTERVAL {
            return Err(Error::Config(
                "Scheduler tick interval exceeds maximum of 1 hour".to_string(),
            ));
        }

        if self.error_retry_delay.is_zero() {
            return Err(Error::Config(
                "Error retry delay must be greater than 0".to_string(),
            ));
        }

        if self.interrupted_message.trim().is_empty() {
            return Err(Error::Config(
                "Interrupted job message cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Tunables for the transfer orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Upper bound on transfers executing at the same time
    pub max_parallel_transfers: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_parallel_transfers: 4,
        }
    }
}

impl TransferConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_transfers == 0 {
            return Err(Error::Config(
                "Parallel transfer limit must be at least 1".to_string(),
            ));
        }

        if self.max_parallel_transfers > MAX_PARALLEL_TRANSFERS {
            return Err(Error::Config(format!(
                "Parallel transfer limit exceeds maximum of {}",
                MAX_PARALLEL_TRANSFERS
            )));
        }

        Ok(())
    }
}

/// Core configuration.
///
/// Holds all dependencies and settings required to start the scheduler and
/// the transfer orchestrator. Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// JSON file holding the persisted sync job list
    pub job_store_path: PathBuf,

    /// SQLite database for the activity log; `None` keeps the default recorder
    pub activity_db_path: Option<PathBuf>,

    /// Object-store backend (required)
    pub storage_backend: Arc<dyn StorageBackend>,

    /// Account snapshot provider (required)
    pub account_directory: Arc<dyn AccountDirectory>,

    /// Audit sink
    pub activity_recorder: Arc<dyn ActivityRecorder>,

    /// Time source
    pub clock: Arc<dyn Clock>,

    pub scheduler: SchedulerConfig,

    pub transfer: TransferConfig,

    /// Capacity of the broadcast event bus
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("job_store_path", &self.job_store_path)
            .field("activity_db_path", &self.activity_db_path)
            .field("storage_backend", &"StorageBackend { ... }")
            .field("account_directory", &"AccountDirectory { ... }")
            .field("activity_recorder", &"ActivityRecorder { ... }")
            .field("clock", &"Clock { ... }")
            .field("scheduler", &self.scheduler)
            .field("transfer", &self.transfer)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Job store path is not empty
    /// - Activity database path, when set, is not empty
    /// - Scheduler and transfer tunables are within bounds
    /// - Event buffer can hold at least one event
    pub fn validate(&self) -> Result<()> {
        if self.job_store_path.as_os_str().is_empty() {
            return Err(Error::Config("Job store path cannot be empty".to_string()));
        }

        if let Some(path) = &self.activity_db_path {
            if path.as_os_str().is_empty() {
                return Err(Error::Config(
                    "Activity database path cannot be empty".to_string(),
                ));
            }
        }

        self.scheduler.validate()?;
        self.transfer.validate()?;

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn storage_backend_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "StorageBackend".to_string(),
        message: "StorageBackend implementation is required for sync and transfers. \
                 Inject the host's object-store adapter with .storage_backend()."
            .to_string(),
    }
}

fn account_directory_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "AccountDirectory".to_string(),
        message: "AccountDirectory implementation is required to resolve job accounts. \
                 Inject the host's account list with .account_directory()."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_activity_recorder() -> Arc<dyn ActivityRecorder> {
    Arc::new(bridge_desktop::TracingActivityRecorder::default())
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_activity_recorder() -> Arc<dyn ActivityRecorder> {
    Arc::new(bridge_traits::NoopActivityRecorder)
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    job_store_path: Option<PathBuf>,
    activity_db_path: Option<PathBuf>,
    storage_backend: Option<Arc<dyn StorageBackend>>,
    account_directory: Option<Arc<dyn AccountDirectory>>,
    activity_recorder: Option<Arc<dyn ActivityRecorder>>,
    clock: Option<Arc<dyn Clock>>,
    scheduler: SchedulerConfig,
    transfer: TransferConfig,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the JSON file used to persist sync jobs.
    pub fn job_store_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.job_store_path = Some(path.into());
        self
    }

    /// Sets the SQLite database used for the activity log.
    ///
    /// When set, the service opens a SQLite-backed activity log at this path
    /// unless an explicit recorder is injected.
    pub fn activity_db_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.activity_db_path = Some(path.into());
        self
    }

    pub fn storage_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.storage_backend = Some(backend);
        self
    }

    pub fn account_directory(mut self, directory: Arc<dyn AccountDirectory>) -> Self {
        self.account_directory = Some(directory);
        self
    }

    pub fn activity_recorder(mut self, recorder: Arc<dyn ActivityRecorder>) -> Self {
        self.activity_recorder = Some(recorder);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the scheduler polling period.
    ///
    /// Default: 10 seconds
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.scheduler.tick_interval = interval;
        self
    }

    /// Sets the retry delay applied after a failed run.
    ///
    /// Default: 5 minutes
    pub fn error_retry_delay(mut self, delay: Duration) -> Self {
        self.scheduler.error_retry_delay = delay;
        self
    }

    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Sets the maximum number of concurrently executing transfers.
    ///
    /// Default: 4
    pub fn max_parallel_transfers(mut self, limit: usize) -> Self {
        self.transfer.max_parallel_transfers = limit;
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Returns an error if:
    /// - The job store path is missing
    /// - A required bridge (StorageBackend, AccountDirectory) is missing
    /// - Any tunable is out of range
    pub fn build(self) -> Result<CoreConfig> {
        let job_store_path = self.job_store_path.ok_or_else(|| {
            Error::Config(
                "Job store path is required. Use .job_store_path() to set it.".to_string(),
            )
        })?;

        let storage_backend = self
            .storage_backend
            .ok_or_else(storage_backend_missing_error)?;

        let account_directory = self
            .account_directory
            .ok_or_else(account_directory_missing_error)?;

        let activity_recorder = self
            .activity_recorder
            .unwrap_or_else(provide_default_activity_recorder);

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

        let config = CoreConfig {
            job_store_path,
            activity_db_path: self.activity_db_path,
            storage_backend,
            account_directory,
            activity_recorder,
            clock,
            scheduler: self.scheduler,
            transfer: self.transfer,
            event_buffer_size: self.event_buffer_size.unwrap_or(100),
        };

        config.validate()?;

        Ok(config)
    }
}
