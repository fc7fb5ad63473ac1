//! # Sync Scheduling Module
//!
//! Keeps local folders mirrored into bucket prefixes on a timer.
//!
//! ## Components
//!
//! - **Sync Job State Machine** (`job`): job definition, run-state transitions and scheduling rules
//! - **Repository** (`repository`): ordered job collection persisted as JSON
//! - **Scheduler** (`scheduler`): single-flight background loop, crash recovery and manual runs
//! - **Manager** (`manager`): owner-facing create / edit / delete with activity records

pub mod error;
pub mod job;
pub mod manager;
pub mod repository;
pub mod scheduler;

pub use error::{Result, SyncError};
pub use job::{
    default_job_name, format_interval, JobChange, JobEdit, NewSyncJob, SyncJob, SyncJobId,
    SyncStatus,
};
pub use manager::SyncJobManager;
pub use repository::{InMemoryJobStore, JobStore, JsonFileJobStore};
pub use scheduler::{SyncScheduler, TickOutcome, INCONSISTENT_STATE_MESSAGE};
