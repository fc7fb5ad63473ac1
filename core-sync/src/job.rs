//! # Sync Job State Machine
//!
//! Persisted definition and lifecycle of a folder-to-bucket sync job.
//!
//! ## Overview
//!
//! A [`SyncJob`] pairs a local folder with a bucket prefix on one account and
//! optionally repeats on a fixed interval. The definition fields (name,
//! interval, mirror flag) are edited by the owner; the run-state fields
//! (status, timestamps, last stats) are owned by the scheduler. All
//! timestamps are Unix epoch milliseconds supplied by the caller's clock so
//! that the state machine itself stays deterministic.
//!
//! ## State Machine
//!
//! ```text
//! Idle ──────┐
//! Completed ─┼──→ Running ──┬──→ Completed
//! Error ─────┘              └──→ Error
//! ```
//!
//! `next_run` is only ever set on recurring jobs (`interval_seconds > 0`):
//! - creation / interval edit: `now + interval`
//! - success: `now + interval`
//! - failure or interrupted run: `now + error_retry_delay`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{NewSyncJob, SyncJob};
//! use bridge_traits::SyncDirection;
//!
//! let job = SyncJob::create(
//!     NewSyncJob::new("acc-1", "photos", "/home/me/Pictures", SyncDirection::Upload)
//!         .with_interval(3600),
//!     now,
//! )?;
//!
//! let job = job.start()?;
//! let job = job.complete(stats, clock.unix_timestamp_millis())?;
//! ```

use crate::{Result, SyncError};
use bridge_traits::{SyncDirection, SyncStats};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncJobId(Uuid);

impl SyncJobId {
    /// Create a new random sync job ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a sync job ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidJobId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SyncJobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Status Types
// ============================================================================

/// The run-state of a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Never run
    #[default]
    Idle,
    /// A run is in flight
    Running,
    /// Last run succeeded
    Completed,
    /// Last run failed or was interrupted
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Error => "error",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(SyncStatus::Idle),
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "error" => Ok(SyncStatus::Error),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Creation & Edit Requests
// ============================================================================

/// Parameters for a new sync job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSyncJob {
    /// Display name; blank means "derive from the local folder"
    pub name: Option<String>,
    pub account_id: String,
    pub bucket: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub direction: SyncDirection,
    pub mirror_sync: bool,
    /// 0 means manual-only
    pub interval_seconds: u64,
}

impl NewSyncJob {
    pub fn new(
        account_id: impl Into<String>,
        bucket: impl Into<String>,
        local_path: impl Into<PathBuf>,
        direction: SyncDirection,
    ) -> Self {
        Self {
            name: None,
            account_id: account_id.into(),
            bucket: bucket.into(),
            local_path: local_path.into(),
            remote_path: String::new(),
            direction,
            mirror_sync: false,
            interval_seconds: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_remote_path(mut self, remote_path: impl Into<String>) -> Self {
        self.remote_path = remote_path.into();
        self
    }

    pub fn with_interval(mut self, interval_seconds: u64) -> Self {
        self.interval_seconds = interval_seconds;
        self
    }

    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror_sync = mirror;
        self
    }
}

/// Owner edit of a job definition. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobEdit {
    pub name: Option<String>,
    pub interval_seconds: Option<u64>,
    pub mirror_sync: Option<bool>,
}

/// A definition field that actually changed during [`SyncJob::apply_edit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobChange {
    Renamed { from: String, to: String },
    IntervalChanged { from: u64, to: u64 },
    MirrorToggled { enabled: bool },
}

// ============================================================================
// Sync Job Entity
// ============================================================================

/// A persisted sync job definition plus its last run-state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub id: SyncJobId,
    pub name: String,
    pub account_id: String,
    pub bucket: String,
    pub local_path: PathBuf,
    #[serde(default)]
    pub remote_path: String,
    pub direction: SyncDirection,
    #[serde(default)]
    pub mirror_sync: bool,
    #[serde(default)]
    pub interval_seconds: u64,
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stats: Option<SyncStats>,
}

impl SyncJob {
    /// Create a new idle job.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidJob`] when the account, bucket or local
    /// folder is missing.
    pub fn create(request: NewSyncJob, now: i64) -> Result<Self> {
        if request.account_id.trim().is_empty() {
            return Err(SyncError::InvalidJob("account is required".to_string()));
        }
        if request.bucket.trim().is_empty() {
            return Err(SyncError::InvalidJob("bucket is required".to_string()));
        }
        if request.local_path.as_os_str().is_empty() {
            return Err(SyncError::InvalidJob("local folder is required".to_string()));
        }

        let name = request
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| default_job_name(&request.local_path));

        let mut job = Self {
            id: SyncJobId::new(),
            name,
            account_id: request.account_id,
            bucket: request.bucket,
            local_path: request.local_path,
            remote_path: request.remote_path,
            direction: request.direction,
            mirror_sync: request.mirror_sync,
            interval_seconds: request.interval_seconds,
            status: SyncStatus::Idle,
            last_run: None,
            next_run: None,
            last_stats: None,
        };
        job.next_run = job.schedule_after(now);
        Ok(job)
    }

    /// Whether the job runs on a timer.
    pub fn is_recurring(&self) -> bool {
        self.interval_seconds > 0
    }

    /// Whether the timer says this job should run at `now`.
    ///
    /// Account availability is checked separately by the scheduler.
    pub fn is_due(&self, now: i64) -> bool {
        self.is_recurring()
            && self.status != SyncStatus::Running
            && self.next_run.is_some_and(|next| next <= now)
    }

    /// Start a run.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is already running
    pub fn start(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Running)?;
        self.status = SyncStatus::Running;
        Ok(self)
    }

    /// Record a successful run.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not running
    pub fn complete(mut self, stats: SyncStats, now: i64) -> Result<Self> {
        self.validate_transition(SyncStatus::Completed)?;
        self.status = SyncStatus::Completed;
        self.last_run = Some(now);
        self.last_stats = Some(stats);
        self.next_run = self.schedule_after(now);
        Ok(self)
    }

    /// Record a failed run.
    ///
    /// Counters are zeroed and the message becomes the only error. Recurring
    /// jobs retry after `retry_delay_ms` regardless of their interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not running
    pub fn fail(mut self, message: impl Into<String>, now: i64, retry_delay_ms: i64) -> Result<Self> {
        self.validate_transition(SyncStatus::Error)?;
        self.status = SyncStatus::Error;
        self.last_stats = Some(SyncStats::failed(message));
        self.next_run = self.retry_after(now, retry_delay_ms);
        Ok(self)
    }

    /// Apply an owner edit and report which fields changed.
    ///
    /// Changing the interval reschedules the job from `now`.
    pub fn apply_edit(&mut self, edit: JobEdit, now: i64) -> Vec<JobChange> {
        let mut changes = Vec::new();

        if let Some(name) = edit.name.filter(|name| !name.trim().is_empty()) {
            if name != self.name {
                changes.push(JobChange::Renamed {
                    from: std::mem::replace(&mut self.name, name.clone()),
                    to: name,
                });
            }
        }

        if let Some(interval) = edit.interval_seconds {
            if interval != self.interval_seconds {
                changes.push(JobChange::IntervalChanged {
                    from: self.interval_seconds,
                    to: interval,
                });
                self.interval_seconds = interval;
                self.next_run = self.schedule_after(now);
            }
        }

        if let Some(mirror) = edit.mirror_sync {
            if mirror != self.mirror_sync {
                self.mirror_sync = mirror;
                changes.push(JobChange::MirrorToggled { enabled: mirror });
            }
        }

        changes
    }

    fn interval_millis(&self) -> i64 {
        i64::try_from(self.interval_seconds)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000)
    }

    fn schedule_after(&self, now: i64) -> Option<i64> {
        self.is_recurring()
            .then(|| now.saturating_add(self.interval_millis()))
    }

    fn retry_after(&self, now: i64, retry_delay_ms: i64) -> Option<i64> {
        self.is_recurring().then(|| now.saturating_add(retry_delay_ms))
    }

    fn validate_transition(&self, to: SyncStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (SyncStatus::Running, SyncStatus::Running) => false,
            (_, SyncStatus::Running) => true,

            (SyncStatus::Running, SyncStatus::Completed) => true,
            (SyncStatus::Running, SyncStatus::Error) => true,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

/// Last segment of the local folder, or the whole path when it has none.
pub fn default_job_name(local_path: &Path) -> String {
    local_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| local_path.to_string_lossy().into_owned())
}

/// Human form of an interval used in activity records, e.g. `1d 2h 30m`.
pub fn format_interval(interval_seconds: u64) -> String {
    if interval_seconds == 0 {
        return "manual".to_string();
    }

    format!(
        "{}d {}h {}m",
        interval_seconds / 86_400,
        (interval_seconds % 86_400) / 3_600,
        (interval_seconds % 3_600) / 60
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn recurring_job(interval: u64) -> SyncJob {
        SyncJob::create(
            NewSyncJob::new("acc-1", "photos", "/home/me/Pictures", SyncDirection::Upload)
                .with_interval(interval),
            NOW,
        )
        .unwrap()
    }

    fn stats(transferred: u64) -> SyncStats {
        SyncStats {
            files_scanned: 10,
            files_transferred: transferred,
            bytes_transferred: transferred * 100,
            errors: Vec::new(),
        }
    }

    #[test]
    fn test_sync_job_id_from_string() {
        let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
        let id = SyncJobId::from_string(uuid_str).unwrap();
        assert_eq!(id.as_str(), uuid_str);
        assert!(SyncJobId::from_string("nope").is_err());
    }

    #[test]
    fn test_sync_status_from_str() {
        assert_eq!("IDLE".parse::<SyncStatus>().unwrap(), SyncStatus::Idle);
        assert_eq!("error".parse::<SyncStatus>().unwrap(), SyncStatus::Error);
        assert!("failed".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_create_defaults_name_to_folder() {
        let job = recurring_job(60);
        assert_eq!(job.name, "Pictures");
        assert_eq!(job.status, SyncStatus::Idle);
        assert_eq!(job.next_run, Some(NOW + 60_000));
        assert!(job.last_run.is_none());
    }

    #[test]
    fn test_create_keeps_explicit_name() {
        let job = SyncJob::create(
            NewSyncJob::new("acc-1", "photos", "/data", SyncDirection::Upload).with_name("Nightly"),
            NOW,
        )
        .unwrap();
        assert_eq!(job.name, "Nightly");
    }

    #[test]
    fn test_create_manual_job_has_no_next_run() {
        let job = recurring_job(0);
        assert!(!job.is_recurring());
        assert_eq!(job.next_run, None);
        assert!(!job.is_due(i64::MAX));
    }

    #[test]
    fn test_create_rejects_missing_bucket() {
        let result = SyncJob::create(
            NewSyncJob::new("acc-1", " ", "/data", SyncDirection::Upload),
            NOW,
        );
        assert!(matches!(result, Err(SyncError::InvalidJob(_))));
    }

    #[test]
    fn test_is_due() {
        let job = recurring_job(60);
        assert!(!job.is_due(NOW));
        assert!(job.is_due(NOW + 60_000));

        let running = job.start().unwrap();
        assert!(!running.is_due(NOW + 60_000));
    }

    #[test]
    fn test_complete_schedules_next_interval() {
        let job = recurring_job(60).start().unwrap();
        let done = job.complete(stats(3), NOW + 5_000).unwrap();

        assert_eq!(done.status, SyncStatus::Completed);
        assert_eq!(done.last_run, Some(NOW + 5_000));
        assert_eq!(done.next_run, Some(NOW + 65_000));
        assert_eq!(done.last_stats.unwrap().files_transferred, 3);
    }

    #[test]
    fn test_fail_uses_retry_delay_not_interval() {
        let job = recurring_job(86_400).start().unwrap();
        let failed = job.fail("access denied", NOW, 300_000).unwrap();

        assert_eq!(failed.status, SyncStatus::Error);
        assert_eq!(failed.next_run, Some(NOW + 300_000));
        assert_eq!(failed.last_run, None);
        assert_eq!(
            failed.last_stats,
            Some(SyncStats::failed("access denied"))
        );
    }

    #[test]
    fn test_fail_manual_job_never_schedules() {
        let failed = recurring_job(0)
            .start()
            .unwrap()
            .fail("boom", NOW, 300_000)
            .unwrap();
        assert_eq!(failed.next_run, None);
    }

    #[test]
    fn test_invalid_transitions() {
        let job = recurring_job(60);
        assert!(job.clone().complete(stats(0), NOW).is_err());
        assert!(job.clone().fail("x", NOW, 1).is_err());

        let running = job.start().unwrap();
        assert!(matches!(
            running.start(),
            Err(SyncError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_error_and_completed_can_restart() {
        let failed = recurring_job(60)
            .start()
            .unwrap()
            .fail("x", NOW, 1)
            .unwrap();
        let restarted = failed.start().unwrap();
        let done = restarted.complete(stats(1), NOW).unwrap();
        assert!(done.start().is_ok());
    }

    #[test]
    fn test_apply_edit_reports_changes() {
        let mut job = recurring_job(60);
        let changes = job.apply_edit(
            JobEdit {
                name: Some("Photos".to_string()),
                interval_seconds: Some(3_600),
                mirror_sync: Some(true),
            },
            NOW + 1_000,
        );

        assert_eq!(
            changes,
            vec![
                JobChange::Renamed {
                    from: "Pictures".to_string(),
                    to: "Photos".to_string()
                },
                JobChange::IntervalChanged { from: 60, to: 3_600 },
                JobChange::MirrorToggled { enabled: true },
            ]
        );
        assert_eq!(job.next_run, Some(NOW + 1_000 + 3_600_000));
        assert!(job.mirror_sync);
    }

    #[test]
    fn test_apply_edit_to_manual_clears_next_run() {
        let mut job = recurring_job(60);
        job.apply_edit(
            JobEdit {
                interval_seconds: Some(0),
                ..JobEdit::default()
            },
            NOW,
        );
        assert_eq!(job.next_run, None);
    }

    #[test]
    fn test_apply_edit_noop() {
        let mut job = recurring_job(60);
        let before = job.clone();
        let changes = job.apply_edit(
            JobEdit {
                name: Some("Pictures".to_string()),
                interval_seconds: Some(60),
                mirror_sync: Some(false),
            },
            NOW + 99,
        );
        assert!(changes.is_empty());
        assert_eq!(job, before);
    }

    #[test]
    fn test_persisted_record_shape() {
        let job = recurring_job(60);
        let json = serde_json::to_value(&job).unwrap();

        assert_eq!(json["accountId"], "acc-1");
        assert_eq!(json["direction"], "up");
        assert_eq!(json["status"], "idle");
        assert_eq!(json["intervalSeconds"], 60);
        assert!(json.get("lastRun").is_none());
    }

    #[test]
    fn test_legacy_record_without_optional_fields() {
        let json = r#"{
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "name": "Docs",
            "accountId": "acc-1",
            "bucket": "docs",
            "localPath": "/home/me/Docs",
            "remotePath": "docs/",
            "direction": "down",
            "status": "running"
        }"#;

        let job: SyncJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.interval_seconds, 0);
        assert!(!job.mirror_sync);
        assert_eq!(job.direction, SyncDirection::Download);
        assert_eq!(job.status, SyncStatus::Running);
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(0), "manual");
        assert_eq!(format_interval(90_000), "1d 1h 0m");
        assert_eq!(format_interval(1_800), "0d 0h 30m");
    }
}
