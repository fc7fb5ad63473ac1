//! Activity Recording
//!
//! Fire-and-forget audit trail of user-visible operations (transfers, sync
//! runs, job edits). Recording is best effort: [`ActivityRecorder::record`]
//! has no error channel, and implementations must swallow and log their own
//! failures so that a broken audit sink never affects the operation being
//! recorded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::account::Account;

/// Kind of operation being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Copy,
    Move,
    Sync,
    SyncNameChanged,
    SyncIntervalChanged,
    SyncMirrorEnabled,
    SyncMirrorDisabled,
    SyncCreated,
    SyncDeleted,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Copy => "copy",
            ActionKind::Move => "move",
            ActionKind::Sync => "sync",
            ActionKind::SyncNameChanged => "sync_name_changed",
            ActionKind::SyncIntervalChanged => "sync_interval_changed",
            ActionKind::SyncMirrorEnabled => "sync_mirror_enabled",
            ActionKind::SyncMirrorDisabled => "sync_mirror_disabled",
            ActionKind::SyncCreated => "sync_created",
            ActionKind::SyncDeleted => "sync_deleted",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Failed,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Success => "success",
            ActivityStatus::Failed => "failed",
        }
    }
}

/// Who initiated the recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivitySource {
    User,
    Scheduler,
}

impl ActivitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivitySource::User => "user",
            ActivitySource::Scheduler => "scheduler",
        }
    }
}

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub bucket: String,
    pub action: ActionKind,
    pub path_before: Option<String>,
    pub path_after: Option<String>,
    pub status: ActivityStatus,
    pub error_message: Option<String>,
    pub byte_count: Option<u64>,
    pub source: ActivitySource,
}

impl ActivityEntry {
    pub fn success(bucket: impl Into<String>, action: ActionKind, source: ActivitySource) -> Self {
        Self {
            bucket: bucket.into(),
            action,
            path_before: None,
            path_after: None,
            status: ActivityStatus::Success,
            error_message: None,
            byte_count: None,
            source,
        }
    }

    pub fn failure(
        bucket: impl Into<String>,
        action: ActionKind,
        source: ActivitySource,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: ActivityStatus::Failed,
            error_message: Some(message.into()),
            ..Self::success(bucket, action, source)
        }
    }

    pub fn with_paths(mut self, before: Option<String>, after: Option<String>) -> Self {
        self.path_before = before;
        self.path_after = after;
        self
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.byte_count = Some(bytes);
        self
    }
}

/// Audit sink.
///
/// Implementations must honour [`Account::enable_activity_log`] and must not
/// panic or block for long; callers await the future inline.
#[async_trait]
pub trait ActivityRecorder: Send + Sync {
    async fn record(&self, account: &Account, entry: ActivityEntry);
}

/// Recorder that drops everything.
#[derive(Debug, Clone, Default)]
pub struct NoopActivityRecorder;

#[async_trait]
impl ActivityRecorder for NoopActivityRecorder {
    async fn record(&self, _account: &Account, _entry: ActivityEntry) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind_names_match_log_vocabulary() {
        assert_eq!(ActionKind::SyncMirrorEnabled.as_str(), "sync_mirror_enabled");
        assert_eq!(
            serde_json::to_string(&ActionKind::SyncIntervalChanged).unwrap(),
            "\"sync_interval_changed\""
        );
    }

    #[test]
    fn test_failure_entry_builder() {
        let entry = ActivityEntry::failure("photos", ActionKind::Sync, ActivitySource::Scheduler, "denied")
            .with_paths(Some("backup/".into()), None);

        assert_eq!(entry.status, ActivityStatus::Failed);
        assert_eq!(entry.error_message.as_deref(), Some("denied"));
        assert_eq!(entry.path_before.as_deref(), Some("backup/"));
        assert_eq!(entry.byte_count, None);
    }
}
