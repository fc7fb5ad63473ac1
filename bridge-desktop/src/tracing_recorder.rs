//! Activity recorder that writes to the tracing pipeline.

use async_trait::async_trait;
use bridge_traits::{Account, ActivityEntry, ActivityRecorder, ActivityStatus};
use tracing::{info, warn};

/// Emits each activity entry as a structured log event under the
/// `activity` target. Used when no activity database is configured.
#[derive(Debug, Clone, Default)]
pub struct TracingActivityRecorder;

#[async_trait]
impl ActivityRecorder for TracingActivityRecorder {
    async fn record(&self, account: &Account, entry: ActivityEntry) {
        if !account.enable_activity_log {
            return;
        }

        match entry.status {
            ActivityStatus::Success => info!(
                target: "activity",
                account_id = %account.id,
                bucket = %entry.bucket,
                action = %entry.action,
                source = entry.source.as_str(),
                path_before = entry.path_before.as_deref(),
                path_after = entry.path_after.as_deref(),
                bytes = entry.byte_count,
                "Activity recorded"
            ),
            ActivityStatus::Failed => warn!(
                target: "activity",
                account_id = %account.id,
                bucket = %entry.bucket,
                action = %entry.action,
                source = entry.source.as_str(),
                path_before = entry.path_before.as_deref(),
                path_after = entry.path_after.as_deref(),
                error = entry.error_message.as_deref(),
                "Activity failed"
            ),
        }
    }
}
