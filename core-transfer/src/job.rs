//! # Transfer Jobs
//!
//! One-shot copy or move of a single object or folder to one destination.
//!
//! A selection fanned out to N destinations becomes N independent
//! [`TransferJob`]s sharing the same source. The destination key is resolved
//! (collision-free for copies) before the job is created and never changes.
//!
//! ```text
//! Pending ──→ Running ──┬──→ Done
//!    │                  └──→ Failed
//!    └──────────────────────→ Failed
//! ```

use crate::{routing::TransferRoute, Result, TransferError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a transfer job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    Copy,
    Move,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Copy => "copy",
            TransferKind::Move => "move",
        }
    }
}

impl std::fmt::Display for TransferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of an object: account, bucket and key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub account_id: String,
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(account_id: impl Into<String>, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// An object picked in the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedObject {
    pub key: String,
    pub size: u64,
}

impl SelectedObject {
    pub fn file(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
        }
    }

    /// A folder, addressed by its marker key. A missing trailing slash is added.
    pub fn folder(key: impl Into<String>) -> Self {
        let mut key = key.into();
        if !key.ends_with('/') {
            key.push('/');
        }
        Self { key, size: 0 }
    }

    pub fn is_folder(&self) -> bool {
        self.key.ends_with('/')
    }
}

/// Where a selection should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub account_id: String,
    pub bucket: String,
    /// Folder inside the bucket; empty for the root.
    pub prefix: String,
}

impl Destination {
    pub fn new(account_id: impl Into<String>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }
}

/// Ad-hoc request: every selected object to every destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub kind: TransferKind,
    pub source_account_id: String,
    pub source_bucket: String,
    pub objects: Vec<SelectedObject>,
    pub destinations: Vec<Destination>,
}

impl TransferRequest {
    pub fn copy(source_account_id: impl Into<String>, source_bucket: impl Into<String>) -> Self {
        Self::new(TransferKind::Copy, source_account_id, source_bucket)
    }

    pub fn move_within(source_account_id: impl Into<String>, source_bucket: impl Into<String>) -> Self {
        Self::new(TransferKind::Move, source_account_id, source_bucket)
    }

    fn new(kind: TransferKind, source_account_id: impl Into<String>, source_bucket: impl Into<String>) -> Self {
        Self {
            kind,
            source_account_id: source_account_id.into(),
            source_bucket: source_bucket.into(),
            objects: Vec::new(),
            destinations: Vec::new(),
        }
    }

    pub fn with_object(mut self, object: SelectedObject) -> Self {
        self.objects.push(object);
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }
}

// ============================================================================
// Transfer Job Entity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Running => "running",
            TransferStatus::Done => "done",
            TransferStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Done | TransferStatus::Failed)
    }
}

/// A single (object, destination) transfer with its live progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferJob {
    pub id: TransferId,
    pub kind: TransferKind,
    pub source: ObjectRef,
    pub destination: ObjectRef,
    pub file_name: String,
    pub is_folder: bool,
    pub route: TransferRoute,
    pub status: TransferStatus,
    /// Percentage (0-100)
    pub progress: u8,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Average bytes per second since the transfer started
    pub speed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferJob {
    pub fn new(
        kind: TransferKind,
        source: ObjectRef,
        destination: ObjectRef,
        route: TransferRoute,
        total_bytes: u64,
    ) -> Self {
        let file_name = crate::naming::object_name(&source.key).to_string();
        let is_folder = source.key.ends_with('/');
        Self {
            id: TransferId::new(),
            kind,
            source,
            destination,
            file_name,
            is_folder,
            route,
            status: TransferStatus::Pending,
            progress: 0,
            bytes_transferred: 0,
            total_bytes,
            speed: 0,
            error: None,
        }
    }

    pub fn start(mut self) -> Result<Self> {
        self.validate_transition(TransferStatus::Running)?;
        self.status = TransferStatus::Running;
        Ok(self)
    }

    /// Apply byte progress reported by the backend.
    ///
    /// The percentage is derived from bytes only when the total is known and
    /// never reaches 100 before [`complete`](Self::complete).
    pub fn record_progress(&mut self, bytes_transferred: u64, total_bytes: u64, speed: u64) {
        self.bytes_transferred = bytes_transferred;
        if total_bytes > 0 {
            self.total_bytes = total_bytes;
        }
        self.speed = speed;
        self.progress = match self.total_bytes {
            0 => 0,
            total => ((bytes_transferred.min(total) * 100) / total).min(99) as u8,
        };
    }

    pub fn complete(mut self, bytes_transferred: u64) -> Result<Self> {
        self.validate_transition(TransferStatus::Done)?;
        self.status = TransferStatus::Done;
        self.bytes_transferred = bytes_transferred;
        self.total_bytes = self.total_bytes.max(bytes_transferred);
        self.progress = 100;
        Ok(self)
    }

    pub fn fail(mut self, message: impl Into<String>) -> Result<Self> {
        self.validate_transition(TransferStatus::Failed)?;
        self.status = TransferStatus::Failed;
        self.error = Some(message.into());
        self.speed = 0;
        Ok(self)
    }

    fn validate_transition(&self, to: TransferStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (TransferStatus::Pending, TransferStatus::Running)
                | (TransferStatus::Pending, TransferStatus::Failed)
                | (TransferStatus::Running, TransferStatus::Done)
                | (TransferStatus::Running, TransferStatus::Failed)
        );

        if !valid {
            return Err(TransferError::InvalidStateTransition {
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

// ============================================================================
// Tests
// ============================================================================
