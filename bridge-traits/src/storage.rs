//! Object Storage Abstractions
//!
//! The wire protocol of the object store is owned by the host. The core drives
//! it through [`StorageBackend`], a small set of coarse operations:
//!
//! - folder reconciliation (one opaque call returning aggregate [`SyncStats`])
//! - server-side copy between buckets of the same provider
//! - in-place rename within a bucket
//! - streamed transfer between arbitrary accounts, with byte progress
//! - recursive listing under a prefix
//!
//! Folders are zero-length marker objects whose key ends in `/`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::account::Account;
use crate::error::Result;

/// An object returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    /// Unix timestamp in milliseconds, when the backend reports one
    pub last_modified: Option<i64>,
}

impl RemoteObject {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: None,
        }
    }

    pub fn is_folder_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}

/// Which side of a sync pair is the source of truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncDirection {
    /// Local folder is pushed to the bucket
    #[serde(rename = "up")]
    Upload,
    /// Bucket prefix is pulled into the local folder
    #[serde(rename = "down")]
    Download,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Upload => "up",
            SyncDirection::Download => "down",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for a single folder reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub bucket: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub direction: SyncDirection,
    /// Delete destination entries that no longer exist at the source
    pub mirror: bool,
}

/// Aggregate result of a reconciliation.
///
/// Field names are kept in snake_case on the wire because that is how the
/// backend reports them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub files_scanned: u64,
    pub files_transferred: u64,
    pub bytes_transferred: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SyncStats {
    /// Stats recorded for a run that produced no result.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Self::default()
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Byte progress reported by a streamed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

/// Callback invoked by the backend as bytes move.
pub type ProgressFn = Arc<dyn Fn(ObjectProgress) + Send + Sync>;

/// Object storage backend
///
/// Every operation is scoped by an [`Account`] snapshot resolved by the
/// caller. Implementations translate failures into
/// [`BridgeError`](crate::error::BridgeError) with enough context (bucket,
/// key) to be shown to a user.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::{StorageBackend, ReconcileRequest, SyncDirection};
///
/// async fn push(backend: &dyn StorageBackend, account: &Account) -> Result<()> {
///     let stats = backend
///         .reconcile(account, &ReconcileRequest {
///             bucket: "photos".into(),
///             local_path: "/home/me/Pictures".into(),
///             remote_path: "pictures/".into(),
///             direction: SyncDirection::Upload,
///             mirror: false,
///         })
///         .await?;
///     println!("uploaded {} files", stats.files_transferred);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reconcile a local folder with a bucket prefix.
    ///
    /// Per-file problems are reported in [`SyncStats::errors`]; an `Err` means
    /// the reconciliation as a whole could not run.
    async fn reconcile(&self, account: &Account, request: &ReconcileRequest) -> Result<SyncStats>;

    /// Copy an object without moving bytes through the host.
    ///
    /// Only valid when source and destination live on the same provider and
    /// endpoint, which is the caller's responsibility.
    async fn copy_object_server_side(
        &self,
        account: &Account,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()>;

    /// Rename an object inside a single bucket.
    async fn rename_object(&self, account: &Account, bucket: &str, old_key: &str, new_key: &str)
        -> Result<()>;

    /// Stream an object from one account to another.
    ///
    /// Returns the number of bytes written at the destination.
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
    ) -> Result<u64>;

    /// List every object under `prefix`, recursively.
    async fn list_objects(&self, account: &Account, bucket: &str, prefix: &str)
        -> Result<Vec<RemoteObject>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_wire_names() {
        assert_eq!(serde_json::to_string(&SyncDirection::Upload).unwrap(), "\"up\"");
        assert_eq!(
            serde_json::from_str::<SyncDirection>("\"down\"").unwrap(),
            SyncDirection::Download
        );
    }

    #[test]
    fn test_failed_stats_carry_single_error() {
        let stats = SyncStats::failed("boom");
        assert_eq!(stats.files_scanned, 0);
        assert_eq!(stats.files_transferred, 0);
        assert_eq!(stats.bytes_transferred, 0);
        assert_eq!(stats.errors, vec!["boom".to_string()]);
        assert!(stats.has_errors());
    }

    #[test]
    fn test_stats_use_backend_field_names() {
        let json = r#"{"files_scanned":3,"files_transferred":2,"bytes_transferred":10}"#;
        let stats: SyncStats = serde_json::from_str(json).unwrap();
        assert_eq!(stats.files_scanned, 3);
        assert!(stats.errors.is_empty());
    }

    #[test]
    fn test_folder_marker_detection() {
        assert!(RemoteObject::new("photos/2024/", 0).is_folder_marker());
        assert!(!RemoteObject::new("photos/2024/a.jpg", 12).is_folder_marker());
    }
}
