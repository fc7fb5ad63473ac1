//! In-process object store.
//!
//! Buckets live in memory, keyed by the account's endpoint (or provider when
//! no endpoint is set), so two accounts on the same endpoint see the same
//! buckets. Upload reconciliation reads the local folder through `tokio::fs`.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    Account, Clock, ObjectProgress, ProgressFn, ReconcileRequest, RemoteObject, StorageBackend,
    SyncDirection, SyncStats, SystemClock,
};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// Chunk size used when streaming between accounts.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: i64,
}

type Bucket = BTreeMap<String, StoredObject>;

/// Object store kept in memory.
pub struct InMemoryObjectStore {
    buckets: RwLock<HashMap<(String, String), Bucket>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryObjectStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            clock,
        }
    }

    fn location(account: &Account, bucket: &str) -> (String, String) {
        let host = account
            .endpoint
            .clone()
            .unwrap_or_else(|| account.provider.as_str().to_string());
        (host, bucket.to_string())
    }

    fn stored(&self, data: Bytes) -> StoredObject {
        StoredObject {
            data,
            last_modified: self.clock.unix_timestamp_millis(),
        }
    }

    /// Write an object directly, bypassing any transfer logic.
    pub async fn put_object(&self, account: &Account, bucket: &str, key: &str, data: impl Into<Bytes>) {
        let object = self.stored(data.into());
        self.buckets
            .write()
            .await
            .entry(Self::location(account, bucket))
            .or_default()
            .insert(key.to_string(), object);
    }

    pub async fn get_object(&self, account: &Account, bucket: &str, key: &str) -> Option<Bytes> {
        self.buckets
            .read()
            .await
            .get(&Self::location(account, bucket))
            .and_then(|objects| objects.get(key))
            .map(|object| object.data.clone())
    }

    /// All keys in a bucket, sorted.
    pub async fn keys(&self, account: &Account, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .await
            .get(&Self::location(account, bucket))
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    async fn read_object(&self, account: &Account, bucket: &str, key: &str) -> Result<Bytes> {
        self.get_object(account, bucket, key)
            .await
            .ok_or_else(|| BridgeError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn upload(&self, account: &Account, request: &ReconcileRequest) -> Result<SyncStats> {
        let metadata = fs::metadata(&request.local_path).await?;
        if !metadata.is_dir() {
            return Err(BridgeError::OperationFailed(format!(
                "Local path is not a directory: {}",
                request.local_path.display()
            )));
        }

        let prefix = remote_prefix(&request.remote_path);
        let files = walk_files(&request.local_path).await?;
        let mut stats = SyncStats::default();
        let mut local_keys = HashSet::new();

        for (relative, path) in files {
            stats.files_scanned += 1;
            let key = format!("{}{}", prefix, relative);
            local_keys.insert(key.clone());

            let data = match fs::read(&path).await {
                Ok(data) => Bytes::from(data),
                Err(e) => {
                    warn!(path = ?path, error = %e, "Failed to read local file");
                    stats.errors.push(format!("{}: {}", relative, e));
                    continue;
                }
            };

            let unchanged = self
                .get_object(account, &request.bucket, &key)
                .await
                .map_or(false, |existing| existing.len() == data.len());
            if unchanged {
                continue;
            }

            stats.files_transferred += 1;
            stats.bytes_transferred += data.len() as u64;
            self.put_object(account, &request.bucket, &key, data).await;
        }

        if request.mirror {
            let mut buckets = self.buckets.write().await;
            if let Some(objects) = buckets.get_mut(&Self::location(account, &request.bucket)) {
                let stale: Vec<String> = objects
                    .keys()
                    .filter(|key| key.starts_with(&prefix) && !key.ends_with('/'))
                    .filter(|key| !local_keys.contains(*key))
                    .cloned()
                    .collect();
                for key in stale {
                    debug!(key = %key, "Removing object missing locally");
                    objects.remove(&key);
                    stats.files_transferred += 1;
                }
            }
        }

        Ok(stats)
    }
}

#[async_trait]
impl StorageBackend for InMemoryObjectStore {
    #[instrument(skip(self, account, request), fields(account_id = %account.id, bucket = %request.bucket))]
    async fn reconcile(&self, account: &Account, request: &ReconcileRequest) -> Result<SyncStats> {
        match request.direction {
            SyncDirection::Upload => self.upload(account, request).await,
            SyncDirection::Download => Err(BridgeError::NotAvailable(
                "download reconciliation".to_string(),
            )),
        }
    }

    async fn copy_object_server_side(
        &self,
        account: &Account,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        let data = self.read_object(account, src_bucket, src_key).await?;
        self.put_object(account, dst_bucket, dst_key, data).await;
        debug!(src_bucket, src_key, dst_bucket, dst_key, "Server-side copy");
        Ok(())
    }

    async fn rename_object(
        &self,
        account: &Account,
        bucket: &str,
        old_key: &str,
        new_key: &str,
    ) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets.entry(Self::location(account, bucket)).or_default();
        let object = objects
            .remove(old_key)
            .ok_or_else(|| BridgeError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: old_key.to_string(),
            })?;
        objects.insert(new_key.to_string(), object);
        Ok(())
    }

    async fn stream_transfer_object(
        &self,
        source: &Account,
        src_bucket: &str,
        src_key: &str,
        dest: &Account,
        dst_bucket: &str,
        dst_key: &str,
        progress: Option<ProgressFn>,
    ) -> Result<u64> {
        let data = self.read_object(source, src_bucket, src_key).await?;
        let total_bytes = data.len() as u64;
        let mut sent = 0u64;

        for chunk in data.chunks(STREAM_CHUNK_SIZE) {
            sent += chunk.len() as u64;
            if let Some(progress) = &progress {
                progress(ObjectProgress {
                    bytes_transferred: sent,
                    total_bytes,
                });
            }
            tokio::task::yield_now().await;
        }

        self.put_object(dest, dst_bucket, dst_key, data).await;
        Ok(total_bytes)
    }

    async fn list_objects(&self, account: &Account, bucket: &str, prefix: &str) -> Result<Vec<RemoteObject>> {
        let buckets = self.buckets.read().await;
        let objects = match buckets.get(&Self::location(account, bucket)) {
            Some(objects) => objects,
            None => return Ok(Vec::new()),
        };

        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| RemoteObject {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
            })
            .collect())
    }
}

fn remote_prefix(remote_path: &str) -> String {
    let trimmed = remote_path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Every regular file under `root`, as (slash-separated relative path, full path).
async fn walk_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|e| BridgeError::OperationFailed(e.to_string()))?
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                files.push((relative, path));
            }
        }
    }

    files.sort();
    Ok(files)
}
