//! # Sync Job Repository
//!
//! Persistence for the sync job list.
//!
//! ## Overview
//!
//! Jobs are stored as one ordered collection. Every write replaces the whole
//! collection (read-modify-write). Writers within a process hold the store's
//! [`JobStore::edit_lock`] from the load to the replace, so two edits never
//! overwrite each other. Writes from other processes still follow
//! last-writer-wins.
//!
//! Two implementations are provided:
//! - [`JsonFileJobStore`]: a JSON array on disk, written atomically via a
//!   temporary file and rename
//! - [`InMemoryJobStore`]: for tests and hosts that persist jobs themselves

use crate::{Result, SyncJob, SyncJobId};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

// ============================================================================
// Repository Trait
// ============================================================================

/// Storage for the ordered sync job collection.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load every job in storage order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read or parsed
    async fn load_all(&self) -> Result<Vec<SyncJob>>;

    /// Replace the whole collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written
    async fn replace_all(&self, jobs: &[SyncJob]) -> Result<()>;

    /// Lock held across a load and the replace that follows it. Not taken by
    /// `load_all` or `replace_all` themselves.
    fn edit_lock(&self) -> &Mutex<()>;
}

/// Load a single job by id.
pub async fn find_job(store: &dyn JobStore, id: &SyncJobId) -> Result<Option<SyncJob>> {
    Ok(store
        .load_all()
        .await?
        .into_iter()
        .find(|job| &job.id == id))
}

/// Read-modify-write of a single job.
///
/// Returns `Ok(None)` without writing when the job no longer exists.
pub async fn update_job<F, R>(store: &dyn JobStore, id: &SyncJobId, update: F) -> Result<Option<R>>
where
    F: FnOnce(&mut SyncJob) -> Result<R> + Send,
{
    let _edit = store.edit_lock().lock().await;
    let mut jobs = store.load_all().await?;
    let Some(job) = jobs.iter_mut().find(|job| &job.id == id) else {
        return Ok(None);
    };

    let result = update(job)?;
    store.replace_all(&jobs).await?;
    Ok(Some(result))
}

// ============================================================================
// JSON File Implementation
// ============================================================================

/// Job store backed by a pretty-printed JSON array.
pub struct JsonFileJobStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    edit_lock: Mutex<()>,
}

impl JsonFileJobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            edit_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl JobStore for JsonFileJobStore {
    async fn load_all(&self) -> Result<Vec<SyncJob>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Job store not found, starting empty");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        Ok(serde_json::from_str(&contents)?)
    }

    async fn replace_all(&self, jobs: &[SyncJob]) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let payload = serde_json::to_vec_pretty(jobs)?;
        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, payload).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        debug!(path = %self.path.display(), count = jobs.len(), "Persisted sync jobs");
        Ok(())
    }

    fn edit_lock(&self) -> &Mutex<()> {
        &self.edit_lock
    }
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

/// Volatile job store.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<Vec<SyncJob>>,
    edit_lock: Mutex<()>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<SyncJob>) -> Self {
        Self {
            jobs: RwLock::new(jobs),
            edit_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn load_all(&self) -> Result<Vec<SyncJob>> {
        Ok(self.jobs.read().await.clone())
    }

    async fn replace_all(&self, jobs: &[SyncJob]) -> Result<()> {
        *self.jobs.write().await = jobs.to_vec();
        Ok(())
    }

    fn edit_lock(&self) -> &Mutex<()> {
        &self.edit_lock
    }
}

// ============================================================================
// Tests
// ============================================================================
