use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("Sync already in progress for job {job_id}")]
    SyncInProgress { job_id: String },

    #[error("Account {account_id} not found")]
    AccountNotFound { account_id: String },

    #[error("Unsupported sync direction: {0}")]
    UnsupportedDirection(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BridgeError),

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid sync job: {0}")]
    InvalidJob(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Job store error: {0}")]
    Store(String),
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Store(format!("malformed job record: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
