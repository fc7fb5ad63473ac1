use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Account {account_id} not found")]
    AccountNotFound { account_id: String },

    #[error("Destination account {account_id} is read-only")]
    ReadOnlyDestination { account_id: String },

    #[error("No objects selected")]
    EmptySelection,

    #[error("No destinations selected")]
    NoDestinations,

    #[error("Move is only supported within the same account and bucket")]
    CrossBucketMove,

    #[error("Invalid move: {0}")]
    InvalidMove(String),

    #[error("Destination {key} already exists")]
    DestinationExists { key: String },

    #[error("No free destination name for {key}")]
    NoFreeName { key: String },

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Transfer queue closed")]
    QueueClosed,

    #[error("Backend error: {0}")]
    Backend(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, TransferError>;
