//! # Transfer Orchestration Module
//!
//! Copies and moves objects between buckets and storage accounts.
//!
//! ## Components
//!
//! - **Transfer Jobs** (`job`): request types and the per-destination job state machine
//! - **Routing** (`routing`): same-bucket / server-side / streaming classification
//! - **Naming** (`naming`): destination keys and ` copy N` collision avoidance
//! - **Progress** (`progress`): per-transfer watch channel and handle
//! - **Orchestrator** (`orchestrator`): planning, bounded parallel execution, activity

pub mod error;
pub mod job;
pub mod naming;
pub mod orchestrator;
pub mod progress;
pub mod routing;

pub use error::{Result, TransferError};
pub use job::{
    Destination, ObjectRef, SelectedObject, TransferId, TransferJob, TransferKind,
    TransferRequest, TransferStatus,
};
pub use orchestrator::TransferOrchestrator;
pub use progress::{ProgressTracker, TransferHandle};
pub use routing::TransferRoute;
