//! # Host Bridge Traits
//!
//! Capability traits the host must provide to the sync and transfer cores.
//!
//! ## Overview
//!
//! The cores never talk to an object store, a credential vault or an audit
//! database directly. Each of those is a capability the host injects:
//!
//! - [`StorageBackend`](storage::StorageBackend) - Object-store operations (reconcile, copy, rename, stream, list)
//! - [`AccountDirectory`](account::AccountDirectory) - Snapshot of configured storage accounts
//! - [`ActivityRecorder`](activity::ActivityRecorder) - Best-effort audit trail
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Implementations
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ In Progress |
//!
//! ## Error Handling
//!
//! All fallible bridge operations use [`BridgeError`](error::BridgeError).
//! Implementations should include context such as bucket and key in the
//! error message. `ActivityRecorder` is deliberately infallible.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so that they can be shared across
//! spawned tasks behind an `Arc`.

pub mod account;
pub mod activity;
pub mod error;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use account::{AccessMode, Account, AccountDirectory, ProviderKind};
pub use activity::{
    ActionKind, ActivityEntry, ActivityRecorder, ActivitySource, ActivityStatus,
    NoopActivityRecorder,
};
pub use storage::{
    ObjectProgress, ProgressFn, ReconcileRequest, RemoteObject, StorageBackend, SyncDirection,
    SyncStats,
};
pub use time::{Clock, ManualClock, SystemClock};
