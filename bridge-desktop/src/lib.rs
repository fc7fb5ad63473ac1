//! # Desktop Bridge Implementations
//!
//! Default implementations of the bridge traits for desktop hosts.
//!
//! ## Overview
//!
//! - [`InMemoryAccountDirectory`] - Account list the host edits at runtime
//! - [`SqliteActivityLog`] - SQLite-backed activity log with query, clear and export
//! - [`TracingActivityRecorder`] - Activity entries as structured log events
//! - [`InMemoryObjectStore`] - Object store held in process, with upload
//!   reconciliation from a local folder
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{InMemoryAccountDirectory, SqliteActivityLog};
//! use bridge_traits::SystemClock;
//!
//! #[tokio::main]
//! async fn main() {
//!     let accounts = InMemoryAccountDirectory::default();
//!     let log = SqliteActivityLog::open("activity.db".into(), Arc::new(SystemClock))
//!         .await
//!         .unwrap();
//!
//!     // Use in core configuration
//! }
//! ```

mod accounts;
mod activity_log;
mod memory_store;
mod tracing_recorder;

pub use accounts::InMemoryAccountDirectory;
pub use activity_log::{ActivityFilters, ActivityRecord, ExportFormat, SqliteActivityLog};
pub use memory_store::{InMemoryObjectStore, STREAM_CHUNK_SIZE};
pub use tracing_recorder::TracingActivityRecorder;
