//! # Event Bus System
//!
//! Broadcasts state changes from the sync scheduler and the transfer
//! orchestrator using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The cores never call into the UI. Instead, every state transition of a
//! sync job or a transfer job is published as a [`CoreEvent`]; zero or more
//! observers (the job list view, the transfer queue, a log forwarder) can
//! subscribe independently.
//!
//! ```text
//! ┌───────────────┐     emit      ┌───────────┐     subscribe    ┌────────────┐
//! │ SyncScheduler ├──────────────>│           ├─────────────────>│ Job list   │
//! └───────────────┘               │ EventBus  │                  └────────────┘
//! ┌───────────────┐     emit      │ (broadcast│     subscribe    ┌────────────┐
//! │ Transfers     ├──────────────>│  channel) ├─────────────────>│ Queue view │
//! └───────────────┘               └───────────┘                  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::JobsChanged))
//!     .ok();
//!
//! assert_eq!(stream.recv().await.unwrap(), CoreEvent::Sync(SyncEvent::JobsChanged));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emitting with no subscribers returns an error; publishers ignore it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Background sync events
    Sync(SyncEvent),
    /// Copy / move transfer events
    Transfer(TransferEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Transfer(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Transfer(TransferEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Recovered { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Transfer(TransferEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events emitted by the sync scheduler and the job manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A job left `running` by a previous process was marked as failed.
    Recovered {
        job_id: String,
        message: String,
    },
    /// A sync run was started.
    Started {
        job_id: String,
        account_id: String,
        /// Whether the run was requested manually rather than by the timer.
        manual: bool,
    },
    /// A sync run finished.
    Completed {
        job_id: String,
        files_scanned: u64,
        files_transferred: u64,
        bytes_transferred: u64,
        /// Per-file problems reported by the backend.
        error_count: usize,
        /// Next scheduled run (Unix epoch milliseconds), if recurring.
        next_run: Option<i64>,
    },
    /// A sync run failed as a whole.
    Failed {
        job_id: String,
        message: String,
        next_run: Option<i64>,
    },
    /// The persisted job list was edited (create, update, delete).
    JobsChanged,
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Recovered { .. } => "Interrupted sync recovered",
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::JobsChanged => "Sync jobs changed",
        }
    }
}

// ============================================================================
// Transfer Events
// ============================================================================

/// Events emitted by the transfer orchestrator, one stream per transfer job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum TransferEvent {
    /// A transfer job was planned and is waiting to run.
    Queued {
        transfer_id: String,
        file_name: String,
        destination: String,
    },
    /// Byte progress for a running transfer.
    Progress {
        transfer_id: String,
        bytes_transferred: u64,
        total_bytes: u64,
        /// Percentage (0-100)
        percent: u8,
        /// Bytes per second
        speed: u64,
    },
    /// The transfer finished.
    Completed {
        transfer_id: String,
        /// Final destination key after collision resolution.
        destination: String,
        bytes_transferred: u64,
    },
    /// The transfer failed; sibling transfers are unaffected.
    Failed {
        transfer_id: String,
        message: String,
    },
}

impl TransferEvent {
    fn description(&self) -> &str {
        match self {
            TransferEvent::Queued { .. } => "Transfer queued",
            TransferEvent::Progress { .. } => "Transfer in progress",
            TransferEvent::Completed { .. } => "Transfer completed",
            TransferEvent::Failed { .. } => "Transfer failed",
        }
    }

    /// Identifier of the transfer this event belongs to.
    pub fn transfer_id(&self) -> &str {
        match self {
            TransferEvent::Queued { transfer_id, .. }
            | TransferEvent::Progress { transfer_id, .. }
            | TransferEvent::Completed { transfer_id, .. }
            | TransferEvent::Failed { transfer_id, .. } => transfer_id,
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel.
///
/// Cloning is cheap; all clones publish to the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// Subscribers that fall behind by more than `capacity` events receive
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let transfers_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Transfer(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()` / `try_recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
