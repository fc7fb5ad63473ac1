//! Per-transfer progress channel.
//!
//! Each transfer owns a [`watch`] channel carrying its latest [`TransferJob`]
//! snapshot. Observers either hold the receiver from a [`TransferHandle`] or
//! listen to [`TransferEvent::Progress`] on the event bus.

use crate::job::{TransferId, TransferJob, TransferStatus};
use core_runtime::events::{CoreEvent, EventBus, TransferEvent};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Writer side of a transfer's progress channel.
pub struct ProgressTracker {
    sender: watch::Sender<TransferJob>,
    started: Instant,
    event_bus: EventBus,
}

impl ProgressTracker {
    pub fn new(job: TransferJob, event_bus: EventBus) -> (Self, watch::Receiver<TransferJob>) {
        let (sender, receiver) = watch::channel(job);
        (
            Self {
                sender,
                started: Instant::now(),
                event_bus,
            },
            receiver,
        )
    }

    pub fn snapshot(&self) -> TransferJob {
        self.sender.borrow().clone()
    }

    /// Publish a state change (start, completion, failure).
    pub fn publish(&self, job: TransferJob) {
        self.sender.send_replace(job);
    }

    /// Publish byte progress reported by the backend.
    pub fn report(&self, bytes_transferred: u64, total_bytes: u64) {
        let speed = average_speed(bytes_transferred, self.started.elapsed());
        let mut snapshot = None;

        self.sender.send_modify(|job| {
            job.record_progress(bytes_transferred, total_bytes, speed);
            snapshot = Some((job.id, job.total_bytes, job.progress));
        });

        if let Some((id, total_bytes, percent)) = snapshot {
            let _ = self.event_bus.emit(CoreEvent::Transfer(TransferEvent::Progress {
                transfer_id: id.to_string(),
                bytes_transferred,
                total_bytes,
                percent,
                speed,
            }));
        }
    }
}

fn average_speed(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        0
    } else {
        (bytes as f64 / secs) as u64
    }
}

/// Caller side of a submitted transfer.
#[derive(Debug)]
pub struct TransferHandle {
    pub id: TransferId,
    progress: watch::Receiver<TransferJob>,
    task: JoinHandle<TransferJob>,
}

impl TransferHandle {
    pub(crate) fn new(id: TransferId, progress: watch::Receiver<TransferJob>, task: JoinHandle<TransferJob>) -> Self {
        Self { id, progress, task }
    }

    /// Latest snapshot without waiting.
    pub fn current(&self) -> TransferJob {
        self.progress.borrow().clone()
    }

    /// Receiver that observes every state and progress change.
    pub fn subscribe(&self) -> watch::Receiver<TransferJob> {
        self.progress.clone()
    }

    /// Wait for the transfer to finish.
    ///
    /// A panicked transfer task is reported as a failed job.
    pub async fn wait(self) -> TransferJob {
        match self.task.await {
            Ok(job) => job,
            Err(e) => {
                let mut job = self.progress.borrow().clone();
                job.status = TransferStatus::Failed;
                job.error = Some(format!("transfer task aborted: {}", e));
                job
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ObjectRef, TransferKind};
    use crate::routing::TransferRoute;

    #[test]
    fn test_average_speed() {
        assert_eq!(average_speed(1_000, Duration::from_secs(2)), 500);
        assert_eq!(average_speed(1_000, Duration::ZERO), 0);
    }

    #[tokio::test]
    async fn test_report_updates_receiver_and_bus() {
        let bus = EventBus::new(8);
        let mut events = bus.subscribe();
        let job = TransferJob::new(
            TransferKind::Copy,
            ObjectRef::new("a", "src", "big.iso"),
            ObjectRef::new("b", "dst", "big.iso"),
            TransferRoute::Streaming,
            1_000,
        )
        .start()
        .unwrap();

        let (tracker, receiver) = ProgressTracker::new(job, bus);
        tracker.report(250, 1_000);

        assert_eq!(receiver.borrow().bytes_transferred, 250);
        assert_eq!(receiver.borrow().progress, 25);
        match events.recv().await.unwrap() {
            CoreEvent::Transfer(TransferEvent::Progress { percent, total_bytes, .. }) => {
                assert_eq!(percent, 25);
                assert_eq!(total_bytes, 1_000);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
