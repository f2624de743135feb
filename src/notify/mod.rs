//! Run progress notifications.
//!
//! `publish` never blocks: updates go into a bounded channel drained by a
//! publisher task that fans them out to every subscriber. A full channel
//! drops the update with a warning. Delivery is best-effort, so subscribers
//! must tolerate gaps, duplicates and reordering.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::constants;
use crate::types::RunStatus;

/// One progress event for a run
#[derive(Debug, Clone, Serialize)]
pub struct RunUpdate {
    pub id: String,
    pub run_id: String,
    pub status: RunStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl RunUpdate {
    pub fn new(run_id: &str, status: RunStatus, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Outbound notification channel
#[derive(Clone)]
pub struct Notifier {
    outbound: mpsc::Sender<RunUpdate>,
    fanout: broadcast::Sender<RunUpdate>,
}

impl Notifier {
    /// Create the channel and spawn its publisher task.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn spawn() -> Self {
        Self::with_capacity(
            constants::notify::CHANNEL_CAPACITY,
            constants::notify::BROADCAST_CAPACITY,
        )
    }

    pub fn with_capacity(channel: usize, broadcast_capacity: usize) -> Self {
        let (outbound, mut inbound) = mpsc::channel::<RunUpdate>(channel.max(1));
        let (fanout, _) = broadcast::channel(broadcast_capacity.max(1));

        let publisher = fanout.clone();
        tokio::spawn(async move {
            while let Some(update) = inbound.recv().await {
                debug!(
                    run_id = %update.run_id,
                    status = %update.status,
                    message = %update.message,
                    "Publishing run update"
                );
                // Zero subscribers is not an error
                let _ = publisher.send(update);
            }
        });

        Self { outbound, fanout }
    }

    /// Queue an update for delivery without waiting.
    pub fn publish(&self, run_id: &str, status: RunStatus, message: impl Into<String>) {
        let update = RunUpdate::new(run_id, status, message);
        if let Err(e) = self.outbound.try_send(update) {
            warn!(run_id, status = %status, "Dropped run update: {}", e);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunUpdate> {
        self.fanout.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_updates_reach_subscribers() {
        let notifier = Notifier::spawn();
        let mut rx = notifier.subscribe();

        notifier.publish("run-1", RunStatus::Processing, "crawl started");
        notifier.publish("run-1", RunStatus::Success, "done");

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.run_id, "run-1");
        assert_eq!(first.status, RunStatus::Processing);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.status, RunStatus::Success);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_publish_never_blocks_when_full() {
        let notifier = Notifier::with_capacity(1, 4);
        // The publisher task cannot run until this test yields
        for i in 0..10 {
            notifier.publish("run-1", RunStatus::Processing, format!("update {}", i));
        }
    }
}
