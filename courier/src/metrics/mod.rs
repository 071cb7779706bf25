//! Queue health snapshots.
//!
//! [`MetricsTracker`] accumulates upload outcomes for the lifetime of a
//! manager and republishes a [`QueueMetrics`] snapshot on a
//! `tokio::sync::watch` channel after every state change. Observers hold a
//! `watch::Receiver` and always see the latest snapshot.
//!
//! With the `prometheus` feature enabled the [`exporter`](self::exporter)
//! submodule additionally exports process-wide collectors.

#[cfg(feature = "prometheus")]
pub mod exporter;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Point-in-time view of queue health.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Durable count of `pending` rows.
    pub total_queued: u64,
    /// Uploads currently in flight.
    pub in_progress: usize,
    /// Successful uploads since the manager started.
    pub completed: u64,
    /// Items that reached terminal `failed` since the manager started.
    pub failed: u64,
    /// Mean duration of successful uploads.
    pub average_upload_time_ms: f64,
    /// `failed / (completed + failed)`, 0 when nothing finished yet.
    pub error_rate: f64,
    /// Wall-clock time of the last snapshot, 0 before the first one.
    pub last_sync_time_ms: i64,
}

#[derive(Debug, Default)]
struct Counters {
    completed: u64,
    failed: u64,
    upload_time_total_ms: u64,
}

/// Accumulates outcome counters and publishes snapshots.
#[derive(Debug)]
pub struct MetricsTracker {
    counters: Mutex<Counters>,
    sender: watch::Sender<QueueMetrics>,
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsTracker {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(QueueMetrics::default());
        Self {
            counters: Mutex::new(Counters::default()),
            sender,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueMetrics> {
        self.sender.subscribe()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> QueueMetrics {
        self.sender.borrow().clone()
    }

    pub fn record_success(&self, duration_ms: u64) {
        let mut counters = self.counters.lock();
        counters.completed += 1;
        counters.upload_time_total_ms += duration_ms;
    }

    pub fn record_terminal_failure(&self) {
        self.counters.lock().failed += 1;
    }

    /// Recompute the snapshot from the counters plus the supplied live
    /// figures and publish it.
    pub fn publish(&self, total_queued: u64, in_progress: usize) -> QueueMetrics {
        let snapshot = {
            let counters = self.counters.lock();
            let finished = counters.completed + counters.failed;
            QueueMetrics {
                total_queued,
                in_progress,
                completed: counters.completed,
                failed: counters.failed,
                average_upload_time_ms: if counters.completed == 0 {
                    0.0
                } else {
                    counters.upload_time_total_ms as f64
                        / counters.completed as f64
                },
                error_rate: if finished == 0 {
                    0.0
                } else {
                    counters.failed as f64 / finished as f64
                },
                last_sync_time_ms: Utc::now().timestamp_millis(),
            }
        };
        self.sender.send_replace(snapshot.clone());
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_snapshot_is_zeroed() {
        let tracker = MetricsTracker::new();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot, QueueMetrics::default());
        assert_eq!(snapshot.error_rate, 0.0);
    }

    #[test]
    fn test_publish_computes_rates() {
        let tracker = MetricsTracker::new();
        tracker.record_success(100);
        tracker.record_success(300);
        tracker.record_terminal_failure();

        let snapshot = tracker.publish(4, 2);
        assert_eq!(snapshot.total_queued, 4);
        assert_eq!(snapshot.in_progress, 2);
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.average_upload_time_ms, 200.0);
        assert!((snapshot.error_rate - 1.0 / 3.0).abs() < f64::EPSILON);
        assert!(snapshot.last_sync_time_ms > 0);
    }

    #[tokio::test]
    async fn test_subscribers_observe_updates() {
        let tracker = MetricsTracker::new();
        let mut rx = tracker.subscribe();

        tracker.record_success(50);
        tracker.publish(0, 0);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().completed, 1);
    }
}
