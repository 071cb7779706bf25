use std::time::Duration;

use tracing::{info, warn, Instrument};

use crate::telemetry;

use super::manager::QueueManager;
use super::shutdown::ShutdownToken;

/// Result of one reachability poll.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProbeOutcome {
    Online,
    Offline,
    /// Came back online after an offline observation; `reset` failed items
    /// were returned to `pending` and a pass was triggered.
    Recovered { reset: u64 },
}

/// Watches reachability and gives failed items a fresh start when the
/// network returns.
///
/// The first observation only counts as a transition if a previous poll saw
/// the device offline.
#[derive(Debug)]
pub struct RecoveryMonitor {
    manager: QueueManager,
    was_offline: bool,
}

impl RecoveryMonitor {
    pub fn new(manager: QueueManager) -> Self {
        Self {
            manager,
            was_offline: false,
        }
    }

    pub fn was_offline(&self) -> bool {
        self.was_offline
    }

    /// Poll the probe once and react to an offline to online transition.
    pub async fn check_once(&mut self) -> anyhow::Result<ProbeOutcome> {
        let online = self.manager.check_online().await;

        if !online {
            self.was_offline = true;
            return Ok(ProbeOutcome::Offline);
        }
        if !self.was_offline {
            return Ok(ProbeOutcome::Online);
        }

        let store = self.manager.store();
        let kind = store.kind();
        let reset = store
            .reset_failed()
            .instrument(telemetry::recovery_span(kind.as_str()))
            .await?;
        // Only cleared once the reset landed, so a store error retries the
        // reset on the next poll.
        self.was_offline = false;
        info!(item_kind = %kind, reset, "connectivity restored");

        self.manager.trigger();
        Ok(ProbeOutcome::Recovered { reset })
    }

    /// Poll every `reachability_poll_interval_ms` until shutdown.
    pub async fn run(mut self, shutdown: ShutdownToken) {
        let interval = Duration::from_millis(
            self.manager.config().reachability_poll_interval_ms,
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("recovery monitor shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(err) = self.check_once().await {
                        warn!("recovery monitor reset error: {err}");
                    }
                }
            }
        }
    }
}
