//! Tracing instrumentation for courier.
//!
//! Span constructors for the claim, upload and recovery paths plus
//! `record_*` helpers that log an outcome and, with the `prometheus`
//! feature, update the matching collector in
//! [`metrics::exporter`](crate::metrics). All helpers work with the feature
//! disabled.
//!
//! # Example
//!
//! ```ignore
//! use courier::telemetry::{upload_span, record_item_enqueued};
//!
//! let span = upload_span("asset", item.id, item.retries);
//! let _enter = span.enter();
//! record_item_enqueued("asset", item.id);
//! ```

use std::fmt::Display;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info_span, Span};

/// Span covering one `reserve_pending` call.
#[must_use]
pub fn claim_span(item_kind: impl AsRef<str>, batch_size: usize) -> Span {
    info_span!(
        "courier.claim",
        item_kind = %item_kind.as_ref(),
        batch_size = batch_size,
    )
}

/// Span covering a single upload attempt and its bookkeeping.
#[must_use]
pub fn upload_span(
    item_kind: impl AsRef<str>,
    item_id: impl Display,
    prior_retries: u32,
) -> Span {
    info_span!(
        "courier.upload",
        item_kind = %item_kind.as_ref(),
        item_id = %item_id,
        prior_retries = prior_retries,
    )
}

/// Span covering a reachability-recovery reset.
#[must_use]
pub fn recovery_span(item_kind: impl AsRef<str>) -> Span {
    info_span!("courier.recovery", item_kind = %item_kind.as_ref())
}

pub fn record_item_enqueued(item_kind: impl AsRef<str>, item_id: impl Display) {
    tracing::debug!(
        item_kind = %item_kind.as_ref(),
        item_id = %item_id,
        "item enqueued"
    );

    #[cfg(feature = "prometheus")]
    crate::metrics::exporter::record_item_enqueued(item_kind.as_ref());
}

/// Record a successful upload and its duration.
pub fn record_upload_succeeded(
    item_kind: impl AsRef<str>,
    item_id: impl Display,
    server_id: &str,
    duration: Duration,
) {
    tracing::info!(
        item_kind = %item_kind.as_ref(),
        item_id = %item_id,
        server_id = %server_id,
        duration_ms = duration.as_millis() as u64,
        "upload succeeded"
    );

    #[cfg(feature = "prometheus")]
    {
        crate::metrics::exporter::record_upload(item_kind.as_ref(), "uploaded");
        crate::metrics::exporter::observe_upload_duration(
            item_kind.as_ref(),
            duration.as_secs_f64(),
        );
    }
}

/// Record a failed attempt that will be retried.
pub fn record_upload_retrying(
    item_kind: impl AsRef<str>,
    item_id: impl Display,
    attempt: u32,
    backoff: Duration,
    error: &str,
) {
    tracing::warn!(
        item_kind = %item_kind.as_ref(),
        item_id = %item_id,
        attempt = attempt,
        backoff_ms = backoff.as_millis() as u64,
        error = %error,
        "upload failed, retry scheduled"
    );

    #[cfg(feature = "prometheus")]
    crate::metrics::exporter::record_upload(item_kind.as_ref(), "retrying");
}

/// Record an item that exhausted its retry budget.
pub fn record_upload_failed(
    item_kind: impl AsRef<str>,
    item_id: impl Display,
    attempts: u32,
    error: &str,
) {
    tracing::warn!(
        item_kind = %item_kind.as_ref(),
        item_id = %item_id,
        attempts = attempts,
        error = %error,
        "upload failed permanently"
    );

    #[cfg(feature = "prometheus")]
    crate::metrics::exporter::record_upload(item_kind.as_ref(), "failed");
}

pub fn set_in_flight(item_kind: impl AsRef<str>, in_flight: usize) {
    tracing::trace!(
        item_kind = %item_kind.as_ref(),
        in_flight = in_flight,
        "in-flight uploads changed"
    );

    #[cfg(feature = "prometheus")]
    crate::metrics::exporter::set_in_flight(item_kind.as_ref(), in_flight);
}

/// Stopwatch for one upload attempt. Follows tokio time, so paused test
/// clocks are honored.
#[derive(Debug)]
pub struct UploadTimer {
    start: Instant,
}

impl UploadTimer {
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_span() {
        let span = claim_span("asset", 5);
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "courier.claim");
        }
    }

    #[test]
    fn test_upload_span() {
        let span = upload_span("file", 12, 2);
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "courier.upload");
        }
    }

    #[test]
    fn test_recovery_span() {
        let span = recovery_span("asset");
        if let Some(metadata) = span.metadata() {
            assert_eq!(metadata.name(), "courier.recovery");
        }
    }

    #[test]
    fn test_record_helpers_do_not_panic() {
        record_item_enqueued("asset", 1);
        record_upload_succeeded("asset", 1, "srv-1", Duration::from_millis(40));
        record_upload_retrying(
            "asset",
            2,
            1,
            Duration::from_millis(1_000),
            "timeout",
        );
        record_upload_failed("asset", 2, 5, "timeout");
        set_in_flight("asset", 3);
    }

    #[test]
    fn test_upload_timer() {
        let timer = UploadTimer::start();
        std::thread::sleep(Duration::from_millis(1));
        assert!(timer.elapsed() >= Duration::from_millis(1));
    }
}
