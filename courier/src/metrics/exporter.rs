//! Prometheus collectors for courier.
//!
//! Compiled only with the `prometheus` feature.
//!
//! ## Counters
//! - `courier_items_enqueued_total` - Items submitted via `enqueue`
//! - `courier_uploads_total` - Upload attempts by outcome
//!   (`uploaded`, `retrying`, `failed`)
//!
//! ## Gauges
//! - `courier_in_flight_uploads` - Uploads currently running
//!
//! ## Histograms
//! - `courier_upload_duration_seconds` - Duration of successful uploads

use prometheus::{
    exponential_buckets, CounterVec, GaugeVec, HistogramVec, Opts, Registry,
};
use std::sync::LazyLock;

/// Global Prometheus registry for courier metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `item_kind`.
pub static ITEMS_ENQUEUED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "courier_items_enqueued_total",
        "Total number of items submitted to the upload queue",
    );
    CounterVec::new(opts, &["item_kind"])
        .expect("courier_items_enqueued_total metric creation failed")
});

/// Labels: `item_kind`, `status`.
pub static UPLOADS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "courier_uploads_total",
        "Total number of upload attempts by outcome",
    );
    CounterVec::new(opts, &["item_kind", "status"])
        .expect("courier_uploads_total metric creation failed")
});

/// Labels: `item_kind`.
pub static IN_FLIGHT_UPLOADS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "courier_in_flight_uploads",
        "Number of uploads currently in flight",
    );
    GaugeVec::new(opts, &["item_kind"])
        .expect("courier_in_flight_uploads metric creation failed")
});

/// Labels: `item_kind`.
pub static UPLOAD_DURATION_SECONDS: LazyLock<HistogramVec> =
    LazyLock::new(|| {
        let buckets = exponential_buckets(0.01, 2.0, 14)
            .expect("bucket creation failed");
        let opts = prometheus::HistogramOpts::new(
            "courier_upload_duration_seconds",
            "Duration of successful uploads in seconds",
        )
        .buckets(buckets);
        HistogramVec::new(opts, &["item_kind"])
            .expect("courier_upload_duration_seconds metric creation failed")
    });

/// Register all collectors with [`REGISTRY`]. Safe to call repeatedly.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(ITEMS_ENQUEUED_TOTAL.clone())
            as Box<dyn prometheus::core::Collector>,
        Box::new(UPLOADS_TOTAL.clone()),
        Box::new(IN_FLIGHT_UPLOADS.clone()),
        Box::new(UPLOAD_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_item_enqueued(item_kind: &str) {
    ITEMS_ENQUEUED_TOTAL.with_label_values(&[item_kind]).inc();
}

pub fn record_upload(item_kind: &str, status: &str) {
    UPLOADS_TOTAL.with_label_values(&[item_kind, status]).inc();
}

pub fn set_in_flight(item_kind: &str, in_flight: usize) {
    IN_FLIGHT_UPLOADS
        .with_label_values(&[item_kind])
        .set(in_flight as f64);
}

pub fn observe_upload_duration(item_kind: &str, duration_secs: f64) {
    UPLOAD_DURATION_SECONDS
        .with_label_values(&[item_kind])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_metrics().expect("first registration");
        init_metrics().expect("second registration");
    }

    #[test]
    fn test_gather_includes_recorded_series() {
        init_metrics().expect("metrics initialization should succeed");

        record_item_enqueued("asset");
        record_upload("asset", "uploaded");
        set_in_flight("asset", 2);
        observe_upload_duration("asset", 0.25);

        let output = gather_metrics().expect("gather should succeed");
        assert!(output.contains("courier_items_enqueued_total"));
        assert!(output.contains("courier_uploads_total"));
        assert!(output.contains("courier_in_flight_uploads"));
        assert!(output.contains("courier_upload_duration_seconds"));
    }
}
