//! Metric names and their one-time descriptors.
//!
//! Everything goes through the `metrics` facade; without an installed recorder
//! the calls are no-ops. The binary installs a Prometheus recorder when
//! `METRICS_ADDR` is set.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub const SIGNALS_INGESTED: &str = "pipeline_signals_ingested_total";
pub const SIGNALS_REJECTED: &str = "pipeline_signals_rejected_total";
pub const FEED_TIMEOUTS: &str = "pipeline_feed_timeouts_total";
pub const DETECTION_PASSES: &str = "pipeline_detection_passes_total";
pub const DETECTION_FAILURES: &str = "pipeline_detection_failures_total";
pub const ANOMALIES: &str = "pipeline_anomalies_total";
pub const ACTIVE_TRENDS: &str = "pipeline_active_trends";
pub const INGEST_LATENCY_MS: &str = "pipeline_ingest_latency_ms";
pub const DROPPED_ON_STOP: &str = "pipeline_dropped_on_stop_total";

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(SIGNALS_INGESTED, "Signals accepted into the windows.");
        describe_counter!(
            SIGNALS_REJECTED,
            "Raw items dropped by normalization or dedup, by reason."
        );
        describe_counter!(FEED_TIMEOUTS, "Feed reads that hit the read timeout.");
        describe_counter!(DETECTION_PASSES, "Completed detection passes.");
        describe_counter!(
            DETECTION_FAILURES,
            "Per-window detection failures (isolated)."
        );
        describe_counter!(ANOMALIES, "Newly reported anomaly events.");
        describe_gauge!(ACTIVE_TRENDS, "Non-dormant trends after the last pass.");
        describe_histogram!(
            INGEST_LATENCY_MS,
            "Queue enqueue to window insert, in milliseconds."
        );
        describe_counter!(DROPPED_ON_STOP, "Queued items discarded when the drain timed out.");
    });
}
