// tests/ingest_normalize.rs
use chrono::{Duration, TimeZone, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::time::Duration as StdDuration;

use trend_pipeline::config::IngestConfig;
use trend_pipeline::error::RejectReason;
use trend_pipeline::ingest::{normalize, normalize_text};
use trend_pipeline::{PipelineConfig, PipelineController, Platform, RawContentItem};

#[test]
fn empty_is_ok() {
    assert_eq!(normalize_text("", 1_500), "");
}

#[test]
fn strips_html_and_unescapes() {
    let s = "<p>Hello&nbsp;<b>world</b> &ldquo;ok&rdquo;</p>";
    assert_eq!(normalize_text(s, 1_500), r#"Hello world "ok""#);
}

#[test]
fn folds_whitespace_and_nbsp() {
    let s = "A\u{00A0}\n\tB   C";
    assert_eq!(normalize_text(s, 1_500), "A B C");
}

#[test]
fn any_timestamp_beyond_skew_is_rejected() {
    let cfg = IngestConfig::default();
    let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..200 {
        let ahead = rng.random_range(cfg.future_skew_secs + 1..cfg.future_skew_secs + 86_400 * 30);
        let raw = RawContentItem::new(Platform::Reddit, "from the future")
            .engagement(1.0)
            .at(now + Duration::seconds(ahead));
        let err = normalize(&raw, now, &cfg).unwrap_err();
        assert!(matches!(err.reason, RejectReason::FutureSkew { .. }), "{ahead}");
        assert_eq!(err.platform, Platform::Reddit);
    }
}

#[test]
fn unix_timestamps_on_the_wire() {
    let cfg = IngestConfig::default();
    let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let raw: RawContentItem = serde_json::from_str(
        r#"{"source":"hacker-news","content":"Show HN: tiny tracer","timestamp":1699999000,"metadata":{"points":40,"comments":10}}"#,
    )
    .unwrap();
    let n = normalize(&raw, now, &cfg).unwrap();
    assert_eq!(n.timestamp, Utc.timestamp_opt(1_699_999_000, 0).unwrap());
    assert!(n.raw_engagement > 0.0);
    assert!(n.keywords.contains("tracer"));
}

#[tokio::test]
async fn skewed_signal_never_reaches_a_window() {
    let mut cfg = PipelineConfig::default();
    cfg.controller.detection_interval_secs = 3_600;
    let c = PipelineController::new(cfg).unwrap();
    c.start().await;

    let item = RawContentItem::new(Platform::GitHub, "time traveller repo")
        .engagement(50.0)
        .at(Utc::now() + Duration::hours(1));
    c.submit(item).await.unwrap();
    for _ in 0..500 {
        if c.status().events_rejected >= 1 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }

    let s = c.status();
    assert_eq!(s.events_rejected, 1);
    assert_eq!(s.events_processed, 0);
    assert_eq!(s.rejected_by_reason.get("future_skew"), Some(&1));
    assert!(s.window_counts.values().all(|n| *n == 0));
    assert_eq!(c.snapshot("short").unwrap().count, 0);
    c.stop().await;
}
