// tests/scenarios.rs
// End-to-end behaviour of the detectors and the trend lifecycle on synthetic streams.
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeSet;
use std::time::Duration as StdDuration;

use trend_pipeline::anomaly::{AnomalyDetector, Baseline, Direction};
use trend_pipeline::config::{
    AnomalyConfig, CredibilityConfig, EmergenceConfig, PatternConfig, WindowSpec,
};
use trend_pipeline::credibility::CredibilityWeighter;
use trend_pipeline::emergence::EmergenceScorer;
use trend_pipeline::pattern::{PatternDetector, PatternType};
use trend_pipeline::rolling::WindowAggregator;
use trend_pipeline::trends::TrendRegistry;
use trend_pipeline::{PipelineConfig, PipelineController, Platform, RawContentItem, Signal, TrendStage};

fn t0() -> DateTime<Utc> {
    // hour-aligned
    Utc.timestamp_opt(1_700_006_400, 0).unwrap()
}

fn signal(ts: DateTime<Utc>, engagement: f64, weight: f64, kws: &[&str]) -> Signal {
    Signal {
        source: Platform::Reddit,
        timestamp: ts,
        content: kws.join(" "),
        keywords: kws.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
        raw_engagement: engagement,
        credibility_weight: weight,
    }
}

#[test]
fn scenario_a_daily_cycle_over_48h() {
    let agg = WindowAggregator::new(&[WindowSpec::new("medium", 48 * 3_600, 3_600)], 16);
    let weighter = CredibilityWeighter::new(&CredibilityConfig::default());

    // 100 signals evenly over 48h; engagement doubles for six hours every day
    for i in 0..100i64 {
        let ts = t0() + Duration::seconds(i * 1_728);
        let hour_of_day = (i * 1_728 / 3_600) % 24;
        let engagement = if (12..18).contains(&hour_of_day) { 20.0 } else { 10.0 };
        let w = weighter.weight_for_signal(Platform::Reddit, ts);
        assert_eq!(agg.ingest(&signal(ts, engagement, w, &["rust"]), ts), 1);
    }

    let now = t0() + Duration::hours(48);
    let snap = agg.snapshot("medium", now).unwrap();
    assert_eq!(snap.count, 100);

    let cfg = PatternConfig::default();
    let patterns = PatternDetector::new(&cfg).detect(&snap).unwrap();
    let daily = patterns
        .iter()
        .find(|p| p.pattern_type == PatternType::Daily)
        .expect("daily pattern");
    assert_eq!(daily.period_secs, Some(86_400));
    assert!(daily.confidence > cfg.confidence_floor);
    assert!(daily.strength > 0.0 && daily.strength <= 1.0);
}

#[test]
fn scenario_b_single_spike_on_flat_baseline() {
    let agg = WindowAggregator::new(&[WindowSpec::new("medium", 48 * 3_600, 3_600)], 16);
    let weighter = CredibilityWeighter::new(&CredibilityConfig::default());

    for h in 0..40i64 {
        let ts = t0() + Duration::hours(h) + Duration::minutes(10);
        let engagement = if h == 30 { 100.0 } else { 10.0 };
        let w = weighter.weight_for_signal(Platform::GitHub, ts);
        agg.ingest(&signal(ts, engagement, w, &["wasm"]), ts);
    }

    let now = t0() + Duration::hours(40) + Duration::minutes(20);
    let snap = agg.snapshot("medium", now).unwrap();
    let cfg = AnomalyConfig::default();
    let events = AnomalyDetector::new(&cfg)
        .detect(&snap, &Baseline::from_config(&cfg))
        .unwrap();

    assert_eq!(events.len(), 1, "{events:?}");
    let e = &events[0];
    assert_eq!(e.direction, Direction::Spike);
    assert_eq!(e.timestamp, t0() + Duration::hours(30));
    assert_eq!(e.window_ref, "medium");
    assert!(e.deviation_magnitude > cfg.deviation_multiplier);
}

#[test]
fn scenario_c_new_source_starts_at_baseline_then_diverges() {
    let w = CredibilityWeighter::new(&CredibilityConfig::default());
    let now = t0();

    assert!((w.weight_for_signal(Platform::ProductHunt, now) - 0.5).abs() < 1e-12);
    assert!((w.weight_for_signal(Platform::Lobsters, now) - 0.5).abs() < 1e-12);

    let mut last_good = 0.5;
    let mut last_bad = 0.5;
    for i in 0..30 {
        let ts = now + Duration::minutes(i);
        w.record_outcome(Platform::ProductHunt, 0.8, 0.8, 1.0, ts);
        w.record_outcome(Platform::Lobsters, 0.8, 0.1, 0.0, ts);
        let good = w.weight(Platform::ProductHunt);
        let bad = w.weight(Platform::Lobsters);
        assert!(good >= last_good && bad <= last_bad);
        last_good = good;
        last_bad = bad;
    }
    assert!(last_good > 0.95);
    assert!(last_bad < 0.05);
}

async fn wait_for_items(c: &PipelineController, n: u64) {
    for _ in 0..500 {
        let s = c.status();
        if s.events_processed + s.events_rejected >= n {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    panic!("pipeline did not consume {n} items");
}

fn quiet_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    // passes are driven explicitly
    cfg.controller.detection_interval_secs = 3_600;
    cfg
}

#[tokio::test]
async fn scenario_d_uncorroborated_trend_goes_dormant_and_is_purged() {
    let c = PipelineController::new(quiet_config()).unwrap();
    c.start().await;
    for i in 0..6 {
        let item = RawContentItem::new(Platform::Reddit, format!("zigbee firmware update {i}"))
            .engagement(4.0);
        c.submit(item).await.unwrap();
    }
    wait_for_items(&c, 6).await;

    let now = Utc::now();
    c.run_detection_pass_at(now);
    let active = c.list_active_trends();
    assert_eq!(active.len(), 1);
    let trend = &active[0];
    assert_eq!(trend.stage, TrendStage::Emerging);
    assert_eq!(trend.keywords, vec!["firmware", "update", "zigbee"]);
    let id = trend.trend_id.clone();

    // nothing new for longer than the retention horizon
    c.run_detection_pass_at(now + Duration::hours(25));
    assert!(c.list_active_trends().is_empty());
    assert_eq!(c.get_trend(&id).unwrap().stage, TrendStage::Dormant);

    // one more horizon later the dormant record is gone too
    c.run_detection_pass_at(now + Duration::hours(50));
    assert!(c.get_trend(&id).is_none());
    assert!(c.all_trends().is_empty());

    c.stop().await;
}

#[tokio::test]
async fn trend_id_is_stable_across_passes() {
    let c = PipelineController::new(quiet_config()).unwrap();
    c.start().await;
    for i in 0..8 {
        let source = if i % 2 == 0 { Platform::HackerNews } else { Platform::Lobsters };
        let item = RawContentItem::new(source, format!("sqlite replication litestream {i}"))
            .engagement(10.0);
        c.submit(item).await.unwrap();
    }
    wait_for_items(&c, 8).await;

    let now = Utc::now();
    let mut ids = Vec::new();
    for k in 0..4 {
        c.run_detection_pass_at(now + Duration::minutes(k));
        let active = c.list_active_trends();
        assert_eq!(active.len(), 1);
        ids.push(active[0].trend_id.clone());
    }
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    let t = c.get_trend(&ids[0]).unwrap();
    assert_eq!(t.trend_id, trend_pipeline::trends::fingerprint(&t.keywords));
    assert_eq!(t.contributing_sources.len(), 2);
    assert_eq!(c.status().trends_detected, 1);

    c.stop().await;
}

/// Windows, scorer and registry driven on a synthetic clock.
struct Harness {
    agg: WindowAggregator,
    weighter: CredibilityWeighter,
    scorer: EmergenceScorer,
    registry: TrendRegistry,
}

impl Harness {
    fn new(top_keywords: usize) -> Self {
        let cfg = EmergenceConfig::default();
        Self {
            agg: WindowAggregator::new(&[WindowSpec::new("medium", 48 * 3_600, 3_600)], top_keywords),
            weighter: CredibilityWeighter::new(&CredibilityConfig::default()),
            scorer: EmergenceScorer::new(&cfg),
            registry: TrendRegistry::new(cfg.max_trends, cfg.retention_horizon()),
        }
    }

    fn ingest(&self, ts: DateTime<Utc>, kws: &[&str]) {
        let w = self.weighter.weight_for_signal(Platform::Reddit, ts);
        self.agg.ingest(&signal(ts, 4.0, w, kws), ts);
    }

    fn pass(&mut self, now: DateTime<Utc>) {
        self.agg.evict_expired(now);
        let snaps = self.agg.snapshot_all_pinned(now, &self.registry.live_anchors());
        self.scorer
            .update(&[], &[], &snaps, &mut self.registry, &self.weighter, now)
            .unwrap();
    }

    fn only_trend(&self) -> trend_pipeline::Trend {
        let all = self.registry.all();
        assert_eq!(all.len(), 1, "{all:?}");
        all[0].clone()
    }
}

#[test]
fn trickle_below_threshold_goes_dormant() {
    let mut h = Harness::new(64);
    for i in 0..6 {
        h.ingest(t0() + Duration::minutes(i), &["zig"]);
    }
    h.pass(t0() + Duration::hours(1));
    assert_eq!(h.only_trend().stage, TrendStage::Emerging);

    // one signal every 20h never lets the anchor look idle
    let mut dormant_at = None;
    for k in 1..=8i64 {
        let now = t0() + Duration::hours(1 + 20 * k);
        h.ingest(now, &["zig"]);
        h.pass(now);
        if dormant_at.is_none() && h.registry.list_active().is_empty() {
            dormant_at = Some(k);
        }
    }
    // the original burst leaves the 48h window on the third tick; one horizon later it is dormant
    assert_eq!(dormant_at, Some(5));
    assert!(h.registry.list_active().is_empty());
}

#[test]
fn live_anchor_outside_top_keywords_keeps_its_trend() {
    let mut h = Harness::new(2);
    for i in 0..6 {
        h.ingest(t0() + Duration::minutes(i), &["zig"]);
    }
    h.pass(t0() + Duration::hours(1));
    let id = h.only_trend().trend_id;

    for hour in 1..=30i64 {
        let base = t0() + Duration::hours(hour);
        h.ingest(base, &["zig"]);
        for j in 0..10 {
            h.ingest(base + Duration::seconds(j + 1), &["alpha", "beta"]);
        }
        h.pass(base + Duration::minutes(5));
    }

    let t = h.registry.get(&id).unwrap();
    assert!(t.stage.is_active(), "{:?}", t.stage);
    assert_eq!(t.last_activity, t0() + Duration::hours(30));
    assert!(t.signal_count >= 30);
    assert!(t.below_threshold_since.is_none());
}

#[tokio::test]
async fn controller_pins_live_anchors_in_snapshots() {
    let mut cfg = quiet_config();
    cfg.emergence.top_keywords = 2;
    let c = PipelineController::new(cfg).unwrap();
    c.start().await;
    for i in 0..6 {
        c.submit(RawContentItem::new(Platform::Reddit, format!("zig {i}")).engagement(4.0))
            .await
            .unwrap();
    }
    wait_for_items(&c, 6).await;
    c.run_detection_pass();
    let id = c.list_active_trends()[0].trend_id.clone();

    for i in 0..40 {
        c.submit(RawContentItem::new(Platform::Reddit, format!("alpha beta {i}")).engagement(4.0))
            .await
            .unwrap();
    }
    wait_for_items(&c, 46).await;
    c.run_detection_pass();

    let t = c.get_trend(&id).unwrap();
    assert_eq!(t.anchor, "zig");
    assert_eq!(t.signal_count, 6);
    assert!(t.below_threshold_since.is_none());
    assert!(t.stage.is_active());
    c.stop().await;
}
