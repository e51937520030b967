//! # Emergence Scorer
//! Fuses pattern, anomaly and credibility evidence into one score per candidate
//! trend and advances each trend through its lifecycle.
//!
//! `score = wp*P + wa*A + wc*C`, each term in `[0, 1]`, weights fixed by config
//! and normalized to sum 1:
//! - **P**: best `strength * confidence` among patterns of windows where the
//!   trend's anchor keyword is present.
//! - **A**: `1 - e^(-spikes/m) - 0.5 * (1 - e^(-drops/m))`, clamped, over recent
//!   anomalies whose bucket the anchor contributed a meaningful share to.
//! - **C**: mean frozen credibility weight of the anchor's signals.
//!
//! A trend leaves `emerging` only when at least two independent kinds of
//! evidence agree (see [`ScoreBreakdown::corroborated`]).

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

use crate::anomaly::{AnomalyEvent, Direction};
use crate::config::{EmergenceConfig, ScoreWeights};
use crate::credibility::CredibilityWeighter;
use crate::error::DetectionError;
use crate::pattern::Pattern;
use crate::rolling::{KeywordStats, WindowStats};
use crate::trends::{Trend, TrendRegistry, TrendStage};

/// Anomaly count at which the anomaly term reaches ~63% of its range.
const ANOMALY_SATURATION: f64 = 2.0;
/// Co-occurrence share of the anchor's count required to join its cluster.
const CLUSTER_COOCCURRENCE: f64 = 0.5;

/// The three normalized terms behind an emergence score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub pattern: f64,
    pub anomaly: f64,
    pub credibility: f64,
    pub spikes: usize,
    pub drops: usize,
    /// Verification history for a contributing source, or several platforms agreeing.
    pub credibility_evidence: bool,
}

impl ScoreBreakdown {
    /// At least two of: a pattern, a spike, credibility evidence.
    pub fn corroborated(&self) -> bool {
        let kinds = [self.pattern > 0.0, self.spikes > 0, self.credibility_evidence];
        kinds.iter().filter(|k| **k).count() >= 2
    }

    pub fn score(&self, w: &ScoreWeights) -> f64 {
        (w.pattern * self.pattern + w.anomaly * self.anomaly + w.credibility * self.credibility)
            .clamp(0.0, 1.0)
    }
}

/// Everything the lifecycle transition looks at. Nothing else is consulted.
#[derive(Debug, Clone, Copy)]
pub struct StageInputs {
    pub score: f64,
    pub prev_score: f64,
    /// Historical max including this pass.
    pub peak_score: f64,
    pub velocity: f64,
    pub corroborated: bool,
    /// Time since the newest anchor signal.
    pub idle_for: Duration,
    /// Time the anchor has spent under the minimum signal count; zero when above it.
    pub below_threshold_for: Duration,
    /// Time spent in the current stage.
    pub in_stage_for: Duration,
}

/// One lifecycle step.
pub fn next_stage(prev: TrendStage, inp: &StageInputs, cfg: &EmergenceConfig) -> TrendStage {
    let horizon = cfg.retention_horizon();
    let eps = cfg.velocity_epsilon;
    if prev == TrendStage::Dormant || inp.idle_for > horizon || inp.below_threshold_for > horizon {
        return TrendStage::Dormant;
    }
    match prev {
        TrendStage::Emerging => {
            if inp.corroborated && inp.velocity > eps && inp.score >= inp.prev_score {
                TrendStage::Growing
            } else {
                TrendStage::Emerging
            }
        }
        TrendStage::Growing => {
            if inp.velocity < -eps {
                TrendStage::Declining
            } else if inp.score >= cfg.peak_ratio * inp.peak_score
                && (inp.score - inp.prev_score).abs() <= cfg.plateau_tolerance
            {
                TrendStage::Peaking
            } else {
                TrendStage::Growing
            }
        }
        TrendStage::Peaking => {
            if inp.velocity < -eps || inp.score < cfg.peak_ratio * inp.peak_score {
                TrendStage::Declining
            } else {
                TrendStage::Peaking
            }
        }
        TrendStage::Declining => {
            if inp.in_stage_for > horizon {
                TrendStage::Dormant
            } else if inp.corroborated && inp.velocity > eps && inp.score >= inp.prev_score {
                TrendStage::Growing
            } else {
                TrendStage::Declining
            }
        }
        TrendStage::Dormant => TrendStage::Dormant,
    }
}

/// Least-squares slope of `ys` against bucket index.
fn slope(ys: &[f64]) -> f64 {
    let n = ys.len();
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / nf;
    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den <= 0.0 {
        0.0
    } else {
        num / den
    }
}

#[derive(Debug, Clone)]
pub struct EmergenceScorer {
    cfg: EmergenceConfig,
    weights: ScoreWeights,
}

impl EmergenceScorer {
    pub fn new(cfg: &EmergenceConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            weights: cfg.weights.normalized(),
        }
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    /// Apply one detection pass to `registry`. Returns every trend touched
    /// this pass (created, re-scored or retired) in its post-pass state.
    pub fn update(
        &self,
        patterns: &[Pattern],
        anomalies: &[AnomalyEvent],
        snapshots: &[WindowStats],
        registry: &mut TrendRegistry,
        credibility: &CredibilityWeighter,
        now: DateTime<Utc>,
    ) -> Result<Vec<Trend>, DetectionError> {
        let trend_window = snapshots
            .iter()
            .find(|s| s.name == self.cfg.trend_window)
            .ok_or_else(|| DetectionError::UnknownWindow(self.cfg.trend_window.clone()))?;
        let evidence = Evidence {
            patterns,
            anomalies,
            snapshots,
            credibility,
            now,
        };

        let mut touched: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for kw in &trend_window.keywords {
            if kw.count < self.cfg.min_signal_threshold {
                continue;
            }
            let id = match registry.find_live(&kw.keyword) {
                Some(t) => t.trend_id.clone(),
                None => {
                    // stale keywords still sitting in the window do not start trends
                    if now - kw.last_seen > self.cfg.retention_horizon() {
                        continue;
                    }
                    let core = self.cluster(kw);
                    let id = registry.allocate_id(&core);
                    let mut t = Trend::new(id.clone(), &kw.keyword, core, kw.last_seen, now);
                    self.score(&mut t, Some(kw), trend_window, &evidence);
                    registry.insert(t);
                    seen.insert(id.clone());
                    touched.push(id);
                    continue;
                }
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(t) = registry.get_mut(&id) {
                let stats = trend_window.keyword(&t.anchor).or(Some(kw));
                self.advance(t, stats, trend_window, &evidence);
                touched.push(id);
            }
        }

        // live trends nobody matched still age
        for id in registry.live_ids() {
            if seen.contains(&id) {
                continue;
            }
            if let Some(t) = registry.get_mut(&id) {
                let stats = trend_window.keyword(&t.anchor);
                self.advance(t, stats, trend_window, &evidence);
                touched.push(id);
            }
        }

        let out = touched
            .iter()
            .filter_map(|id| registry.get(id).cloned())
            .collect();
        registry.purge(now);
        Ok(out)
    }

    /// Anchor plus its strongest co-occurring keywords, up to `cluster_size`.
    fn cluster(&self, anchor: &KeywordStats) -> BTreeSet<String> {
        let min_co = (anchor.count as f64 * CLUSTER_COOCCURRENCE).ceil() as u64;
        let mut core: BTreeSet<String> = anchor
            .co_keywords
            .iter()
            .filter(|(_, n)| *n >= min_co.max(1))
            .take(self.cfg.cluster_size.saturating_sub(1))
            .map(|(k, _)| k.clone())
            .collect();
        core.insert(anchor.keyword.clone());
        core
    }

    /// Refresh score/velocity from this pass's evidence. Returns the prior score.
    fn score(
        &self,
        t: &mut Trend,
        stats: Option<&KeywordStats>,
        trend_window: &WindowStats,
        ev: &Evidence<'_>,
    ) -> f64 {
        if let Some(s) = stats {
            t.contributing_sources.extend(s.sources.keys().copied());
            t.signal_count = s.count;
            t.weighted_engagement = s.weighted_sum;
            if s.last_seen > t.last_activity {
                t.last_activity = s.last_seen;
            }
        } else {
            t.signal_count = 0;
            t.weighted_engagement = 0.0;
        }
        if t.signal_count < self.cfg.min_signal_threshold {
            t.below_threshold_since.get_or_insert(ev.now);
        } else {
            t.below_threshold_since = None;
        }

        let pattern = ev
            .patterns
            .iter()
            .filter(|p| ev.anchor_present(&p.window, &t.anchor))
            .map(|p| (p.strength * p.confidence).clamp(0.0, 1.0))
            .fold(0.0, f64::max);

        let recency = Duration::seconds(self.cfg.anomaly_recency_secs);
        let (mut spikes, mut drops) = (0usize, 0usize);
        for a in ev.anomalies {
            if ev.now - a.timestamp > recency {
                continue;
            }
            if !ev.attributed(a, &t.anchor, self.cfg.attribution_share) {
                continue;
            }
            match a.direction {
                Direction::Spike => spikes += 1,
                Direction::Drop => drops += 1,
            }
        }
        let anomaly = ((1.0 - (-(spikes as f64) / ANOMALY_SATURATION).exp())
            - 0.5 * (1.0 - (-(drops as f64) / ANOMALY_SATURATION).exp()))
        .clamp(0.0, 1.0);

        let credibility = stats.map_or(0.0, |s| s.mean_credibility).clamp(0.0, 1.0);
        let credibility_evidence = t.contributing_sources.len() >= 2
            || t
                .contributing_sources
                .iter()
                .any(|s| ev.credibility.has_history(*s));

        let breakdown = ScoreBreakdown {
            pattern,
            anomaly,
            credibility,
            spikes,
            drops,
            credibility_evidence,
        };
        let prev = t.emergence_score;
        t.breakdown = breakdown;
        t.emergence_score = breakdown.score(&self.weights);
        t.peak_score = t.peak_score.max(t.emergence_score);
        t.current_velocity = stats.map_or(0.0, |s| self.velocity(s, trend_window));
        t.last_updated = ev.now;
        prev
    }

    fn advance(
        &self,
        t: &mut Trend,
        stats: Option<&KeywordStats>,
        trend_window: &WindowStats,
        ev: &Evidence<'_>,
    ) {
        let prev_score = self.score(t, stats, trend_window, ev);
        let inputs = StageInputs {
            score: t.emergence_score,
            prev_score,
            peak_score: t.peak_score,
            velocity: t.current_velocity,
            corroborated: t.breakdown.corroborated(),
            idle_for: ev.now - t.last_activity,
            below_threshold_for: t
                .below_threshold_since
                .map_or(Duration::zero(), |since| ev.now - since),
            in_stage_for: ev.now - t.stage_entered_at,
        };
        let next = next_stage(t.stage, &inputs, &self.cfg);
        t.enter(next, ev.now);
    }

    /// Slope over the anchor's last complete buckets, scaled to per hour.
    fn velocity(&self, stats: &KeywordStats, window: &WindowStats) -> f64 {
        let complete = window.complete_series().len().min(stats.series.len());
        let series = &stats.series[..complete];
        let n = self.cfg.velocity_buckets.max(2).min(series.len());
        let per_bucket = slope(&series[series.len() - n..]);
        per_bucket * 3_600.0 / window.bucket_secs as f64
    }
}

/// Read-only view of one pass's detector output.
struct Evidence<'a> {
    patterns: &'a [Pattern],
    anomalies: &'a [AnomalyEvent],
    snapshots: &'a [WindowStats],
    credibility: &'a CredibilityWeighter,
    now: DateTime<Utc>,
}

impl Evidence<'_> {
    fn snapshot(&self, name: &str) -> Option<&WindowStats> {
        self.snapshots.iter().find(|s| s.name == name)
    }

    fn anchor_present(&self, window: &str, anchor: &str) -> bool {
        self.snapshot(window)
            .and_then(|s| s.keyword(anchor))
            .is_some_and(|k| k.count > 0)
    }

    /// The anchor accounts for at least `share` of the anomalous bucket.
    fn attributed(&self, a: &AnomalyEvent, anchor: &str, share: f64) -> bool {
        let Some(window) = self.snapshot(&a.window_ref) else {
            return false;
        };
        let Some(kw) = window.keyword(anchor) else {
            return false;
        };
        let total = window.series.get(a.bucket_index).copied().unwrap_or(0.0);
        let mine = kw.series.get(a.bucket_index).copied().unwrap_or(0.0);
        match a.direction {
            Direction::Spike => total > 0.0 && mine / total >= share,
            // a drop empties the bucket; attribute it if the anchor was active before
            Direction::Drop => kw.count > 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredibilityConfig, WindowSpec};
    use crate::pattern::PatternType;
    use crate::signal::Platform;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_006_400 + 10 * 3_600, 0).unwrap()
    }

    fn cfg() -> EmergenceConfig {
        EmergenceConfig::default()
    }

    fn inputs() -> StageInputs {
        StageInputs {
            score: 0.5,
            prev_score: 0.4,
            peak_score: 0.5,
            velocity: 1.0,
            corroborated: true,
            idle_for: Duration::minutes(5),
            below_threshold_for: Duration::zero(),
            in_stage_for: Duration::hours(1),
        }
    }

    fn keyword(name: &str, series: Vec<f64>, sources: &[Platform], cred: f64) -> KeywordStats {
        KeywordStats {
            keyword: name.to_string(),
            count: series.iter().filter(|v| **v > 0.0).count() as u64,
            weighted_sum: series.iter().sum(),
            mean_credibility: cred,
            last_seen: now() - Duration::minutes(30),
            sources: sources.iter().map(|p| (*p, 1)).collect::<BTreeMap<_, _>>(),
            series,
            co_keywords: Vec::new(),
        }
    }

    fn window(series: Vec<f64>, keywords: Vec<KeywordStats>) -> WindowStats {
        let mut s = WindowStats::empty(&WindowSpec::new("medium", 48 * 3_600, 3_600), now());
        s.series_start = Some(now() - Duration::hours(series.len() as i64 - 1));
        s.count = 10;
        s.series = series;
        s.partial_tail = true;
        s.keywords = keywords;
        s
    }

    fn spike(idx: usize) -> AnomalyEvent {
        AnomalyEvent {
            window_ref: "medium".into(),
            timestamp: now() - Duration::hours(1),
            bucket_index: idx,
            value: 50.0,
            baseline_mean: 5.0,
            baseline_std: 1.0,
            deviation_magnitude: 45.0,
            direction: Direction::Spike,
        }
    }

    #[test]
    fn emerging_needs_corroboration() {
        let mut inp = inputs();
        assert_eq!(next_stage(TrendStage::Emerging, &inp, &cfg()), TrendStage::Growing);
        inp.corroborated = false;
        assert_eq!(next_stage(TrendStage::Emerging, &inp, &cfg()), TrendStage::Emerging);
    }

    #[test]
    fn growing_plateau_peaks_then_declines() {
        let mut inp = inputs();
        inp.prev_score = 0.495;
        assert_eq!(next_stage(TrendStage::Growing, &inp, &cfg()), TrendStage::Peaking);
        inp.score = 0.3;
        inp.velocity = 0.0;
        assert_eq!(next_stage(TrendStage::Peaking, &inp, &cfg()), TrendStage::Declining);
        let mut inp = inputs();
        inp.velocity = -1.0;
        assert_eq!(next_stage(TrendStage::Growing, &inp, &cfg()), TrendStage::Declining);
    }

    #[test]
    fn idle_or_long_decline_goes_dormant_and_stays() {
        let mut inp = inputs();
        inp.idle_for = Duration::hours(25);
        assert_eq!(next_stage(TrendStage::Emerging, &inp, &cfg()), TrendStage::Dormant);
        let mut inp = inputs();
        inp.velocity = 0.0;
        inp.in_stage_for = Duration::hours(25);
        assert_eq!(next_stage(TrendStage::Declining, &inp, &cfg()), TrendStage::Dormant);
        assert_eq!(next_stage(TrendStage::Dormant, &inputs(), &cfg()), TrendStage::Dormant);
    }

    #[test]
    fn long_stretch_below_threshold_goes_dormant_despite_fresh_signals() {
        let mut inp = inputs();
        inp.below_threshold_for = Duration::hours(23);
        assert_eq!(next_stage(TrendStage::Growing, &inp, &cfg()), TrendStage::Growing);
        inp.below_threshold_for = Duration::hours(25);
        assert_eq!(next_stage(TrendStage::Growing, &inp, &cfg()), TrendStage::Dormant);
        assert_eq!(next_stage(TrendStage::Emerging, &inp, &cfg()), TrendStage::Dormant);
    }

    #[test]
    fn breakdown_score_uses_normalized_weights() {
        let w = ScoreWeights {
            pattern: 1.0,
            anomaly: 1.0,
            credibility: 2.0,
        }
        .normalized();
        let b = ScoreBreakdown {
            pattern: 1.0,
            anomaly: 0.0,
            credibility: 0.5,
            ..Default::default()
        };
        assert!((b.score(&w) - 0.5).abs() < 1e-12);
        assert!(!b.corroborated());
    }

    #[test]
    fn velocity_slope_is_per_hour() {
        assert!((slope(&[1.0, 2.0, 3.0, 4.0]) - 1.0).abs() < 1e-12);
        assert_eq!(slope(&[5.0]), 0.0);
        assert_eq!(slope(&[2.0, 2.0, 2.0]), 0.0);
    }

    #[test]
    fn single_anomaly_alone_keeps_trend_emerging() {
        let scorer = EmergenceScorer::new(&cfg());
        let weighter = CredibilityWeighter::new(&CredibilityConfig::default());
        let mut reg = TrendRegistry::new(16, cfg().retention_horizon());

        let series = vec![1.0, 1.0, 2.0, 3.0, 4.0, 6.0, 8.0, 20.0, 0.0];
        let kw = keyword("zig", series.clone(), &[Platform::Reddit], 0.5);
        let snaps = vec![window(series, vec![kw])];
        let anomalies = vec![spike(7)];

        let first = scorer
            .update(&[], &anomalies, &snaps, &mut reg, &weighter, now())
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].stage, TrendStage::Emerging);
        assert_eq!(first[0].breakdown.spikes, 1);
        assert!(!first[0].breakdown.corroborated());

        let later = now() + Duration::minutes(5);
        let second = scorer
            .update(&[], &anomalies, &snaps, &mut reg, &weighter, later)
            .unwrap();
        assert_eq!(second[0].trend_id, first[0].trend_id);
        assert_eq!(second[0].stage, TrendStage::Emerging);
    }

    #[test]
    fn corroborated_rising_trend_grows() {
        let scorer = EmergenceScorer::new(&cfg());
        let weighter = CredibilityWeighter::new(&CredibilityConfig::default());
        let mut reg = TrendRegistry::new(16, cfg().retention_horizon());

        let series = vec![1.0, 1.0, 2.0, 3.0, 4.0, 6.0, 8.0, 20.0, 0.0];
        let kw = keyword("zig", series.clone(), &[Platform::Reddit, Platform::HackerNews], 0.6);
        let snaps = vec![window(series, vec![kw])];
        let anomalies = vec![spike(7)];
        let pattern = Pattern {
            window: "medium".into(),
            pattern_type: PatternType::Daily,
            period_secs: Some(86_400),
            strength: 0.5,
            confidence: 0.8,
            peak_offset_secs: 0,
            description: String::new(),
        };

        scorer
            .update(&[pattern.clone()], &anomalies, &snaps, &mut reg, &weighter, now())
            .unwrap();
        let out = scorer
            .update(&[pattern], &anomalies, &snaps, &mut reg, &weighter, now() + Duration::minutes(5))
            .unwrap();
        let t = &out[0];
        assert!(t.breakdown.corroborated());
        assert!(t.current_velocity > 0.0);
        assert_eq!(t.stage, TrendStage::Growing);
        assert!(t.emergence_score > 0.0 && t.emergence_score <= 1.0);
        assert_eq!(list_len(&reg), 1);
    }

    #[test]
    fn below_threshold_keywords_create_nothing() {
        let scorer = EmergenceScorer::new(&cfg());
        let weighter = CredibilityWeighter::new(&CredibilityConfig::default());
        let mut reg = TrendRegistry::new(16, cfg().retention_horizon());
        let series = vec![1.0, 0.0, 1.0, 0.0];
        let kw = keyword("rare", series.clone(), &[Platform::DevTo], 0.5);
        let out = scorer
            .update(&[], &[], &[window(series, vec![kw])], &mut reg, &weighter, now())
            .unwrap();
        assert!(out.is_empty());
        assert!(reg.is_empty());
    }

    #[test]
    fn missing_trend_window_is_an_error() {
        let scorer = EmergenceScorer::new(&cfg());
        let weighter = CredibilityWeighter::new(&CredibilityConfig::default());
        let mut reg = TrendRegistry::new(16, cfg().retention_horizon());
        let res = scorer.update(&[], &[], &[], &mut reg, &weighter, now());
        assert!(matches!(res, Err(DetectionError::UnknownWindow(_))));
    }

    fn list_len(reg: &TrendRegistry) -> usize {
        reg.list_active().len()
    }
}
