//! Trend records and the bounded registry that holds them.
//!
//! A trend's identity is fixed when it is created: `trend_id` is a fingerprint
//! of its core keyword set, so it stays the same for as long as the trend
//! lives. `Dormant` is terminal. A later resurgence of the same cluster gets a
//! fresh id with a generation suffix while the dormant record is still held.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use tracing::{debug, info};

use crate::emergence::ScoreBreakdown;
use crate::signal::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendStage {
    Emerging,
    Growing,
    Peaking,
    Declining,
    Dormant,
}

impl TrendStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendStage::Emerging => "emerging",
            TrendStage::Growing => "growing",
            TrendStage::Peaking => "peaking",
            TrendStage::Declining => "declining",
            TrendStage::Dormant => "dormant",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, TrendStage::Dormant)
    }
}

impl std::fmt::Display for TrendStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub trend_id: String,
    /// Keyword the cluster was built around.
    pub anchor: String,
    /// Core keyword set, sorted; frozen at creation.
    pub keywords: Vec<String>,
    pub emergence_score: f64,
    /// Highest score seen so far.
    pub peak_score: f64,
    pub stage: TrendStage,
    /// Least-squares slope of the anchor's weighted engagement, per hour.
    pub current_velocity: f64,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Newest anchor signal observed.
    pub last_activity: DateTime<Utc>,
    pub stage_entered_at: DateTime<Utc>,
    /// Since when the anchor's window count has been under the creation threshold.
    pub below_threshold_since: Option<DateTime<Utc>>,
    pub contributing_sources: BTreeSet<Platform>,
    pub signal_count: u64,
    pub weighted_engagement: f64,
    pub breakdown: ScoreBreakdown,
}

impl Trend {
    pub fn new(
        trend_id: String,
        anchor: &str,
        keywords: BTreeSet<String>,
        last_activity: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            trend_id,
            anchor: anchor.to_string(),
            keywords: keywords.into_iter().collect(),
            emergence_score: 0.0,
            peak_score: 0.0,
            stage: TrendStage::Emerging,
            current_velocity: 0.0,
            first_seen: now,
            last_updated: now,
            last_activity,
            stage_entered_at: now,
            below_threshold_since: None,
            contributing_sources: BTreeSet::new(),
            signal_count: 0,
            weighted_engagement: 0.0,
            breakdown: ScoreBreakdown::default(),
        }
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.keywords.binary_search_by(|k| k.as_str().cmp(keyword)).is_ok()
    }

    /// Move to `stage`, stamping the entry time. No-op if already there.
    pub fn enter(&mut self, stage: TrendStage, now: DateTime<Utc>) {
        if stage == self.stage {
            return;
        }
        info!(
            target: "trends",
            trend_id = %self.trend_id,
            anchor = %self.anchor,
            from = %self.stage,
            to = %stage,
            score = self.emergence_score,
            "trend stage changed"
        );
        self.stage = stage;
        self.stage_entered_at = now;
    }
}

/// Fingerprint of a keyword cluster: `trend-` plus 12 hex chars of SHA-256
/// over the sorted keywords. Order of the input does not matter.
pub fn fingerprint<'a>(keywords: impl IntoIterator<Item = &'a String>) -> String {
    let sorted: BTreeSet<&String> = keywords.into_iter().collect();
    let mut hasher = Sha256::new();
    for (i, kw) in sorted.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(kw.as_bytes());
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(18);
    out.push_str("trend-");
    for b in digest.iter().take(6) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Every trend the pipeline knows about, bounded by count and by age.
#[derive(Debug)]
pub struct TrendRegistry {
    trends: BTreeMap<String, Trend>,
    max_trends: usize,
    retention: Duration,
}

impl TrendRegistry {
    pub fn new(max_trends: usize, retention: Duration) -> Self {
        Self {
            trends: BTreeMap::new(),
            max_trends: max_trends.max(1),
            retention,
        }
    }

    pub fn len(&self) -> usize {
        self.trends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trends.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.trends.values().filter(|t| t.stage.is_active()).count()
    }

    pub fn get(&self, trend_id: &str) -> Option<&Trend> {
        self.trends.get(trend_id)
    }

    pub fn get_mut(&mut self, trend_id: &str) -> Option<&mut Trend> {
        self.trends.get_mut(trend_id)
    }

    /// Live trend whose core contains `keyword`. A trend anchored on it wins,
    /// then the highest score.
    pub fn find_live(&self, keyword: &str) -> Option<&Trend> {
        self.trends
            .values()
            .filter(|t| t.stage.is_active() && t.contains(keyword))
            .max_by(|a, b| {
                (a.anchor == keyword)
                    .cmp(&(b.anchor == keyword))
                    .then(a.emergence_score.total_cmp(&b.emergence_score))
                    .then(b.trend_id.cmp(&a.trend_id))
            })
    }

    /// Id for a new trend over `keywords`: the cluster fingerprint, with a
    /// generation suffix if an earlier trend of the same cluster is still held.
    pub fn allocate_id(&self, keywords: &BTreeSet<String>) -> String {
        let base = fingerprint(keywords);
        if !self.trends.contains_key(&base) {
            return base;
        }
        (2u32..)
            .map(|gen| format!("{base}-g{gen}"))
            .find(|id| !self.trends.contains_key(id))
            .unwrap_or(base)
    }

    pub fn insert(&mut self, trend: Trend) {
        debug!(target: "trends", trend_id = %trend.trend_id, anchor = %trend.anchor, "trend created");
        self.trends.insert(trend.trend_id.clone(), trend);
    }

    /// Ids of all non-dormant trends, in id order.
    pub fn live_ids(&self) -> Vec<String> {
        self.trends
            .values()
            .filter(|t| t.stage.is_active())
            .map(|t| t.trend_id.clone())
            .collect()
    }

    /// Anchor keywords of all non-dormant trends.
    pub fn live_anchors(&self) -> BTreeSet<String> {
        self.trends
            .values()
            .filter(|t| t.stage.is_active())
            .map(|t| t.anchor.clone())
            .collect()
    }

    /// Drop dormant trends past the retention horizon, then enforce the size cap
    /// (dormant first, oldest first; then lowest score). Returns removed ids.
    pub fn purge(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .trends
            .values()
            .filter(|t| t.stage == TrendStage::Dormant && now - t.stage_entered_at >= self.retention)
            .map(|t| t.trend_id.clone())
            .collect();
        for id in &expired {
            self.trends.remove(id);
        }

        let mut removed = expired;
        if self.trends.len() > self.max_trends {
            let mut order: Vec<(&String, &Trend)> = self.trends.iter().collect();
            order.sort_by(|a, b| {
                a.1.stage
                    .is_active()
                    .cmp(&b.1.stage.is_active())
                    .then(if a.1.stage.is_active() {
                        a.1.emergence_score.total_cmp(&b.1.emergence_score)
                    } else {
                        a.1.stage_entered_at.cmp(&b.1.stage_entered_at)
                    })
                    .then(a.0.cmp(b.0))
            });
            let excess = self.trends.len() - self.max_trends;
            let victims: Vec<String> = order.into_iter().take(excess).map(|(id, _)| id.clone()).collect();
            for id in victims {
                self.trends.remove(&id);
                removed.push(id);
            }
        }
        if !removed.is_empty() {
            debug!(target: "trends", removed = removed.len(), "trends purged");
        }
        removed
    }

    /// Non-dormant trends, highest emergence score first.
    pub fn list_active(&self) -> Vec<Trend> {
        let mut out: Vec<Trend> = self
            .trends
            .values()
            .filter(|t| t.stage.is_active())
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.emergence_score
                .total_cmp(&a.emergence_score)
                .then(a.trend_id.cmp(&b.trend_id))
        });
        out
    }

    /// Every held trend including dormant ones, in id order.
    pub fn all(&self) -> Vec<Trend> {
        self.trends.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_006_400, 0).unwrap()
    }

    fn kws(words: &[&str]) -> BTreeSet<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    fn trend(reg: &TrendRegistry, words: &[&str], score: f64) -> Trend {
        let set = kws(words);
        let mut t = Trend::new(reg.allocate_id(&set), words[0], set, now(), now());
        t.emergence_score = score;
        t
    }

    #[test]
    fn fingerprint_ignores_order_and_is_short() {
        let a = fingerprint(&kws(&["rust", "async", "tokio"]));
        let b = fingerprint(&["tokio".to_string(), "rust".to_string(), "async".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), "trend-".len() + 12);
        assert_ne!(a, fingerprint(&kws(&["rust", "async"])));
    }

    #[test]
    fn resurgence_gets_a_new_id() {
        let mut reg = TrendRegistry::new(16, Duration::hours(24));
        let mut first = trend(&reg, &["llm", "agents"], 0.4);
        first.enter(TrendStage::Dormant, now());
        let first_id = first.trend_id.clone();
        reg.insert(first);
        let second = trend(&reg, &["llm", "agents"], 0.2);
        assert_ne!(second.trend_id, first_id);
        assert!(second.trend_id.starts_with(&first_id));
    }

    #[test]
    fn list_active_sorts_by_score_and_hides_dormant() {
        let mut reg = TrendRegistry::new(16, Duration::hours(24));
        reg.insert(trend(&reg, &["a"], 0.2));
        reg.insert(trend(&reg, &["b"], 0.9));
        let mut d = trend(&reg, &["c"], 1.0);
        d.stage = TrendStage::Dormant;
        reg.insert(d);
        let scores: Vec<f64> = reg.list_active().iter().map(|t| t.emergence_score).collect();
        assert_eq!(scores, vec![0.9, 0.2]);
        assert_eq!(reg.all().len(), 3);
        assert_eq!(reg.active_count(), 2);
    }

    #[test]
    fn find_live_prefers_anchor_match() {
        let mut reg = TrendRegistry::new(16, Duration::hours(24));
        reg.insert(trend(&reg, &["rust", "wasm"], 0.9));
        reg.insert(trend(&reg, &["wasm", "browser"], 0.1));
        assert_eq!(reg.find_live("wasm").unwrap().anchor, "wasm");
        assert!(reg.find_live("python").is_none());
    }

    #[test]
    fn purge_removes_expired_dormant_then_caps_size() {
        let mut reg = TrendRegistry::new(2, Duration::hours(1));
        let mut d = trend(&reg, &["old"], 0.5);
        d.enter(TrendStage::Dormant, now());
        reg.insert(d);
        reg.insert(trend(&reg, &["a"], 0.3));
        reg.insert(trend(&reg, &["b"], 0.1));
        reg.insert(trend(&reg, &["c"], 0.7));

        // dormant not yet expired: it is still the first to go for capacity
        let removed = reg.purge(now() + Duration::minutes(30));
        assert_eq!(removed.len(), 2);
        let left: Vec<String> = reg.all().into_iter().map(|t| t.anchor).collect();
        assert_eq!(left.len(), 2);
        assert!(left.contains(&"a".to_string()) && left.contains(&"c".to_string()));
    }
}
