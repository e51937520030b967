//! # Rolling Windows
//! Concurrently-updated time windows of credibility-weighted engagement.
//!
//! Each window keeps its signals in timestamp order and evicts everything older
//! than `now - size` on every insert, so memory stays bounded without a
//! separate sweeper. Mean/variance are maintained with Welford's update (and
//! its inverse on eviction); bucket sums and per-keyword aggregates are
//! maintained the same way, so a snapshot never rescans raw signals.
//!
//! Writes to one window are serialized by its lock; any number of readers can
//! take snapshots concurrently. A snapshot is an owned, immutable copy.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use crate::config::WindowSpec;
use crate::signal::{Platform, Signal};

/// Max buckets materialized in one snapshot series.
const MAX_SERIES_BUCKETS: i64 = 50_000;
/// Co-occurring keywords carried per keyword in a snapshot.
const MAX_CO_KEYWORDS: usize = 8;

/// Running mean/variance with O(1) insert and remove.
#[derive(Debug, Clone, Copy, Default)]
struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
    sum: f64,
}

impl Welford {
    fn add(&mut self, x: f64) {
        self.count += 1;
        self.sum += x;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn remove(&mut self, x: f64) {
        if self.count <= 1 {
            *self = Self::default();
            return;
        }
        let n = self.count as f64;
        let mean_new = (n * self.mean - x) / (n - 1.0);
        self.m2 = (self.m2 - (x - self.mean) * (x - mean_new)).max(0.0);
        self.mean = mean_new;
        self.sum -= x;
        self.count -= 1;
    }

    /// Sample variance; 0 below two samples.
    fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    ts: DateTime<Utc>,
    bucket: i64,
    weighted: f64,
    credibility: f64,
    source: Platform,
    keywords: Arc<[String]>,
}

#[derive(Debug, Clone)]
struct KeywordAgg {
    count: u64,
    weighted_sum: f64,
    credibility_sum: f64,
    last_seen: DateTime<Utc>,
    sources: BTreeMap<Platform, u64>,
    buckets: BTreeMap<i64, f64>,
    co: HashMap<String, u64>,
}

impl KeywordAgg {
    fn new(ts: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            weighted_sum: 0.0,
            credibility_sum: 0.0,
            last_seen: ts,
            sources: BTreeMap::new(),
            buckets: BTreeMap::new(),
            co: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct WindowState {
    entries: VecDeque<Entry>,
    stats: Welford,
    buckets: BTreeMap<i64, f64>,
    keywords: HashMap<String, KeywordAgg>,
    total_ingested: u64,
    total_evicted: u64,
    expired_on_arrival: u64,
}

impl WindowState {
    fn insert(&mut self, e: Entry) {
        self.account(&e);
        // keep timestamp order; equal timestamps stay in arrival order
        let idx = self.entries.partition_point(|x| x.ts <= e.ts);
        self.entries.insert(idx, e);
        self.total_ingested += 1;
    }

    /// Fold one entry into the running aggregates.
    fn account(&mut self, e: &Entry) {
        self.stats.add(e.weighted);
        *self.buckets.entry(e.bucket).or_insert(0.0) += e.weighted;
        for (i, kw) in e.keywords.iter().enumerate() {
            let agg = self
                .keywords
                .entry(kw.clone())
                .or_insert_with(|| KeywordAgg::new(e.ts));
            agg.count += 1;
            agg.weighted_sum += e.weighted;
            agg.credibility_sum += e.credibility;
            if e.ts > agg.last_seen {
                agg.last_seen = e.ts;
            }
            *agg.sources.entry(e.source).or_insert(0) += 1;
            *agg.buckets.entry(e.bucket).or_insert(0.0) += e.weighted;
            for (j, other) in e.keywords.iter().enumerate() {
                if i != j {
                    *agg.co.entry(other.clone()).or_insert(0) += 1;
                }
            }
        }
    }

    /// The running sums overflowed at some point. Once the offending entries
    /// are gone the inverse updates cannot recover, so recompute from scratch.
    fn is_poisoned(&self) -> bool {
        !(self.stats.sum.is_finite() && self.stats.mean.is_finite() && self.stats.m2.is_finite())
            || self.buckets.values().any(|v| !v.is_finite())
    }

    fn rebuild(&mut self) {
        self.stats = Welford::default();
        self.buckets.clear();
        self.keywords.clear();
        let entries = std::mem::take(&mut self.entries);
        for e in &entries {
            self.account(e);
        }
        self.entries = entries;
    }

    fn remove_front(&mut self) -> Option<Entry> {
        let e = self.entries.pop_front()?;
        self.stats.remove(e.weighted);
        subtract_bucket(&mut self.buckets, e.bucket, e.weighted);
        for (i, kw) in e.keywords.iter().enumerate() {
            let Some(agg) = self.keywords.get_mut(kw) else {
                continue;
            };
            agg.count = agg.count.saturating_sub(1);
            if agg.count == 0 {
                self.keywords.remove(kw);
                continue;
            }
            agg.weighted_sum -= e.weighted;
            agg.credibility_sum -= e.credibility;
            if let Some(n) = agg.sources.get_mut(&e.source) {
                *n -= 1;
                if *n == 0 {
                    agg.sources.remove(&e.source);
                }
            }
            subtract_bucket(&mut agg.buckets, e.bucket, e.weighted);
            for (j, other) in e.keywords.iter().enumerate() {
                if i == j {
                    continue;
                }
                if let Some(n) = agg.co.get_mut(other) {
                    *n -= 1;
                    if *n == 0 {
                        agg.co.remove(other);
                    }
                }
            }
        }
        self.total_evicted += 1;
        Some(e)
    }

    fn evict(&mut self, cutoff: DateTime<Utc>, max_signals: usize) -> usize {
        let mut evicted = 0;
        while self.entries.front().is_some_and(|e| e.ts < cutoff) {
            self.remove_front();
            evicted += 1;
        }
        while self.entries.len() > max_signals {
            self.remove_front();
            evicted += 1;
        }
        if evicted > 0 && self.is_poisoned() {
            self.rebuild();
            trace!(target: "rolling", entries = self.entries.len(), "aggregates rebuilt after overflow");
        }
        evicted
    }
}

fn subtract_bucket(buckets: &mut BTreeMap<i64, f64>, bucket: i64, value: f64) {
    // the bucket disappears with its last entry, which also clears float residue
    if let Some(v) = buckets.get_mut(&bucket) {
        *v -= value;
        if v.abs() < 1e-9 {
            buckets.remove(&bucket);
        }
    }
}

/// Aggregate view of one keyword inside a window snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordStats {
    pub keyword: String,
    pub count: u64,
    pub weighted_sum: f64,
    /// Mean frozen credibility weight of the signals carrying this keyword.
    pub mean_credibility: f64,
    pub last_seen: DateTime<Utc>,
    pub sources: BTreeMap<Platform, u64>,
    /// Weighted engagement per bucket, aligned with `WindowStats::series`.
    pub series: Vec<f64>,
    /// Most frequent co-occurring keywords, highest first.
    pub co_keywords: Vec<(String, u64)>,
}

/// Immutable point-in-time statistics of one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStats {
    pub name: String,
    pub size_secs: i64,
    pub bucket_secs: i64,
    pub as_of: DateTime<Utc>,
    pub count: u64,
    pub weighted_sum: f64,
    pub mean: f64,
    pub variance: f64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// Start of the first bucket in `series`.
    pub series_start: Option<DateTime<Utc>>,
    /// Weighted engagement per bucket, oldest first, up to the bucket holding `as_of`.
    pub series: Vec<f64>,
    /// Last bucket of `series` was still open at `as_of`.
    pub partial_tail: bool,
    pub keywords: Vec<KeywordStats>,
    pub total_ingested: u64,
    pub total_evicted: u64,
}

impl WindowStats {
    /// Well-defined zero stats for an empty window.
    pub fn empty(spec: &WindowSpec, as_of: DateTime<Utc>) -> Self {
        Self {
            name: spec.name.clone(),
            size_secs: spec.size_secs,
            bucket_secs: spec.bucket_secs,
            as_of,
            count: 0,
            weighted_sum: 0.0,
            mean: 0.0,
            variance: 0.0,
            oldest: None,
            newest: None,
            series_start: None,
            series: Vec::new(),
            partial_tail: false,
            keywords: Vec::new(),
            total_ingested: 0,
            total_evicted: 0,
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    pub fn bucket_width(&self) -> Duration {
        Duration::seconds(self.bucket_secs)
    }

    /// Series without the still-open tail bucket.
    pub fn complete_series(&self) -> &[f64] {
        if self.partial_tail && !self.series.is_empty() {
            &self.series[..self.series.len() - 1]
        } else {
            &self.series
        }
    }

    /// Start time of bucket `idx` of `series`.
    pub fn bucket_start(&self, idx: usize) -> Option<DateTime<Utc>> {
        self.series_start
            .map(|s| s + Duration::seconds(self.bucket_secs * idx as i64))
    }

    /// Index into `series` of the bucket containing `ts`.
    pub fn bucket_index(&self, ts: DateTime<Utc>) -> Option<usize> {
        let start = self.series_start?;
        let offset = (ts - start).num_seconds();
        if offset < 0 {
            return None;
        }
        let idx = (offset / self.bucket_secs) as usize;
        (idx < self.series.len()).then_some(idx)
    }

    pub fn keyword(&self, kw: &str) -> Option<&KeywordStats> {
        self.keywords.iter().find(|k| k.keyword == kw)
    }
}

/// One named window.
#[derive(Debug)]
pub struct RollingWindow {
    spec: WindowSpec,
    top_keywords: usize,
    inner: RwLock<WindowState>,
}

impl RollingWindow {
    pub fn new(spec: WindowSpec, top_keywords: usize) -> Self {
        Self {
            spec,
            top_keywords,
            inner: RwLock::new(WindowState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &WindowSpec {
        &self.spec
    }

    fn bucket_of(&self, ts: DateTime<Utc>) -> i64 {
        ts.timestamp().div_euclid(self.spec.bucket_secs)
    }

    fn read(&self) -> RwLockReadGuard<'_, WindowState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, WindowState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert one signal and evict what fell out of the window.
    /// Returns `false` if the signal was already older than the window.
    pub fn ingest(&self, signal: &Signal, keywords: &Arc<[String]>, now: DateTime<Utc>) -> bool {
        let cutoff = now - self.spec.size();
        let mut st = self.write();
        if signal.timestamp < cutoff {
            st.expired_on_arrival += 1;
            return false;
        }
        st.insert(Entry {
            ts: signal.timestamp,
            bucket: self.bucket_of(signal.timestamp),
            weighted: signal.weighted_engagement(),
            credibility: signal.credibility_weight,
            source: signal.source,
            keywords: keywords.clone(),
        });
        let evicted = st.evict(cutoff, self.spec.max_signals);
        if evicted > 0 {
            trace!(target: "rolling", window = %self.spec.name, evicted, "evicted on insert");
        }
        true
    }

    /// Expire entries of a window that has not seen an insert for a while.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.spec.size();
        let mut st = self.write();
        st.evict(cutoff, self.spec.max_signals)
    }

    pub fn count(&self) -> u64 {
        self.read().stats.count
    }

    pub fn expired_on_arrival(&self) -> u64 {
        self.read().expired_on_arrival
    }

    /// Consistent, owned snapshot of the window as of `now`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> WindowStats {
        self.snapshot_pinned(now, &BTreeSet::new())
    }

    /// Like [`Self::snapshot`], but keywords in `pinned` are reported even when
    /// they fall outside the top-N ranking.
    pub fn snapshot_pinned(&self, now: DateTime<Utc>, pinned: &BTreeSet<String>) -> WindowStats {
        let st = self.read();
        let Some(oldest) = st.entries.front() else {
            let mut empty = WindowStats::empty(&self.spec, now);
            empty.total_ingested = st.total_ingested;
            empty.total_evicted = st.total_evicted;
            return empty;
        };
        let newest = st.entries.back().map(|e| e.ts);

        let last = self.bucket_of(now).max(st.entries.back().map_or(i64::MIN, |e| e.bucket));
        let first = oldest.bucket.max(last - MAX_SERIES_BUCKETS + 1);
        let len = (last - first + 1) as usize;
        let series = materialize(&st.buckets, first, len);
        let tail_end = Utc
            .timestamp_opt((last + 1) * self.spec.bucket_secs, 0)
            .single();
        let partial_tail = tail_end.is_some_and(|end| now < end);

        let mut ranked: Vec<(&String, &KeywordAgg)> = st.keywords.iter().collect();
        ranked.sort_by(|a, b| {
            b.1.count
                .cmp(&a.1.count)
                .then(b.1.weighted_sum.total_cmp(&a.1.weighted_sum))
                .then(a.0.cmp(b.0))
        });
        let extra: Vec<(&String, &KeywordAgg)> = ranked
            .iter()
            .skip(self.top_keywords)
            .filter(|(kw, _)| pinned.contains(*kw))
            .copied()
            .collect();
        let keywords = ranked
            .into_iter()
            .take(self.top_keywords)
            .chain(extra)
            .map(|(kw, agg)| {
                let mut co: Vec<(String, u64)> =
                    agg.co.iter().map(|(k, n)| (k.clone(), *n)).collect();
                co.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
                co.truncate(MAX_CO_KEYWORDS);
                KeywordStats {
                    keyword: kw.clone(),
                    count: agg.count,
                    weighted_sum: agg.weighted_sum,
                    mean_credibility: (agg.credibility_sum / agg.count as f64).clamp(0.0, 1.0),
                    last_seen: agg.last_seen,
                    sources: agg.sources.clone(),
                    series: materialize(&agg.buckets, first, len),
                    co_keywords: co,
                }
            })
            .collect();

        WindowStats {
            name: self.spec.name.clone(),
            size_secs: self.spec.size_secs,
            bucket_secs: self.spec.bucket_secs,
            as_of: now,
            count: st.stats.count,
            weighted_sum: st.stats.sum,
            mean: st.stats.mean,
            variance: st.stats.variance(),
            oldest: Some(oldest.ts),
            newest,
            series_start: Utc.timestamp_opt(first * self.spec.bucket_secs, 0).single(),
            series,
            partial_tail,
            keywords,
            total_ingested: st.total_ingested,
            total_evicted: st.total_evicted,
        }
    }
}

fn materialize(buckets: &BTreeMap<i64, f64>, first: i64, len: usize) -> Vec<f64> {
    let mut out = vec![0.0; len];
    for (b, v) in buckets.range(first..first + len as i64) {
        out[(b - first) as usize] = v.max(0.0);
    }
    out
}

/// All configured windows; routes every signal to each of them.
#[derive(Debug)]
pub struct WindowAggregator {
    windows: Vec<RollingWindow>,
}

impl WindowAggregator {
    pub fn new(specs: &[WindowSpec], top_keywords: usize) -> Self {
        Self {
            windows: specs
                .iter()
                .cloned()
                .map(|s| RollingWindow::new(s, top_keywords))
                .collect(),
        }
    }

    /// Route `signal` into every window. Returns how many windows kept it.
    pub fn ingest(&self, signal: &Signal, now: DateTime<Utc>) -> usize {
        let keywords: Arc<[String]> = signal.keywords.iter().cloned().collect();
        self.windows
            .iter()
            .filter(|w| w.ingest(signal, &keywords, now))
            .count()
    }

    pub fn snapshot(&self, name: &str, now: DateTime<Utc>) -> Option<WindowStats> {
        self.window(name).map(|w| w.snapshot(now))
    }

    pub fn snapshot_all(&self, now: DateTime<Utc>) -> Vec<WindowStats> {
        self.snapshot_all_pinned(now, &BTreeSet::new())
    }

    /// Snapshots of every window that always carry the `pinned` keywords.
    pub fn snapshot_all_pinned(&self, now: DateTime<Utc>, pinned: &BTreeSet<String>) -> Vec<WindowStats> {
        self.windows
            .iter()
            .map(|w| w.snapshot_pinned(now, pinned))
            .collect()
    }

    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        self.windows.iter().map(|w| w.evict_expired(now)).sum()
    }

    /// `(name, count)` per window, in configuration order.
    pub fn counts(&self) -> Vec<(String, u64)> {
        self.windows
            .iter()
            .map(|w| (w.name().to_string(), w.count()))
            .collect()
    }

    pub fn window(&self, name: &str) -> Option<&RollingWindow> {
        self.windows.iter().find(|w| w.name() == name)
    }

    pub fn windows(&self) -> &[RollingWindow] {
        &self.windows
    }
}
