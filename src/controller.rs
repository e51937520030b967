//! # Pipeline Controller
//!
//! Owns every component and the trend registry, and is the only way in.
//!
//! - `start()` spawns one ingest worker (the single writer lane into the
//!   windows) and one detection ticker. Both are idempotent to call again.
//! - Feeds push raw items into a bounded queue; a feed that does not yield
//!   within its read timeout is treated as temporarily exhausted.
//! - Detection passes run on their own cadence over immutable window
//!   snapshots; the registry is only mutated inside the pass's critical section.
//! - `stop()` cancels feeds and the ticker, drains the queue up to a deadline,
//!   then discards and counts the rest.
//!
//! States: `Stopped -> Running -> Draining -> Stopped`.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::anomaly::{AnomalyDetector, AnomalyEvent, Baseline};
use crate::config::{IngestConfig, PipelineConfig};
use crate::credibility::{CredibilityProfile, CredibilityWeighter};
use crate::emergence::EmergenceScorer;
use crate::error::{ControllerStateError, DetectionPassFailure, RejectReason, RejectedInput, SourceFeedTimeout};
use crate::ingest::dedup::RecentDedup;
use crate::ingest::feed::SourceFeed;
use crate::ingest::{self, content_id};
use crate::metrics as m;
use crate::pattern::{Pattern, PatternDetector};
use crate::rolling::{WindowAggregator, WindowStats};
use crate::signal::{Platform, RawContentItem};
use crate::trends::{Trend, TrendRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Stopped,
    Running,
    Draining,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Stopped => "stopped",
            ControllerState::Running => "running",
            ControllerState::Draining => "draining",
        }
    }
}

/// Point-in-time view of the pipeline. All counters come from one locked read.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub state: ControllerState,
    pub uptime_secs: f64,
    pub events_processed: u64,
    pub events_rejected: u64,
    pub rejected_by_reason: BTreeMap<String, u64>,
    pub feed_timeouts: u64,
    pub feed_errors: u64,
    /// Processed events per second of uptime.
    pub processing_rate: f64,
    pub window_counts: BTreeMap<String, u64>,
    /// Trends created since construction.
    pub trends_detected: u64,
    pub active_trends: u64,
    /// Distinct anomalous buckets reported.
    pub anomalies_found: u64,
    pub detection_passes: u64,
    pub detection_failures: u64,
    /// Mean enqueue-to-window latency in milliseconds.
    pub avg_latency_ms: f64,
    pub dropped_on_stop: u64,
}

/// Outcome of one `stop()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Items processed while draining.
    pub drained: u64,
    /// Items discarded when the drain deadline passed.
    pub dropped: u64,
    pub timed_out: bool,
}

/// Outcome of pulling one feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub feed: String,
    pub enqueued: u64,
    pub feed_errors: u64,
    /// The feed stalled past its read timeout and was set aside.
    pub timed_out: bool,
}

/// What one detection pass saw and did.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionPassSummary {
    pub at: DateTime<Utc>,
    pub evicted: usize,
    pub patterns: Vec<Pattern>,
    /// Anomalies not reported by an earlier pass.
    pub new_anomalies: Vec<AnomalyEvent>,
    pub failures: Vec<String>,
    pub trends_updated: usize,
    pub trends_created: usize,
    pub active_trends: usize,
    pub duration_ms: f64,
}

#[derive(Debug)]
struct Queued {
    item: RawContentItem,
    enqueued: Instant,
}

#[derive(Debug)]
struct Stats {
    state: ControllerState,
    started_at: Option<Instant>,
    /// Uptime of the last finished run, shown while stopped.
    last_uptime: Duration,
    processed: u64,
    rejected: u64,
    rejected_by_reason: BTreeMap<&'static str, u64>,
    feed_timeouts: u64,
    feed_errors: u64,
    trends_detected: u64,
    active_trends: u64,
    anomalies_found: u64,
    detection_passes: u64,
    detection_failures: u64,
    latency_sum_ms: f64,
    latency_samples: u64,
    dropped_on_stop: u64,
    /// Newest anomalous bucket already counted, per window.
    last_anomaly: HashMap<String, DateTime<Utc>>,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            state: ControllerState::Stopped,
            started_at: None,
            last_uptime: Duration::ZERO,
            processed: 0,
            rejected: 0,
            rejected_by_reason: BTreeMap::new(),
            feed_timeouts: 0,
            feed_errors: 0,
            trends_detected: 0,
            active_trends: 0,
            anomalies_found: 0,
            detection_passes: 0,
            detection_failures: 0,
            latency_sum_ms: 0.0,
            latency_samples: 0,
            dropped_on_stop: 0,
            last_anomaly: HashMap::new(),
        }
    }
}

/// Everything the background tasks share.
struct Shared {
    ingest_cfg: IngestConfig,
    trend_window: String,
    pass_history: usize,
    weighter: CredibilityWeighter,
    windows: WindowAggregator,
    patterns: PatternDetector,
    anomalies: AnomalyDetector,
    baseline: Baseline,
    scorer: EmergenceScorer,
    registry: Mutex<TrendRegistry>,
    passes: Mutex<VecDeque<DetectionPassSummary>>,
    stats: Mutex<Stats>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn state(&self) -> ControllerState {
        lock(&self.stats).state
    }

    fn process(&self, q: Queued, dedup: &mut RecentDedup) {
        let now = Utc::now();
        let normalized = match ingest::normalize(&q.item, now, &self.ingest_cfg) {
            Ok(n) => n,
            Err(rejected) => {
                self.reject(&rejected, &q.item.content);
                return;
            }
        };
        if dedup.check_and_remember(normalized.source, &normalized.content, now) {
            let rejected = RejectedInput {
                platform: normalized.source,
                reason: RejectReason::Duplicate,
            };
            self.reject(&rejected, &normalized.content);
            return;
        }

        let weight = self.weighter.weight_for_signal(normalized.source, now);
        let signal = normalized.into_signal(weight);
        let kept = self.windows.ingest(&signal, now);
        let latency_ms = q.enqueued.elapsed().as_secs_f64() * 1_000.0;

        counter!(m::SIGNALS_INGESTED).increment(1);
        histogram!(m::INGEST_LATENCY_MS).record(latency_ms);
        {
            let mut st = lock(&self.stats);
            st.processed += 1;
            st.latency_sum_ms += latency_ms;
            st.latency_samples += 1;
        }
        trace!(
            target: "ingest",
            source = %signal.source,
            content_id = %content_id(&signal.content),
            weighted = signal.weighted_engagement(),
            windows = kept,
            "signal ingested"
        );
    }

    fn reject(&self, rejected: &RejectedInput, content: &str) {
        let label = rejected.reason.label();
        counter!(m::SIGNALS_REJECTED, "reason" => label).increment(1);
        {
            let mut st = lock(&self.stats);
            st.rejected += 1;
            *st.rejected_by_reason.entry(label).or_insert(0) += 1;
        }
        debug!(
            target: "ingest",
            source = %rejected.platform,
            content_id = %content_id(content),
            reason = %rejected.reason,
            "input rejected"
        );
    }

    fn detection_pass(&self, now: DateTime<Utc>) -> DetectionPassSummary {
        let started = Instant::now();
        let evicted = self.windows.evict_expired(now);
        // live anchors must stay visible even when they drop out of the top keywords
        let anchors = lock(&self.registry).live_anchors();
        let snapshots: Vec<WindowStats> = self.windows.snapshot_all_pinned(now, &anchors);

        let mut patterns = Vec::new();
        let mut anomalies = Vec::new();
        let mut failures: Vec<DetectionPassFailure> = Vec::new();
        for snap in &snapshots {
            let found = self.patterns.detect(snap).and_then(|p| {
                self.anomalies
                    .detect(snap, &self.baseline)
                    .map(|a| (p, a))
            });
            match found {
                Ok((p, a)) => {
                    patterns.extend(p);
                    anomalies.extend(a);
                }
                Err(error) => failures.push(DetectionPassFailure {
                    window: snap.name.clone(),
                    error,
                }),
            }
        }

        // critical section: the only place the registry is written
        let (updated, active) = {
            let mut registry = lock(&self.registry);
            let updated = match self.scorer.update(
                &patterns,
                &anomalies,
                &snapshots,
                &mut registry,
                &self.weighter,
                now,
            ) {
                Ok(updated) => updated,
                Err(error) => {
                    failures.push(DetectionPassFailure {
                        window: self.trend_window.clone(),
                        error,
                    });
                    Vec::new()
                }
            };
            (updated, registry.active_count())
        };
        let created = updated.iter().filter(|t| t.first_seen == now).count();

        for f in &failures {
            warn!(target: "detect", window = %f.window, error = %f.error, "detection failed for window");
        }

        let new_anomalies = {
            let mut st = lock(&self.stats);
            let mut fresh = Vec::new();
            for a in anomalies {
                let last = st.last_anomaly.get(&a.window_ref).copied();
                if last.map_or(true, |l| a.timestamp > l) {
                    fresh.push(a);
                }
            }
            for a in &fresh {
                let e = st.last_anomaly.entry(a.window_ref.clone()).or_insert(a.timestamp);
                if a.timestamp > *e {
                    *e = a.timestamp;
                }
            }
            st.detection_passes += 1;
            st.detection_failures += failures.len() as u64;
            st.anomalies_found += fresh.len() as u64;
            st.trends_detected += created as u64;
            st.active_trends = active as u64;
            fresh
        };

        counter!(m::DETECTION_PASSES).increment(1);
        counter!(m::DETECTION_FAILURES).increment(failures.len() as u64);
        counter!(m::ANOMALIES).increment(new_anomalies.len() as u64);
        gauge!(m::ACTIVE_TRENDS).set(active as f64);

        let summary = DetectionPassSummary {
            at: now,
            evicted,
            patterns,
            new_anomalies,
            failures: failures.iter().map(|f| f.to_string()).collect(),
            trends_updated: updated.len(),
            trends_created: created,
            active_trends: active,
            duration_ms: started.elapsed().as_secs_f64() * 1_000.0,
        };
        debug!(
            target: "detect",
            patterns = summary.patterns.len(),
            anomalies = summary.new_anomalies.len(),
            failures = summary.failures.len(),
            trends = summary.trends_updated,
            active = summary.active_trends,
            "detection pass"
        );

        let mut passes = lock(&self.passes);
        passes.push_back(summary.clone());
        while passes.len() > self.pass_history {
            passes.pop_front();
        }
        summary
    }
}

/// Handles owned by one running session.
#[derive(Default)]
struct Runtime {
    tx: Option<mpsc::Sender<Queued>>,
    cancel: Option<CancellationToken>,
    abort: Option<CancellationToken>,
    worker: Option<JoinHandle<u64>>,
    ticker: Option<JoinHandle<()>>,
    feeds: Vec<JoinHandle<IngestReport>>,
    last_drain: Option<DrainReport>,
}

pub struct PipelineController {
    shared: Arc<Shared>,
    runtime: tokio::sync::Mutex<Runtime>,
    queue_capacity: usize,
    detection_interval: Duration,
    drain_timeout: Duration,
    feed_read_timeout: Duration,
}

impl PipelineController {
    /// Build every component from `cfg`. Construction order: credibility
    /// weighter, window aggregator, detectors, registry.
    pub fn new(cfg: PipelineConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        m::ensure_metrics_described();

        let weighter = CredibilityWeighter::new(&cfg.credibility);
        let windows = WindowAggregator::new(&cfg.windows.0, cfg.emergence.top_keywords);
        let patterns = PatternDetector::new(&cfg.pattern);
        let anomalies = AnomalyDetector::new(&cfg.anomaly);
        let baseline = Baseline::from_config(&cfg.anomaly);
        let scorer = EmergenceScorer::new(&cfg.emergence);
        let registry = TrendRegistry::new(cfg.emergence.max_trends, cfg.emergence.retention_horizon());

        let shared = Shared {
            ingest_cfg: cfg.ingest.clone(),
            trend_window: cfg.emergence.trend_window.clone(),
            pass_history: cfg.controller.pass_history.max(1),
            weighter,
            windows,
            patterns,
            anomalies,
            baseline,
            scorer,
            registry: Mutex::new(registry),
            passes: Mutex::new(VecDeque::new()),
            stats: Mutex::new(Stats::default()),
        };
        Ok(Self {
            shared: Arc::new(shared),
            runtime: tokio::sync::Mutex::new(Runtime::default()),
            queue_capacity: cfg.ingest.queue_capacity,
            detection_interval: Duration::from_secs(cfg.controller.detection_interval_secs.max(1)),
            drain_timeout: Duration::from_millis(cfg.controller.drain_timeout_ms),
            feed_read_timeout: Duration::from_millis(cfg.controller.feed_read_timeout_ms.max(1)),
        })
    }

    pub fn state(&self) -> ControllerState {
        self.shared.state()
    }

    /// Spawn the ingest worker and the detection ticker. No-op when already running.
    pub async fn start(&self) {
        let mut rt = self.runtime.lock().await;
        {
            let mut st = lock(&self.shared.stats);
            if st.state != ControllerState::Stopped {
                debug!(target: "controller", state = st.state.as_str(), "start ignored");
                return;
            }
            st.state = ControllerState::Running;
            st.started_at = Some(Instant::now());
        }

        let (tx, rx) = mpsc::channel(self.queue_capacity.max(1));
        let cancel = CancellationToken::new();
        let abort = CancellationToken::new();
        let dedup = RecentDedup::new(
            chrono::Duration::seconds(self.shared.ingest_cfg.dedup_window_secs),
            self.shared.ingest_cfg.dedup_capacity,
        );

        rt.worker = Some(tokio::spawn(ingest_worker(
            self.shared.clone(),
            rx,
            abort.clone(),
            dedup,
        )));
        rt.ticker = Some(tokio::spawn(detection_ticker(
            self.shared.clone(),
            self.detection_interval,
            cancel.clone(),
        )));
        rt.tx = Some(tx);
        rt.cancel = Some(cancel);
        rt.abort = Some(abort);
        rt.last_drain = None;

        info!(
            target: "controller",
            interval_secs = self.detection_interval.as_secs(),
            queue = self.queue_capacity,
            "pipeline started"
        );
    }

    /// Stop feeds and detection, drain the queue up to the drain timeout, then
    /// discard what is left. Calling it again returns the same report.
    pub async fn stop(&self) -> DrainReport {
        let mut rt = self.runtime.lock().await;
        let processed_before = {
            let mut st = lock(&self.shared.stats);
            if st.state != ControllerState::Running {
                return rt.last_drain.clone().unwrap_or_default();
            }
            st.state = ControllerState::Draining;
            st.processed
        };
        info!(target: "controller", "pipeline draining");

        if let Some(cancel) = rt.cancel.take() {
            cancel.cancel();
        }
        // closing our sender lets the worker finish once feeds have let go
        rt.tx.take();
        for feed in rt.feeds.drain(..) {
            if let Ok(report) = feed.await {
                debug!(target: "controller", feed = %report.feed, enqueued = report.enqueued, "feed stopped");
            }
        }
        if let Some(ticker) = rt.ticker.take() {
            let _ = ticker.await;
        }

        let mut report = DrainReport::default();
        if let Some(mut worker) = rt.worker.take() {
            let dropped = match tokio::time::timeout(self.drain_timeout, &mut worker).await {
                Ok(res) => res.unwrap_or(0),
                Err(_) => {
                    report.timed_out = true;
                    if let Some(abort) = rt.abort.as_ref() {
                        abort.cancel();
                    }
                    worker.await.unwrap_or(0)
                }
            };
            report.dropped = dropped;
        }
        rt.abort.take();

        {
            let mut st = lock(&self.shared.stats);
            report.drained = st.processed.saturating_sub(processed_before);
            st.dropped_on_stop += report.dropped;
            st.last_uptime = st.started_at.take().map(|s| s.elapsed()).unwrap_or_default();
            st.state = ControllerState::Stopped;
        }
        counter!(m::DROPPED_ON_STOP).increment(report.dropped);
        if report.dropped > 0 {
            warn!(target: "controller", dropped = report.dropped, "drain timed out, items discarded");
        }
        info!(
            target: "controller",
            drained = report.drained,
            dropped = report.dropped,
            "pipeline stopped"
        );
        rt.last_drain = Some(report.clone());
        report
    }

    async fn sender(&self) -> Result<(mpsc::Sender<Queued>, CancellationToken), ControllerStateError> {
        let rt = self.runtime.lock().await;
        let state = self.shared.state();
        if state != ControllerState::Running {
            return Err(ControllerStateError::NotRunning {
                state: state.as_str(),
            });
        }
        match (rt.tx.as_ref(), rt.cancel.as_ref()) {
            (Some(tx), Some(cancel)) => Ok((tx.clone(), cancel.clone())),
            _ => Err(ControllerStateError::QueueClosed),
        }
    }

    /// Pull `feed` until it is exhausted, stalls past the read timeout, or the
    /// pipeline stops. Bad items are counted, never raised.
    pub async fn ingest_stream<F>(&self, feed: &mut F) -> Result<IngestReport, ControllerStateError>
    where
        F: SourceFeed + ?Sized,
    {
        let (tx, cancel) = self.sender().await?;
        Ok(pump(&self.shared, feed, &tx, &cancel, self.feed_read_timeout, false).await)
    }

    /// Run `feed` in the background until it ends or the pipeline stops.
    /// Read timeouts are logged and the feed is polled again.
    pub async fn spawn_feed<F>(&self, mut feed: F) -> Result<(), ControllerStateError>
    where
        F: SourceFeed + 'static,
    {
        let (tx, cancel) = self.sender().await?;
        let shared = self.shared.clone();
        let read_timeout = self.feed_read_timeout;
        let handle = tokio::spawn(async move {
            pump(&shared, &mut feed, &tx, &cancel, read_timeout, true).await
        });
        self.runtime.lock().await.feeds.push(handle);
        Ok(())
    }

    /// Enqueue a single item (webhook-style producers). Waits if the queue is full.
    pub async fn submit(&self, item: RawContentItem) -> Result<(), ControllerStateError> {
        let (tx, _) = self.sender().await?;
        tx.send(Queued {
            item,
            enqueued: Instant::now(),
        })
        .await
        .map_err(|_| ControllerStateError::QueueClosed)
    }

    /// Run one detection pass now, independent of the ticker.
    pub fn run_detection_pass(&self) -> DetectionPassSummary {
        self.run_detection_pass_at(Utc::now())
    }

    /// Detection pass as of `now`; deterministic for a given window content.
    pub fn run_detection_pass_at(&self, now: DateTime<Utc>) -> DetectionPassSummary {
        self.shared.detection_pass(now)
    }

    pub fn status(&self) -> PipelineStatus {
        let window_counts: BTreeMap<String, u64> = self.shared.windows.counts().into_iter().collect();
        let st = lock(&self.shared.stats);
        let uptime = st
            .started_at
            .map(|s| s.elapsed())
            .unwrap_or(st.last_uptime)
            .as_secs_f64();
        PipelineStatus {
            state: st.state,
            uptime_secs: uptime,
            events_processed: st.processed,
            events_rejected: st.rejected,
            rejected_by_reason: st
                .rejected_by_reason
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            feed_timeouts: st.feed_timeouts,
            feed_errors: st.feed_errors,
            processing_rate: if uptime > 0.0 {
                st.processed as f64 / uptime
            } else {
                0.0
            },
            window_counts,
            trends_detected: st.trends_detected,
            active_trends: st.active_trends,
            anomalies_found: st.anomalies_found,
            detection_passes: st.detection_passes,
            detection_failures: st.detection_failures,
            avg_latency_ms: if st.latency_samples > 0 {
                st.latency_sum_ms / st.latency_samples as f64
            } else {
                0.0
            },
            dropped_on_stop: st.dropped_on_stop,
        }
    }

    /// Non-dormant trends, highest emergence score first.
    pub fn list_active_trends(&self) -> Vec<Trend> {
        lock(&self.shared.registry).list_active()
    }

    pub fn get_trend(&self, trend_id: &str) -> Option<Trend> {
        lock(&self.shared.registry).get(trend_id).cloned()
    }

    /// Every held trend, dormant ones included until they are purged.
    pub fn all_trends(&self) -> Vec<Trend> {
        lock(&self.shared.registry).all()
    }

    /// Most recent detection passes, oldest first.
    pub fn recent_passes(&self) -> Vec<DetectionPassSummary> {
        lock(&self.shared.passes).iter().cloned().collect()
    }

    pub fn snapshot(&self, window: &str) -> Option<WindowStats> {
        self.shared.windows.snapshot(window, Utc::now())
    }

    /// Verification feedback for a source.
    pub fn record_outcome(&self, source: Platform, predicted: f64, actual: f64, accuracy: f64) {
        self.shared
            .weighter
            .record_outcome(source, predicted, actual, accuracy, Utc::now());
    }

    pub fn credibility_weight(&self, source: Platform) -> f64 {
        self.shared.weighter.weight(source)
    }

    pub fn credibility_profiles(&self) -> Vec<CredibilityProfile> {
        self.shared.weighter.profiles()
    }
}

async fn ingest_worker(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<Queued>,
    abort: CancellationToken,
    mut dedup: RecentDedup,
) -> u64 {
    loop {
        tokio::select! {
            biased;
            _ = abort.cancelled() => {
                rx.close();
                let mut dropped = 0;
                while rx.try_recv().is_ok() {
                    dropped += 1;
                }
                return dropped;
            }
            msg = rx.recv() => match msg {
                Some(q) => shared.process(q, &mut dedup),
                None => return 0,
            },
        }
    }
}

async fn detection_ticker(shared: Arc<Shared>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                shared.detection_pass(Utc::now());
            }
        }
    }
}

async fn pump<F>(
    shared: &Shared,
    feed: &mut F,
    tx: &mpsc::Sender<Queued>,
    cancel: &CancellationToken,
    read_timeout: Duration,
    retry_on_timeout: bool,
) -> IngestReport
where
    F: SourceFeed + ?Sized,
{
    let mut report = IngestReport {
        feed: feed.name().to_string(),
        ..Default::default()
    };
    let mut stalled = false;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = tokio::time::timeout(read_timeout, feed.next_item()) => r,
        };
        let item = match next {
            Err(_) => {
                let err = SourceFeedTimeout {
                    feed: report.feed.clone(),
                    timeout_ms: read_timeout.as_millis() as u64,
                };
                lock(&shared.stats).feed_timeouts += 1;
                counter!(m::FEED_TIMEOUTS).increment(1);
                report.timed_out = true;
                if !stalled {
                    warn!(target: "ingest", error = %err, "feed stalled");
                } else {
                    trace!(target: "ingest", error = %err, "feed still stalled");
                }
                stalled = true;
                if retry_on_timeout {
                    continue;
                }
                break;
            }
            Ok(Err(e)) => {
                lock(&shared.stats).feed_errors += 1;
                report.feed_errors += 1;
                warn!(target: "ingest", feed = %report.feed, error = %e, "feed item error");
                continue;
            }
            Ok(Ok(None)) => break,
            Ok(Ok(Some(item))) => item,
        };
        stalled = false;
        let queued = Queued {
            item,
            enqueued: Instant::now(),
        };
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = tx.send(queued) => r,
        };
        if sent.is_err() {
            break;
        }
        report.enqueued += 1;
    }
    debug!(
        target: "ingest",
        feed = %report.feed,
        enqueued = report.enqueued,
        errors = report.feed_errors,
        timed_out = report.timed_out,
        "feed pass finished"
    );
    report
}
