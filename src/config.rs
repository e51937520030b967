// src/config.rs
//! Pipeline configuration.
//!
//! Read once when the controller is constructed. Supports TOML or JSON, picked
//! by file extension, with the same env-then-fallback lookup the ingest
//! whitelist used:
//! 1) `$TREND_PIPELINE_CONFIG`
//! 2) `config/pipeline.toml`
//! 3) `config/pipeline.json`
//! 4) built-in defaults

use anyhow::{anyhow, bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::signal::Platform;

pub const ENV_CONFIG_PATH: &str = "TREND_PIPELINE_CONFIG";
pub const DEFAULT_TOML_PATH: &str = "config/pipeline.toml";
pub const DEFAULT_JSON_PATH: &str = "config/pipeline.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ingest: IngestConfig,
    pub windows: WindowsConfig,
    pub credibility: CredibilityConfig,
    pub pattern: PatternConfig,
    pub anomaly: AnomalyConfig,
    pub emergence: EmergenceConfig,
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// How far ahead of wall clock a source timestamp may be.
    pub future_skew_secs: i64,
    /// Identical (source, content) pairs inside this window are dropped.
    pub dedup_window_secs: i64,
    pub dedup_capacity: usize,
    pub max_content_chars: usize,
    /// Largest engagement accepted for one item; anything above is rejected.
    pub max_engagement: f64,
    /// Bounded ingestion queue between feeds and the window writer.
    pub queue_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            future_skew_secs: 300,
            dedup_window_secs: 600,
            dedup_capacity: 8192,
            max_content_chars: 1500,
            max_engagement: 1e9,
            queue_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowSpec {
    pub name: String,
    pub size_secs: i64,
    pub bucket_secs: i64,
    #[serde(default = "default_max_signals")]
    pub max_signals: usize,
}

fn default_max_signals() -> usize {
    100_000
}

impl WindowSpec {
    pub fn new(name: &str, size_secs: i64, bucket_secs: i64) -> Self {
        Self {
            name: name.to_string(),
            size_secs,
            bucket_secs,
            max_signals: default_max_signals(),
        }
    }

    pub fn size(&self) -> Duration {
        Duration::seconds(self.size_secs)
    }

    pub fn bucket(&self) -> Duration {
        Duration::seconds(self.bucket_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct WindowsConfig(pub Vec<WindowSpec>);

impl Default for WindowsConfig {
    fn default() -> Self {
        Self(vec![
            WindowSpec::new("short", 3_600, 60),
            WindowSpec::new("medium", 48 * 3_600, 3_600),
            WindowSpec::new("long", 14 * 86_400, 3_600),
        ])
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredibilityConfig {
    /// Weight handed to a source with no verification history.
    pub baseline: f64,
    /// EWMA smoothing factor in (0, 1]; higher means recent outcomes dominate.
    pub smoothing: f64,
    /// Optional per-platform starting scores.
    pub priors: HashMap<Platform, f64>,
}

impl Default for CredibilityConfig {
    fn default() -> Self {
        Self {
            baseline: 0.5,
            smoothing: 0.2,
            priors: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub candidate_periods_secs: Vec<i64>,
    pub confidence_floor: f64,
    pub min_buckets: usize,
    /// A period that is a multiple of an accepted shorter one must beat it by this much.
    pub harmonic_margin: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            candidate_periods_secs: vec![86_400, 604_800],
            confidence_floor: 0.6,
            min_buckets: 12,
            harmonic_margin: 0.05,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub deviation_multiplier: f64,
    pub lookback_buckets: usize,
    pub min_baseline_buckets: usize,
    /// Std floor relative to the baseline mean, so a perfectly flat baseline
    /// still yields a finite deviation.
    pub min_relative_std: f64,
    /// Absolute std floor, in weighted-engagement units per bucket.
    pub min_abs_std: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            deviation_multiplier: 3.0,
            lookback_buckets: 24,
            min_baseline_buckets: 6,
            min_relative_std: 0.05,
            min_abs_std: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScoreWeights {
    pub pattern: f64,
    pub anomaly: f64,
    pub credibility: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            pattern: 0.35,
            anomaly: 0.40,
            credibility: 0.25,
        }
    }
}

impl ScoreWeights {
    /// Rescale so the three weights sum to 1.
    pub fn normalized(&self) -> Self {
        let sum = self.pattern + self.anomaly + self.credibility;
        if sum <= 0.0 {
            return Self::default();
        }
        Self {
            pattern: self.pattern / sum,
            anomaly: self.anomaly / sum,
            credibility: self.credibility / sum,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmergenceConfig {
    /// Window whose keyword statistics drive trend creation and velocity.
    pub trend_window: String,
    pub min_signal_threshold: u64,
    pub retention_horizon_secs: i64,
    pub weights: ScoreWeights,
    pub anomaly_recency_secs: i64,
    /// Minimum share of an anomalous bucket a trend must account for to claim it.
    pub attribution_share: f64,
    pub peak_ratio: f64,
    pub plateau_tolerance: f64,
    pub velocity_epsilon: f64,
    pub velocity_buckets: usize,
    pub max_trends: usize,
    pub top_keywords: usize,
    pub cluster_size: usize,
}

impl Default for EmergenceConfig {
    fn default() -> Self {
        Self {
            trend_window: "medium".to_string(),
            min_signal_threshold: 5,
            retention_horizon_secs: 86_400,
            weights: ScoreWeights::default(),
            anomaly_recency_secs: 6 * 3_600,
            attribution_share: 0.2,
            peak_ratio: 0.9,
            plateau_tolerance: 0.02,
            velocity_epsilon: 0.01,
            velocity_buckets: 6,
            max_trends: 512,
            top_keywords: 64,
            cluster_size: 3,
        }
    }
}

impl EmergenceConfig {
    pub fn retention_horizon(&self) -> Duration {
        Duration::seconds(self.retention_horizon_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub detection_interval_secs: u64,
    pub drain_timeout_ms: u64,
    pub feed_read_timeout_ms: u64,
    pub pass_history: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            detection_interval_secs: 5,
            drain_timeout_ms: 2_000,
            feed_read_timeout_ms: 1_000,
            pass_history: 64,
        }
    }
}

impl PipelineConfig {
    /// Load from an explicit path. TOML or JSON, by extension.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg: Self = match ext.as_str() {
            "json" => serde_json::from_str(&content)
                .with_context(|| format!("parsing JSON config {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("parsing TOML config {}", path.display()))?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Env var, then `config/pipeline.{toml,json}`, then defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        for candidate in [DEFAULT_TOML_PATH, DEFAULT_JSON_PATH] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.windows.0.is_empty() {
            bail!("at least one window must be configured");
        }
        let mut names = BTreeSet::new();
        for w in &self.windows.0 {
            if !names.insert(w.name.as_str()) {
                bail!("duplicate window name {:?}", w.name);
            }
            if w.size_secs <= 0 || w.bucket_secs <= 0 {
                bail!("window {:?} needs positive size and bucket", w.name);
            }
            if w.bucket_secs > w.size_secs {
                bail!("window {:?} bucket is larger than the window", w.name);
            }
            if w.max_signals == 0 {
                bail!("window {:?} max_signals must be > 0", w.name);
            }
        }
        if !names.contains(self.emergence.trend_window.as_str()) {
            bail!(
                "emergence.trend_window {:?} is not a configured window",
                self.emergence.trend_window
            );
        }
        let c = &self.credibility;
        if !(c.smoothing > 0.0 && c.smoothing <= 1.0) {
            bail!("credibility.smoothing must be in (0, 1]");
        }
        if !(0.0..=1.0).contains(&c.baseline) {
            bail!("credibility.baseline must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.pattern.confidence_floor) {
            bail!("pattern.confidence_floor must be in [0, 1]");
        }
        if self.pattern.candidate_periods_secs.iter().any(|p| *p <= 0) {
            bail!("pattern.candidate_periods_secs must be positive");
        }
        if self.anomaly.deviation_multiplier <= 0.0 {
            bail!("anomaly.deviation_multiplier must be > 0");
        }
        if self.anomaly.lookback_buckets == 0 || self.anomaly.min_baseline_buckets == 0 {
            bail!("anomaly baseline sizes must be > 0");
        }
        if self.anomaly.min_baseline_buckets > self.anomaly.lookback_buckets {
            bail!("anomaly.min_baseline_buckets must not exceed lookback_buckets");
        }
        if self.anomaly.min_relative_std < 0.0 || self.anomaly.min_abs_std < 0.0 {
            bail!("anomaly std floors must be non-negative");
        }
        let w = self.emergence.weights;
        if w.pattern < 0.0 || w.anomaly < 0.0 || w.credibility < 0.0 {
            bail!("emergence.weights must be non-negative");
        }
        if w.pattern + w.anomaly + w.credibility <= 0.0 {
            bail!("emergence.weights must not all be zero");
        }
        if self.emergence.retention_horizon_secs <= 0 {
            bail!("emergence.retention_horizon_secs must be > 0");
        }
        if self.emergence.min_signal_threshold == 0 {
            bail!("emergence.min_signal_threshold must be > 0");
        }
        if !(self.ingest.max_engagement.is_finite() && self.ingest.max_engagement > 0.0) {
            bail!("ingest.max_engagement must be a positive, finite number");
        }
        if self.ingest.queue_capacity == 0 {
            bail!("ingest.queue_capacity must be > 0");
        }
        Ok(())
    }

    pub fn window(&self, name: &str) -> Option<&WindowSpec> {
        self.windows.0.iter().find(|w| w.name == name)
    }
}
