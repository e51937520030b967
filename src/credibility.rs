//! # Credibility Weighter
//!
//! Per-platform trust scores in `[0.0, 1.0]`, learned from verification
//! feedback.
//!
//! - An unseen platform gets a conservative baseline (or its configured prior).
//! - A profile is created on the first signal from a platform.
//! - `record_outcome` folds a verification result into the score with an
//!   exponentially-weighted moving average, so recent outcomes dominate.
//! - Writes to one platform's profile are serialized by the map's per-key
//!   lock; readers get cloned snapshots and never hold a guard.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::CredibilityConfig;
use crate::signal::Platform;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredibilityProfile {
    pub source: Platform,
    pub overall_score: f64,
    /// Number of verification outcomes folded in so far.
    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
    /// EWMA of `|predicted - actual|`, for diagnostics.
    pub calibration_error: f64,
}

#[derive(Debug)]
pub struct CredibilityWeighter {
    baseline: f64,
    smoothing: f64,
    priors: HashMap<Platform, f64>,
    profiles: DashMap<Platform, CredibilityProfile>,
}

impl CredibilityWeighter {
    pub fn new(cfg: &CredibilityConfig) -> Self {
        Self {
            baseline: clamp01(cfg.baseline),
            smoothing: cfg.smoothing.clamp(f64::EPSILON, 1.0),
            priors: cfg
                .priors
                .iter()
                .map(|(p, w)| (*p, clamp01(*w)))
                .collect(),
            profiles: DashMap::new(),
        }
    }

    /// Current weight for `source`. Never creates state.
    pub fn weight(&self, source: Platform) -> f64 {
        match self.profiles.get(&source) {
            Some(p) => p.overall_score,
            None => self.starting_score(source),
        }
    }

    /// Weight to freeze into a freshly ingested signal; creates the profile on first sight.
    pub fn weight_for_signal(&self, source: Platform, now: DateTime<Utc>) -> f64 {
        if let Some(p) = self.profiles.get(&source) {
            return p.overall_score;
        }
        let start = self.starting_score(source);
        let entry = self.profiles.entry(source).or_insert_with(|| {
            debug!(target: "credibility", %source, weight = start, "new credibility profile");
            CredibilityProfile {
                source,
                overall_score: start,
                sample_count: 0,
                last_updated: now,
                calibration_error: 0.0,
            }
        });
        entry.overall_score
    }

    /// Fold one verification outcome into `source`'s score.
    ///
    /// `accuracy` is the verified correctness of what the source predicted, in
    /// `[0, 1]`. `predicted`/`actual` feed the calibration-error diagnostic only.
    pub fn record_outcome(
        &self,
        source: Platform,
        predicted: f64,
        actual: f64,
        accuracy: f64,
        now: DateTime<Utc>,
    ) {
        if !accuracy.is_finite() {
            warn!(target: "credibility", %source, "ignoring non-finite accuracy");
            return;
        }
        let accuracy = clamp01(accuracy);
        let alpha = self.smoothing;
        let start = self.starting_score(source);

        let mut entry = self.profiles.entry(source).or_insert_with(|| CredibilityProfile {
            source,
            overall_score: start,
            sample_count: 0,
            last_updated: now,
            calibration_error: 0.0,
        });
        let p = entry.value_mut();
        p.overall_score = clamp01(alpha * accuracy + (1.0 - alpha) * p.overall_score);
        let err = (predicted - actual).abs();
        if err.is_finite() {
            p.calibration_error = if p.sample_count == 0 {
                err
            } else {
                alpha * err + (1.0 - alpha) * p.calibration_error
            };
        }
        p.sample_count += 1;
        p.last_updated = now;
        debug!(
            target: "credibility",
            %source,
            score = p.overall_score,
            samples = p.sample_count,
            "credibility updated"
        );
    }

    pub fn profile(&self, source: Platform) -> Option<CredibilityProfile> {
        self.profiles.get(&source).map(|p| p.clone())
    }

    /// Point-in-time copy of every profile, ordered by platform.
    pub fn profiles(&self) -> Vec<CredibilityProfile> {
        let mut out: Vec<_> = self.profiles.iter().map(|p| p.value().clone()).collect();
        out.sort_by_key(|p| p.source);
        out
    }

    /// True once at least one verification outcome has been recorded for `source`.
    pub fn has_history(&self, source: Platform) -> bool {
        self.profiles
            .get(&source)
            .is_some_and(|p| p.sample_count > 0)
    }

    fn starting_score(&self, source: Platform) -> f64 {
        self.priors.get(&source).copied().unwrap_or(self.baseline)
    }
}

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
