//! # Pattern Detector
//! Periodicity tests over a window's bucketed engagement series.
//!
//! For every candidate period the series is correlated with itself shifted by
//! one period (Pearson r over the overlapping part). At least two full cycles
//! of complete buckets are required. Strength comes from the phase-folded
//! profile: `(max - min) / (max + min)` of the per-phase means.
//!
//! Pure and deterministic: identical snapshots give identical patterns.

use serde::{Deserialize, Serialize};

use crate::config::PatternConfig;
use crate::error::DetectionError;
use crate::rolling::WindowStats;

const DAY_SECS: i64 = 86_400;
const WEEK_SECS: i64 = 7 * DAY_SECS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Daily,
    Weekly,
    Other,
}

impl PatternType {
    fn for_period(period_secs: i64) -> Self {
        match period_secs {
            DAY_SECS => PatternType::Daily,
            WEEK_SECS => PatternType::Weekly,
            _ => PatternType::Other,
        }
    }
}

/// A periodic structure found in one window during one detection pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pattern {
    pub window: String,
    pub pattern_type: PatternType,
    /// `None` for aperiodic structure; every pattern this detector emits has one.
    pub period_secs: Option<i64>,
    /// Normalized amplitude of the cycle, 0..=1.
    pub strength: f64,
    /// Lag correlation, 0..=1.
    pub confidence: f64,
    /// Offset of the cycle's peak from the period boundary (UTC).
    pub peak_offset_secs: i64,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct PatternDetector {
    periods: Vec<i64>,
    confidence_floor: f64,
    min_buckets: usize,
    harmonic_margin: f64,
}

impl PatternDetector {
    pub fn new(cfg: &PatternConfig) -> Self {
        let mut periods: Vec<i64> = cfg
            .candidate_periods_secs
            .iter()
            .copied()
            .filter(|p| *p > 0)
            .collect();
        periods.sort_unstable();
        periods.dedup();
        Self {
            periods,
            confidence_floor: cfg.confidence_floor,
            min_buckets: cfg.min_buckets.max(2),
            harmonic_margin: cfg.harmonic_margin,
        }
    }

    pub fn detect(&self, window: &WindowStats) -> Result<Vec<Pattern>, DetectionError> {
        let series = window.complete_series();
        if series.iter().any(|v| !v.is_finite()) {
            return Err(DetectionError::NonFiniteSeries {
                window: window.name.clone(),
            });
        }
        if series.len() < self.min_buckets {
            return Ok(Vec::new());
        }

        let mut found: Vec<Pattern> = Vec::new();
        for &period in &self.periods {
            if period % window.bucket_secs != 0 {
                continue;
            }
            let lag = (period / window.bucket_secs) as usize;
            if lag < 2 || series.len() < 2 * lag {
                continue;
            }
            let Some(r) = lag_correlation(series, lag) else {
                continue;
            };
            let confidence = r.clamp(0.0, 1.0);
            if confidence <= self.confidence_floor {
                continue;
            }
            // a multiple of an accepted period must carry its own structure
            let harmonic = found.iter().any(|p| {
                p.period_secs
                    .is_some_and(|q| period % q == 0 && confidence <= p.confidence + self.harmonic_margin)
            });
            if harmonic {
                continue;
            }

            let (strength, peak_phase) = folded_profile(series, lag);
            let peak_offset_secs = window.series_start.map_or(0, |start| {
                (start.timestamp() + peak_phase as i64 * window.bucket_secs).rem_euclid(period)
            });
            let pattern_type = PatternType::for_period(period);
            found.push(Pattern {
                window: window.name.clone(),
                pattern_type,
                period_secs: Some(period),
                strength,
                confidence,
                peak_offset_secs,
                description: describe(pattern_type, period, strength, confidence, peak_offset_secs),
            });
        }
        Ok(found)
    }
}

/// Pearson correlation of `x[..n-lag]` with `x[lag..]`. `None` if either side is flat.
fn lag_correlation(x: &[f64], lag: usize) -> Option<f64> {
    let n = x.len().checked_sub(lag)?;
    if n < 2 {
        return None;
    }
    let a = &x[..n];
    let b = &x[lag..];
    let mean_a = a.iter().sum::<f64>() / n as f64;
    let mean_b = b.iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (va, vb) in a.iter().zip(b) {
        let da = va - mean_a;
        let db = vb - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denom = (var_a * var_b).sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(cov / denom)
}

/// Mean value per phase of the cycle; returns normalized amplitude and the peak phase.
fn folded_profile(x: &[f64], lag: usize) -> (f64, usize) {
    let mut sums = vec![0.0; lag];
    let mut counts = vec![0usize; lag];
    for (i, v) in x.iter().enumerate() {
        sums[i % lag] += v;
        counts[i % lag] += 1;
    }
    let means: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(s, c)| if *c > 0 { s / *c as f64 } else { 0.0 })
        .collect();
    let (mut lo, mut hi, mut peak) = (f64::INFINITY, f64::NEG_INFINITY, 0);
    for (i, m) in means.iter().enumerate() {
        if *m < lo {
            lo = *m;
        }
        if *m > hi {
            hi = *m;
            peak = i;
        }
    }
    let strength = if hi + lo > 0.0 {
        ((hi - lo) / (hi + lo)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (strength, peak)
}

fn describe(kind: PatternType, period: i64, strength: f64, confidence: f64, peak_offset: i64) -> String {
    let label = match kind {
        PatternType::Daily => "daily cycle".to_string(),
        PatternType::Weekly => "weekly cycle".to_string(),
        PatternType::Other => format!("{}h cycle", period / 3_600),
    };
    let peak = match kind {
        PatternType::Weekly => {
            const DAYS: [&str; 7] = ["Thu", "Fri", "Sat", "Sun", "Mon", "Tue", "Wed"];
            format!(
                "{} {:02}:00 UTC",
                DAYS[(peak_offset / DAY_SECS) as usize % 7],
                (peak_offset % DAY_SECS) / 3_600
            )
        }
        _ => format!("{:02}:{:02} UTC", (peak_offset % DAY_SECS) / 3_600, (peak_offset % 3_600) / 60),
    };
    format!(
        "{label} (strength {strength:.2}, confidence {confidence:.2}), peaking around {peak}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn stats(series: Vec<f64>, bucket_secs: i64) -> WindowStats {
        let start = Utc.timestamp_opt(1_700_006_400, 0).unwrap();
        let mut s = WindowStats::empty(&crate::config::WindowSpec::new("w", 30 * 86_400, bucket_secs), start);
        s.count = series.len() as u64;
        s.series_start = Some(start);
        s.series = series;
        s.partial_tail = false;
        s
    }

    fn detector() -> PatternDetector {
        PatternDetector::new(&PatternConfig::default())
    }

    fn daily_series(days: usize) -> Vec<f64> {
        (0..days * 24)
            .map(|h| if (12..18).contains(&(h % 24)) { 20.0 } else { 10.0 })
            .collect()
    }

    #[test]
    fn too_few_buckets_yield_nothing_deterministically() {
        let d = detector();
        let s = stats(vec![1.0, 5.0, 1.0, 5.0, 1.0], 3_600);
        assert!(d.detect(&s).unwrap().is_empty());
        assert!(d.detect(&s).unwrap().is_empty());
    }

    #[test]
    fn finds_daily_cycle() {
        let d = detector();
        let found = d.detect(&stats(daily_series(3), 3_600)).unwrap();
        assert_eq!(found.len(), 1);
        let p = &found[0];
        assert_eq!(p.pattern_type, PatternType::Daily);
        assert_eq!(p.period_secs, Some(86_400));
        assert!(p.confidence > 0.99);
        assert!((p.strength - 1.0 / 3.0).abs() < 1e-9);
        assert!(p.description.starts_with("daily cycle"));
    }

    #[test]
    fn pure_daily_cycle_is_not_reported_as_weekly() {
        let d = detector();
        let found = d.detect(&stats(daily_series(15), 3_600)).unwrap();
        let kinds: Vec<_> = found.iter().map(|p| p.pattern_type).collect();
        assert_eq!(kinds, vec![PatternType::Daily]);
    }

    #[test]
    fn weekly_structure_on_top_of_daily_is_reported() {
        let d = detector();
        let series: Vec<f64> = (0..15 * 24)
            .map(|h| {
                let day = h / 24;
                let base = if day % 7 < 2 { 40.0 } else { 10.0 };
                base + if (12..18).contains(&(h % 24)) { 5.0 } else { 0.0 }
            })
            .collect();
        let kinds: Vec<_> = d
            .detect(&stats(series, 3_600))
            .unwrap()
            .into_iter()
            .map(|p| p.pattern_type)
            .collect();
        assert!(kinds.contains(&PatternType::Weekly));
    }

    #[test]
    fn flat_or_noise_free_constant_series_has_no_pattern() {
        let d = detector();
        assert!(d.detect(&stats(vec![7.0; 72], 3_600)).unwrap().is_empty());
    }

    #[test]
    fn non_finite_series_is_an_error() {
        let d = detector();
        let mut series = daily_series(2);
        series[3] = f64::NAN;
        assert!(d.detect(&stats(series, 3_600)).is_err());
    }

    #[test]
    fn periods_not_aligned_to_buckets_are_skipped() {
        let d = detector();
        // 5h buckets express neither a 24h nor a 168h lag
        assert!(d.detect(&stats(daily_series(8), 5 * 3_600)).unwrap().is_empty());
    }
}
