//! # Anomaly Detector
//! Flags buckets whose weighted engagement deviates from a trailing baseline.
//!
//! The baseline for bucket `i` is the mean/std of the `lookback` complete
//! buckets strictly before `i`, so a bucket is never compared against itself.
//! The still-open tail bucket is never tested. The detector keeps no state
//! between calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AnomalyConfig;
use crate::error::DetectionError;
use crate::rolling::WindowStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Spike,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyEvent {
    pub window_ref: String,
    /// Start of the anomalous bucket.
    pub timestamp: DateTime<Utc>,
    pub bucket_index: usize,
    pub value: f64,
    pub baseline_mean: f64,
    pub baseline_std: f64,
    /// Distance from the baseline mean in (floored) standard deviations.
    pub deviation_magnitude: f64,
    pub direction: Direction,
}

/// How the trailing baseline is formed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub lookback_buckets: usize,
    pub min_buckets: usize,
    pub min_relative_std: f64,
    pub min_abs_std: f64,
}

impl Baseline {
    pub fn from_config(cfg: &AnomalyConfig) -> Self {
        Self {
            lookback_buckets: cfg.lookback_buckets.max(1),
            min_buckets: cfg.min_baseline_buckets.clamp(1, cfg.lookback_buckets.max(1)),
            min_relative_std: cfg.min_relative_std.max(0.0),
            min_abs_std: cfg.min_abs_std.max(0.0),
        }
    }

    /// Mean and floored std of `prev`.
    fn stats(&self, prev: &[f64]) -> (f64, f64) {
        let n = prev.len() as f64;
        let mean = prev.iter().sum::<f64>() / n;
        let var = if prev.len() < 2 {
            0.0
        } else {
            prev.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
        };
        let std = var
            .sqrt()
            .max(mean.abs() * self.min_relative_std)
            .max(self.min_abs_std)
            .max(1e-9);
        (mean, std)
    }
}

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    multiplier: f64,
}

impl AnomalyDetector {
    pub fn new(cfg: &AnomalyConfig) -> Self {
        Self {
            multiplier: cfg.deviation_multiplier,
        }
    }

    pub fn detect(
        &self,
        window: &WindowStats,
        baseline: &Baseline,
    ) -> Result<Vec<AnomalyEvent>, DetectionError> {
        let series = window.complete_series();
        if series.iter().any(|v| !v.is_finite()) {
            return Err(DetectionError::NonFiniteSeries {
                window: window.name.clone(),
            });
        }

        let mut events = Vec::new();
        for (i, &value) in series.iter().enumerate() {
            if i < baseline.min_buckets {
                continue;
            }
            let from = i.saturating_sub(baseline.lookback_buckets);
            let (mean, std) = baseline.stats(&series[from..i]);
            let z = (value - mean) / std;
            if z.abs() <= self.multiplier {
                continue;
            }
            let Some(timestamp) = window.bucket_start(i) else {
                continue;
            };
            events.push(AnomalyEvent {
                window_ref: window.name.clone(),
                timestamp,
                bucket_index: i,
                value,
                baseline_mean: mean,
                baseline_std: std,
                deviation_magnitude: z.abs(),
                direction: if z > 0.0 {
                    Direction::Spike
                } else {
                    Direction::Drop
                },
            });
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WindowSpec;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_006_400, 0).unwrap()
    }

    fn stats(series: Vec<f64>, partial_tail: bool) -> WindowStats {
        let mut s = WindowStats::empty(&WindowSpec::new("w", 7 * 86_400, 3_600), t0());
        s.count = series.len() as u64;
        s.series_start = Some(t0());
        s.series = series;
        s.partial_tail = partial_tail;
        s
    }

    fn run(series: Vec<f64>, partial_tail: bool) -> Vec<AnomalyEvent> {
        let cfg = AnomalyConfig::default();
        AnomalyDetector::new(&cfg)
            .detect(&stats(series, partial_tail), &Baseline::from_config(&cfg))
            .unwrap()
    }

    #[test]
    fn single_spike_on_flat_baseline() {
        let mut series = vec![5.0; 40];
        series[30] = 50.0;
        let events = run(series, false);
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.bucket_index, 30);
        assert_eq!(e.direction, Direction::Spike);
        assert_eq!(e.timestamp, t0() + Duration::hours(30));
        // flat baseline: std floored to min_abs_std
        assert!((e.deviation_magnitude - 45.0).abs() < 1e-9);
    }

    #[test]
    fn drop_is_flagged() {
        let mut series: Vec<f64> = (0..30).map(|i| 100.0 + (i % 3) as f64).collect();
        series[25] = 10.0;
        let events = run(series, false);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].direction, Direction::Drop);
    }

    #[test]
    fn warmup_buckets_are_never_flagged() {
        let mut series = vec![5.0; 10];
        series[2] = 500.0;
        assert!(run(series, false).is_empty());
    }

    #[test]
    fn open_tail_bucket_is_not_tested() {
        let mut series = vec![5.0; 20];
        series[19] = 500.0;
        assert!(run(series.clone(), true).is_empty());
        assert_eq!(run(series, false).len(), 1);
    }

    #[test]
    fn stateless_between_calls() {
        let mut series = vec![5.0; 20];
        series[15] = 60.0;
        assert_eq!(run(series.clone(), false), run(series, false));
    }

    #[test]
    fn non_finite_series_is_an_error() {
        let cfg = AnomalyConfig::default();
        let mut series = vec![1.0; 10];
        series[4] = f64::INFINITY;
        let res = AnomalyDetector::new(&cfg).detect(&stats(series, false), &Baseline::from_config(&cfg));
        assert!(matches!(res, Err(DetectionError::NonFiniteSeries { .. })));
    }
}
