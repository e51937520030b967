// src/ingest/mod.rs
//! Normalization: raw platform items -> uniform signals.
//!
//! `normalize` is a pure function of its inputs. Duplicate suppression is the
//! only stateful step and lives in [`dedup::RecentDedup`], owned by the
//! controller's ingest lane.

pub mod dedup;
pub mod feed;
pub mod keywords;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::config::IngestConfig;
use crate::error::{RejectReason, RejectedInput};
use crate::signal::{Platform, RawContentItem, RawTimestamp, Signal};

/// Unix values above this are treated as milliseconds.
const UNIX_MILLIS_THRESHOLD: i64 = 100_000_000_000;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// A normalized item still waiting for its credibility weight.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    pub source: Platform,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub keywords: BTreeSet<String>,
    pub raw_engagement: f64,
}

impl NormalizedItem {
    /// Freeze the credibility weight into an immutable `Signal`.
    pub fn into_signal(self, credibility_weight: f64) -> Signal {
        Signal {
            source: self.source,
            timestamp: self.timestamp,
            content: self.content,
            keywords: self.keywords,
            raw_engagement: self.raw_engagement,
            credibility_weight: credibility_weight.clamp(0.0, 1.0),
        }
    }
}

/// Short anonymized id for logging content without logging the content itself.
pub(crate) fn content_id(text: &str) -> String {
    use sha2::{Digest, Sha256};
    use std::fmt::Write as _;
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Normalize text: decode entities, strip tags, fold quotes, collapse whitespace, cap length.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();
    out = RE_TAGS.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    out = RE_WS.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }
    out
}

/// Turn one raw item into a normalized item, or say why not.
///
/// `now` is the ingestion time: it is the fallback timestamp and the reference
/// for the future-skew check.
pub fn normalize(
    raw: &RawContentItem,
    now: DateTime<Utc>,
    cfg: &IngestConfig,
) -> Result<NormalizedItem, RejectedInput> {
    let reject = |reason| RejectedInput {
        platform: raw.source,
        reason,
    };

    let content = normalize_text(&raw.content, cfg.max_content_chars);
    if content.is_empty() {
        return Err(reject(RejectReason::EmptyContent));
    }

    let timestamp = match &raw.timestamp {
        None => now,
        Some(ts) => parse_timestamp(ts).map_err(reject)?,
    };
    let skew = timestamp - now;
    if skew > Duration::seconds(cfg.future_skew_secs) {
        return Err(reject(RejectReason::FutureSkew {
            skew_secs: skew.num_seconds(),
        }));
    }

    let raw_engagement = engagement_for(raw, cfg.max_engagement).map_err(reject)?;
    let keywords = keywords::extract_keywords(&content);

    Ok(NormalizedItem {
        source: raw.source,
        timestamp,
        content,
        keywords,
        raw_engagement,
    })
}

fn parse_timestamp(ts: &RawTimestamp) -> Result<DateTime<Utc>, RejectReason> {
    match ts {
        RawTimestamp::Unix(v) => from_unix(*v),
        RawTimestamp::Text(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Ok(naive.and_utc());
            }
            if let Ok(v) = s.parse::<i64>() {
                return from_unix(v);
            }
            Err(RejectReason::MalformedTimestamp(s.chars().take(64).collect()))
        }
    }
}

fn from_unix(v: i64) -> Result<DateTime<Utc>, RejectReason> {
    let parsed = if v.abs() >= UNIX_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(v).single()
    } else {
        Utc.timestamp_opt(v, 0).single()
    };
    match parsed {
        Some(dt) if v >= 0 => Ok(dt),
        _ => Err(RejectReason::MalformedTimestamp(v.to_string())),
    }
}

/// Collector-supplied engagement wins; otherwise the platform's metadata keys; otherwise 0.
/// Negative platform scores (downvotes) count as no engagement. Values above
/// `max` are refused so window sums stay finite.
fn engagement_for(raw: &RawContentItem, max: f64) -> Result<f64, RejectReason> {
    let value = match raw.engagement {
        Some(v) => v,
        None => raw
            .source
            .engagement_keys()
            .iter()
            .filter_map(|(key, factor)| {
                raw.metadata
                    .get(*key)
                    .and_then(|v| v.as_f64())
                    .filter(|v| v.is_finite())
                    .map(|v| v * factor)
            })
            .sum::<f64>(),
    };
    if !value.is_finite() || value > max {
        return Err(RejectReason::InvalidEngagement);
    }
    Ok(value.max(0.0))
}
