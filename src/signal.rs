//! # Signal model
//!
//! `RawContentItem` is what platform collectors hand us: a fixed, source-agnostic
//! field set plus an opaque metadata bag. `Signal` is the immutable, normalized
//! record that every downstream component consumes.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Platforms a signal can originate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Reddit,
    #[serde(rename = "github", alias = "gh")]
    GitHub,
    #[serde(alias = "hn", alias = "hackernews")]
    HackerNews,
    #[serde(alias = "devto")]
    DevTo,
    #[serde(alias = "so", alias = "stackoverflow")]
    StackOverflow,
    #[serde(alias = "ih")]
    IndieHackers,
    #[serde(alias = "ph")]
    ProductHunt,
    Lobsters,
}

impl Platform {
    pub const ALL: [Platform; 8] = [
        Platform::Reddit,
        Platform::GitHub,
        Platform::HackerNews,
        Platform::DevTo,
        Platform::StackOverflow,
        Platform::IndieHackers,
        Platform::ProductHunt,
        Platform::Lobsters,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Reddit => "reddit",
            Platform::GitHub => "github",
            Platform::HackerNews => "hacker-news",
            Platform::DevTo => "dev-to",
            Platform::StackOverflow => "stack-overflow",
            Platform::IndieHackers => "indie-hackers",
            Platform::ProductHunt => "product-hunt",
            Platform::Lobsters => "lobsters",
        }
    }

    /// Metadata keys whose numeric values make up the platform-native
    /// engagement when a collector did not supply one.
    pub(crate) fn engagement_keys(&self) -> &'static [(&'static str, f64)] {
        match self {
            Platform::Reddit => &[("score", 1.0), ("num_comments", 0.5)],
            Platform::GitHub => &[("stars", 1.0), ("forks", 2.0)],
            Platform::HackerNews => &[("points", 1.0), ("comments", 0.5)],
            Platform::DevTo => &[("reactions", 1.0), ("comments", 0.5)],
            Platform::StackOverflow => &[("score", 1.0), ("answers", 2.0)],
            Platform::IndieHackers => &[("upvotes", 1.0)],
            Platform::ProductHunt => &[("votes", 1.0)],
            Platform::Lobsters => &[("score", 1.0), ("comments", 0.5)],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPlatform(pub String);

impl fmt::Display for UnknownPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown platform: {}", self.0)
    }
}

impl std::error::Error for UnknownPlatform {}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    /// Case-insensitive; accepts common aliases ("hn", "devto", "so", ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let p = match key.as_str() {
            "reddit" => Platform::Reddit,
            "github" | "gh" => Platform::GitHub,
            "hackernews" | "hn" => Platform::HackerNews,
            "devto" => Platform::DevTo,
            "stackoverflow" | "so" => Platform::StackOverflow,
            "indiehackers" | "ih" => Platform::IndieHackers,
            "producthunt" | "ph" => Platform::ProductHunt,
            "lobsters" => Platform::Lobsters,
            _ => return Err(UnknownPlatform(s.to_string())),
        };
        Ok(p)
    }
}

/// Source-reported observation time as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Unix seconds.
    Unix(i64),
    /// RFC 3339 / ISO 8601 text, or unix seconds as a string.
    Text(String),
}

/// One raw content item from a platform collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawContentItem {
    pub source: Platform,
    pub content: String,
    #[serde(default)]
    pub engagement: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RawContentItem {
    pub fn new(source: Platform, content: impl Into<String>) -> Self {
        Self {
            source,
            content: content.into(),
            engagement: None,
            timestamp: None,
            metadata: HashMap::new(),
        }
    }

    pub fn engagement(mut self, engagement: f64) -> Self {
        self.engagement = Some(engagement);
        self
    }

    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(RawTimestamp::Text(ts.to_rfc3339()));
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Normalized, immutable observation of activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub source: Platform,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub keywords: BTreeSet<String>,
    pub raw_engagement: f64,
    pub credibility_weight: f64,
}

impl Signal {
    /// `raw_engagement * credibility_weight`.
    pub fn weighted_engagement(&self) -> f64 {
        self.raw_engagement * self.credibility_weight
    }
}
