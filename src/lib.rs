// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod anomaly;
pub mod config;
pub mod controller;
pub mod credibility;
pub mod emergence;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod pattern;
pub mod rolling;
pub mod signal;
pub mod trends;

// ---- Re-exports for stable public API ----
pub use crate::config::PipelineConfig;
pub use crate::controller::{
    ControllerState, DetectionPassSummary, DrainReport, IngestReport, PipelineController,
    PipelineStatus,
};
pub use crate::ingest::feed::{ChannelFeed, IterFeed, JsonLinesFeed, SourceFeed};
pub use crate::signal::{Platform, RawContentItem, Signal};
pub use crate::trends::{Trend, TrendStage};
