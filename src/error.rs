//! Error taxonomy for the pipeline.
//!
//! Only [`ControllerStateError`] ever reaches a caller synchronously. The rest
//! are recorded (logged + counted) at the point where they occur and the
//! pipeline keeps going.

use thiserror::Error;

use crate::signal::Platform;

/// Why a raw item was refused by the normalizer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("content is empty after normalization")]
    EmptyContent,

    #[error("malformed timestamp: {0}")]
    MalformedTimestamp(String),

    #[error("timestamp is {skew_secs}s ahead of wall clock")]
    FutureSkew { skew_secs: i64 },

    #[error("engagement must be a finite, non-negative number")]
    InvalidEngagement,

    #[error("duplicate of a recently ingested item")]
    Duplicate,
}

impl RejectReason {
    /// Stable label used for metrics and status breakdowns.
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::EmptyContent => "empty_content",
            RejectReason::MalformedTimestamp(_) => "malformed_timestamp",
            RejectReason::FutureSkew { .. } => "future_skew",
            RejectReason::InvalidEngagement => "invalid_engagement",
            RejectReason::Duplicate => "duplicate",
        }
    }
}

/// A raw item that did not become a [`crate::signal::Signal`].
#[derive(Debug, Clone, PartialEq, Error)]
#[error("rejected {platform} item: {reason}")]
pub struct RejectedInput {
    pub platform: Platform,
    pub reason: RejectReason,
}

/// A feed did not yield within its read timeout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("feed {feed} did not yield within {timeout_ms}ms")]
pub struct SourceFeedTimeout {
    pub feed: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetectionError {
    #[error("window {window} produced a non-finite series value")]
    NonFiniteSeries { window: String },

    #[error("unknown window: {0}")]
    UnknownWindow(String),
}

/// Detection failure isolated to a single window.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("detection pass failed for window {window}: {error}")]
pub struct DetectionPassFailure {
    pub window: String,
    pub error: DetectionError,
}

/// Misuse of the controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ControllerStateError {
    #[error("pipeline is not running (state: {state})")]
    NotRunning { state: &'static str },

    #[error("ingestion queue is closed")]
    QueueClosed,
}
