// src/ingest/feed.rs
use anyhow::{Context, Result};
use std::collections::VecDeque;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;

use crate::signal::RawContentItem;

/// A pull interface over one platform collector.
///
/// `Ok(None)` means the feed is exhausted. Errors are per-item: the caller
/// logs them and keeps pulling.
#[async_trait::async_trait]
pub trait SourceFeed: Send {
    async fn next_item(&mut self) -> Result<Option<RawContentItem>>;
    fn name(&self) -> &str;
}

/// Feed over an in-memory sequence; mostly for tests and replays.
pub struct IterFeed {
    name: String,
    items: VecDeque<RawContentItem>,
}

impl IterFeed {
    pub fn new(name: impl Into<String>, items: impl IntoIterator<Item = RawContentItem>) -> Self {
        Self {
            name: name.into(),
            items: items.into_iter().collect(),
        }
    }
}

#[async_trait::async_trait]
impl SourceFeed for IterFeed {
    async fn next_item(&mut self) -> Result<Option<RawContentItem>> {
        Ok(self.items.pop_front())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Bridges push-style producers (webhooks, queues) into the pull interface.
pub struct ChannelFeed {
    name: String,
    rx: mpsc::Receiver<RawContentItem>,
}

impl ChannelFeed {
    pub fn new(name: impl Into<String>, capacity: usize) -> (mpsc::Sender<RawContentItem>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                name: name.into(),
                rx,
            },
        )
    }
}

#[async_trait::async_trait]
impl SourceFeed for ChannelFeed {
    async fn next_item(&mut self) -> Result<Option<RawContentItem>> {
        Ok(self.rx.recv().await)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Newline-delimited JSON `RawContentItem`s from any async reader (stdin in the binary).
/// Blank lines are skipped; a malformed line is an error for that line only.
pub struct JsonLinesFeed<R> {
    name: String,
    lines: Lines<R>,
    line_no: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesFeed<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

#[async_trait::async_trait]
impl<R: AsyncBufRead + Unpin + Send> SourceFeed for JsonLinesFeed<R> {
    async fn next_item(&mut self) -> Result<Option<RawContentItem>> {
        loop {
            let Some(line) = self.lines.next_line().await.context("reading feed line")? else {
                return Ok(None);
            };
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let item = serde_json::from_str(trimmed)
                .with_context(|| format!("parsing line {} of feed {}", self.line_no, self.name))?;
            return Ok(Some(item));
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
