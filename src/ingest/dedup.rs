// src/ingest/dedup.rs
//! Recent-duplicate filter.
//!
//! Collectors that poll overlapping pages hand us the same post more than once.
//! An item whose `(source, normalized content)` was already seen within the
//! dedup window is dropped. Memory is bounded by both time and capacity.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};

use crate::signal::Platform;

type Key = [u8; 16];

#[derive(Debug)]
pub struct RecentDedup {
    window: Duration,
    capacity: usize,
    order: VecDeque<(DateTime<Utc>, Key)>,
    seen: HashMap<Key, DateTime<Utc>>,
}

impl RecentDedup {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashMap::new(),
        }
    }

    /// Returns `true` if this item is a duplicate; otherwise remembers it.
    pub fn check_and_remember(&mut self, source: Platform, content: &str, now: DateTime<Utc>) -> bool {
        self.evict(now);
        let key = key_for(source, content);
        if self.seen.contains_key(&key) {
            return true;
        }
        self.seen.insert(key, now);
        self.order.push_back((now, key));
        while self.order.len() > self.capacity {
            if let Some((_, k)) = self.order.pop_front() {
                self.seen.remove(&k);
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while let Some(&(t, k)) = self.order.front() {
            if t < cutoff {
                self.order.pop_front();
                self.seen.remove(&k);
            } else {
                break;
            }
        }
    }
}

fn key_for(source: Platform, content: &str) -> Key {
    let mut hasher = Sha256::new();
    hasher.update(source.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}
