//! # Rate Limiter
//!
//! Per-channel token bucket with whole-window refill: the bucket holds
//! `burst_limit` tokens and refills completely when the window rolls
//! over, rather than dripping tokens in smoothly. Consulted both at
//! subscription creation and on inbound event bursts.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::RateLimitConfig;

/// Bucket state for one channel.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitState {
    /// Tokens left in the current window
    pub tokens_remaining: u32,

    /// When the bucket refills whole
    pub reset_time: DateTime<Utc>,

    /// Total requests seen, throttled or not
    pub request_count: u64,

    /// Whether the channel hit the limit in the current window
    pub is_throttled: bool,
}

/// Token-bucket limiter keyed by channel name.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, RateLimitState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one token for the channel. Returns false (and marks the
    /// bucket throttled) once the window's tokens are spent.
    pub fn allow(&self, channel: &str) -> bool {
        let now = Utc::now();
        let window = window_duration(&self.config);

        let Ok(mut buckets) = self.buckets.lock() else {
            return false;
        };

        let entry = buckets
            .entry(channel.to_string())
            .or_insert_with(|| RateLimitState {
                tokens_remaining: self.config.burst_limit,
                reset_time: now + window,
                request_count: 0,
                is_throttled: false,
            });

        // Whole-bucket refill at the window boundary
        if now >= entry.reset_time {
            entry.tokens_remaining = self.config.burst_limit;
            entry.reset_time = now + window;
            entry.is_throttled = false;
        }

        entry.request_count += 1;

        if entry.tokens_remaining == 0 {
            entry.is_throttled = true;
            return false;
        }

        entry.tokens_remaining -= 1;
        true
    }

    /// Copy of the bucket state for a channel, if it has one.
    pub fn state(&self, channel: &str) -> Option<RateLimitState> {
        self.buckets
            .lock()
            .ok()
            .and_then(|buckets| buckets.get(channel).cloned())
    }

    /// Drop bookkeeping for a channel (on unsubscribe).
    pub fn reset(&self, channel: &str) {
        if let Ok(mut buckets) = self.buckets.lock() {
            buckets.remove(channel);
        }
    }

    /// Number of channels with live buckets.
    pub fn tracked_channels(&self) -> usize {
        self.buckets.lock().map(|b| b.len()).unwrap_or(0)
    }
}

fn window_duration(config: &RateLimitConfig) -> Duration {
    Duration::milliseconds(config.window.as_millis().min(i64::MAX as u128) as i64)
}
