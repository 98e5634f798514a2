//! # Compliance Gate
//!
//! Message content is checked before normal delivery; flagged content
//! is routed to the guardian review queue instead. Verdicts are cached
//! by content digest with a fixed TTL so repeated content never hits
//! the checker twice within the window. Each cache entry expires
//! exactly once via its own scheduled task.
//!
//! The real moderation service lives behind [`ComplianceChecker`]; the
//! built-in [`DenylistChecker`] reproduces the heuristic contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::tasks::TimerRegistry;

/// Score assigned to content that matched the denylist.
const FLAGGED_SCORE: u8 = 30;

/// Placeholder confidence score for content with no matches.
const CLEAN_SCORE: u8 = 95;

/// Verdict for one piece of content.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceValidation {
    /// Confidence score, 0–100
    pub content_score: u8,

    /// Terms that matched
    pub flags: Vec<String>,

    /// Whether the content may be delivered directly
    pub approved: bool,

    /// Whether the content must go to guardian review
    pub review_required: bool,
}

/// The moderation collaborator.
#[async_trait]
pub trait ComplianceChecker: Send + Sync {
    async fn check(&self, content: &str, content_type: &str) -> ComplianceValidation;
}

/// Heuristic checker: case-insensitive substring match against a
/// configured denylist.
#[derive(Debug)]
pub struct DenylistChecker {
    terms: Vec<String>,
    calls: AtomicU64,
}

impl DenylistChecker {
    pub fn new(terms: Vec<String>) -> Self {
        Self {
            terms,
            calls: AtomicU64::new(0),
        }
    }

    /// How many times the heuristic actually ran (cache hits bypass it).
    pub fn check_calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ComplianceChecker for DenylistChecker {
    async fn check(&self, content: &str, _content_type: &str) -> ComplianceValidation {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let lowered = content.to_lowercase();
        let flags: Vec<String> = self
            .terms
            .iter()
            .filter(|term| lowered.contains(&term.to_lowercase()))
            .cloned()
            .collect();

        if flags.is_empty() {
            ComplianceValidation {
                content_score: CLEAN_SCORE,
                flags,
                approved: true,
                review_required: false,
            }
        } else {
            ComplianceValidation {
                content_score: FLAGGED_SCORE,
                flags,
                approved: false,
                review_required: true,
            }
        }
    }
}

/// TTL cache in front of the checker.
pub struct ComplianceCache {
    checker: Arc<dyn ComplianceChecker>,
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, ComplianceValidation>>>,
    timers: Arc<TimerRegistry>,
}

impl ComplianceCache {
    pub fn new(checker: Arc<dyn ComplianceChecker>, ttl: Duration, timers: Arc<TimerRegistry>) -> Self {
        Self {
            checker,
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
            timers,
        }
    }

    /// Validate content, consulting the cache first. A miss runs the
    /// checker and schedules the entry's one-shot expiry.
    pub async fn validate(&self, content: &str, content_type: &str) -> ComplianceValidation {
        let key = cache_key(content_type, content);

        if let Some(hit) = self
            .entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(&key).cloned())
        {
            return hit;
        }

        let verdict = self.checker.check(content, content_type).await;

        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.clone(), verdict.clone());
        }

        let entries = Arc::clone(&self.entries);
        let ttl = self.ttl;
        self.timers.spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Ok(mut entries) = entries.lock() {
                entries.remove(&key);
            }
        });

        verdict
    }

    /// Drop the cached verdict for one piece of content.
    pub fn invalidate(&self, content_type: &str, content: &str) {
        let key = cache_key(content_type, content);
        if let Ok(mut entries) = self.entries.lock() {
            if entries.remove(&key).is_some() {
                debug!(content_type, "compliance cache entry invalidated");
            }
        }
    }

    /// Drop every cached verdict.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    /// Number of cached verdicts.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache key: content type plus SHA-256 digest of the content.
fn cache_key(content_type: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();

    let mut key = String::with_capacity(content_type.len() + 1 + digest.len() * 2);
    key.push_str(content_type);
    key.push(':');
    for byte in digest {
        key.push_str(&format!("{byte:02x}"));
    }
    key
}
