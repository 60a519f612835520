use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

/// A single failed delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based attempt number.
    pub attempt: u8,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone)]
pub enum RetryDecision {
    Retry { attempt: u8, delay: Duration },
    Exhausted { history: Vec<RetryAttempt> },
}

#[derive(Debug)]
struct Entry {
    history: Vec<RetryAttempt>,
    touched: Instant,
}

/// Backoff settings used by [`RetryTracker`].
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base_ms: u64,
    pub max_ms: u64,
}

/// Tracks failed delivery attempts per message id.
#[derive(Debug)]
pub struct RetryTracker {
    entries: HashMap<String, Entry>,
    max_retries: u8,
    backoff: Backoff,
}

impl RetryTracker {
    pub fn new(max_retries: u8, backoff: Backoff) -> Self {
        Self {
            entries: HashMap::new(),
            max_retries,
            backoff,
        }
    }

    /// Record a failure and decide whether the caller should try again.
    pub fn record_failure(&mut self, id: &str, error: &str) -> RetryDecision {
        let entry = self.entries.entry(id.to_string()).or_insert_with(|| Entry {
            history: Vec::new(),
            touched: Instant::now(),
        });

        let attempt = entry.history.len() as u8 + 1;
        entry.touched = Instant::now();
        entry.history.push(RetryAttempt {
            attempt,
            error: error.to_string(),
            timestamp: Utc::now(),
        });

        if attempt <= self.max_retries {
            RetryDecision::Retry {
                attempt,
                delay: calculate_backoff(attempt, self.backoff.base_ms, self.backoff.max_ms),
            }
        } else {
            let history = self
                .entries
                .remove(id)
                .map(|e| e.history)
                .unwrap_or_default();
            RetryDecision::Exhausted { history }
        }
    }

    pub fn clear(&mut self, id: &str) {
        self.entries.remove(id);
    }

    pub fn attempts(&self, id: &str) -> u8 {
        self.entries
            .get(id)
            .map(|e| e.history.len() as u8)
            .unwrap_or(0)
    }

    /// Drop entries not touched within `max_age`. Returns how many were removed.
    pub fn purge_stale(&mut self, max_age: Duration) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries
            .retain(|_, e| now.duration_since(e.touched) < max_age);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Exponential backoff with 0-25% jitter.
///
/// Formula: `min(base_ms * 2^(attempt-1) + jitter, max_ms)`
pub fn calculate_backoff(attempt: u8, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exp_factor = 2u64.saturating_pow((attempt - 1) as u32);
    let delay_ms = base_ms.saturating_mul(exp_factor);

    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };

    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}

/// Periodically purge stale tracker entries left behind by crashed handlers.
pub fn spawn_purge_task(
    tracker: Arc<Mutex<RetryTracker>>,
    interval: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = tracker.lock().await.purge_stale(max_age);
            if removed > 0 {
                info!(removed, "Purged stale retry tracker entries");
            }
        }
    })
}
