//! Shared plumbing for bounded-concurrency batch runs: per-item outcomes,
//! aggregate stats, start-up jitter and retry with exponential backoff.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Error payload, serialized as `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorEntry {
    pub error: String,
}

/// Either a value or an error entry, never both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome<T> {
    Failure(ErrorEntry),
    Success(T),
}

impl<T> Outcome<T> {
    pub fn failure(message: impl Into<String>) -> Self {
        Outcome::Failure(ErrorEntry {
            error: message.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Failure(entry) => Some(&entry.error),
            Outcome::Success(_) => None,
        }
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for Outcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::failure(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total: usize,
    pub success: usize,
    pub errors: usize,
    /// Percentage in `0.0..=100.0`
    pub success_rate: f64,
}

/// Result of a batch run: one outcome per input item
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult<T> {
    pub per_item: BTreeMap<String, Outcome<T>>,
    pub stats: BatchStats,
}

impl<T> BatchResult<T> {
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = (String, Outcome<T>)>) -> Self {
        let per_item: BTreeMap<String, Outcome<T>> = outcomes.into_iter().collect();
        let total = per_item.len();
        let success = per_item.values().filter(|o| o.is_success()).count();
        let errors = total - success;
        Self {
            per_item,
            stats: BatchStats {
                total,
                success,
                errors,
                success_rate: if total > 0 {
                    success as f64 / total as f64 * 100.0
                } else {
                    0.0
                },
            },
        }
    }
}

/// Make item keys unique by suffixing duplicates with their input index
pub fn unique_keys(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    keys.into_iter()
        .enumerate()
        .map(|(index, key)| {
            if seen.insert(key.clone()) {
                key
            } else {
                let suffixed = format!("{}#{}", key, index);
                seen.insert(suffixed.clone());
                suffixed
            }
        })
        .collect()
}

/// Random start-up delay that staggers batch items by index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    pub min: Duration,
    pub max: Duration,
}

impl Pacing {
    pub fn from_millis((min, max): (u64, u64)) -> Self {
        Self {
            min: Duration::from_millis(min.min(max)),
            max: Duration::from_millis(max.max(min)),
        }
    }

    /// No jitter at all
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Delay before item `index` competes for a slot: a random draw from
    /// `min..=max` scaled by the item's position within its wave
    pub fn delay_for(&self, index: usize, concurrency: usize) -> Duration {
        let wave_position = (index % concurrency.max(1)) as u32;
        if wave_position == 0 || self.max.is_zero() {
            return Duration::ZERO;
        }
        let jitter = if self.max > self.min {
            rand::thread_rng().gen_range(self.min..=self.max)
        } else {
            self.min
        };
        jitter * wave_position
    }
}

/// Retry policy: `max_attempts` tries, sleeping `base_delay * 2^attempt` in between
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or attempts run out
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        is_retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < max_attempts && is_retryable(&e) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        label,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "attempt failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
