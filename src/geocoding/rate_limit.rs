use chrono::{NaiveDate, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::types::RateLimit;
use crate::utils::ProviderError;

#[derive(Debug)]
struct UsageState {
    last_request: Option<Instant>,
    request_count: u32,
    day: NaiveDate,
}

/// Rate-limit state for one provider.
///
/// The lock is held across the wait so concurrent callers targeting the
/// same provider are spaced by at least `min_interval`.
#[derive(Debug)]
pub struct ProviderThrottle {
    limit: RateLimit,
    state: Mutex<UsageState>,
}

impl ProviderThrottle {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            state: Mutex::new(UsageState {
                last_request: None,
                request_count: 0,
                day: Utc::now().date_naive(),
            }),
        }
    }

    /// Wait for the provider's next request slot and record the request
    pub async fn acquire(&self, provider: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;

        let today = Utc::now().date_naive();
        if state.day != today {
            state.day = today;
            state.request_count = 0;
        }

        if let Some(quota) = self.limit.daily_quota {
            if state.request_count >= quota {
                return Err(ProviderError::QuotaExceeded {
                    provider: provider.to_string(),
                    quota,
                });
            }
        }

        if let Some(last) = state.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.limit.min_interval {
                tokio::time::sleep(self.limit.min_interval - elapsed).await;
            }
        }

        state.last_request = Some(Instant::now());
        state.request_count += 1;
        Ok(())
    }

    /// Requests made today
    pub async fn request_count(&self) -> u32 {
        self.state.lock().await.request_count
    }
}
