use async_trait::async_trait;

use super::types::{GeocodeResult, RateLimit};
use crate::utils::ProviderError;

/// Core trait that all geocoding backends must implement
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// Stable provider name, used for preference and attribution
    fn name(&self) -> &str;

    /// Pacing limits the service must respect for this provider
    fn rate_limit(&self) -> RateLimit {
        RateLimit::default()
    }

    /// Resolve a full address string
    async fn geocode(&self, address: &str) -> Result<GeocodeResult, ProviderError>;
}
