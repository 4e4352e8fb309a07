use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::fallback::approximate;
use super::rate_limit::ProviderThrottle;
use super::traits::GeocodeProvider;
use super::types::{AddressQuery, GeocodeResult};
use super::validation::CoordinateValidator;
use crate::batch::{unique_keys, BatchResult, Outcome, Pacing};
use crate::cache::CacheManager;
use crate::constants::{DEFAULT_MAP_CENTER, GEOCODE_BATCH_JITTER_MS, GEOCODE_DATA_TYPE};
use crate::utils::{GeocodeError, ProviderError};

/// Tunables for [`GeocodingService`]
#[derive(Debug, Clone)]
pub struct GeocodingOptions {
    /// Center used for approximations when the city is unknown
    pub default_center: (f64, f64),
    pub validator: CoordinateValidator,
    /// Start-up jitter for batch items
    pub pacing: Pacing,
}

impl Default for GeocodingOptions {
    fn default() -> Self {
        Self {
            default_center: DEFAULT_MAP_CENTER,
            validator: CoordinateValidator::default(),
            pacing: Pacing::from_millis(GEOCODE_BATCH_JITTER_MS),
        }
    }
}

struct ProviderSlot {
    provider: Arc<dyn GeocodeProvider>,
    throttle: ProviderThrottle,
}

/// Address -> coordinates with cached, rate-limited, multi-provider fallback
pub struct GeocodingService {
    /// In priority order
    providers: Vec<ProviderSlot>,
    cache: Option<Arc<CacheManager>>,
    options: GeocodingOptions,
}

impl std::fmt::Debug for GeocodingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeocodingService")
            .field("providers", &self.provider_names())
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl GeocodingService {
    /// `providers` are tried in the given order
    pub fn new(
        providers: Vec<Arc<dyn GeocodeProvider>>,
        cache: Option<Arc<CacheManager>>,
        options: GeocodingOptions,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| ProviderSlot {
                throttle: ProviderThrottle::new(provider.rate_limit()),
                provider,
            })
            .collect();
        Self {
            providers,
            cache,
            options,
        }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|s| s.provider.name()).collect()
    }

    pub fn validator(&self) -> &CoordinateValidator {
        &self.options.validator
    }

    /// Preferred provider first (when configured), then the rest in priority order
    fn provider_order(&self, preferred: Option<&str>) -> Vec<&ProviderSlot> {
        let mut order: Vec<&ProviderSlot> = Vec::with_capacity(self.providers.len());
        if let Some(name) = preferred {
            match self.providers.iter().find(|s| s.provider.name() == name) {
                Some(slot) => order.push(slot),
                None => debug!(provider = name, "preferred provider not configured"),
            }
        }
        for slot in &self.providers {
            if !order.iter().any(|s| std::ptr::eq(*s, slot)) {
                order.push(slot);
            }
        }
        order
    }

    /// Geocode an address, always producing a usable result.
    ///
    /// The only error is an address with no components at all.
    pub async fn geocode_address(
        &self,
        query: &AddressQuery,
        preferred_provider: Option<&str>,
        use_cache: bool,
    ) -> Result<GeocodeResult, GeocodeError> {
        let full_address = query.full_address().ok_or(GeocodeError::EmptyAddress)?;
        let cache_key = query.cache_key().ok_or(GeocodeError::EmptyAddress)?;

        if use_cache {
            if let Some(cache) = &self.cache {
                if let Some(cached) = cache.get_as::<GeocodeResult>(&cache_key, GEOCODE_DATA_TYPE) {
                    debug!(address = %full_address, "geocode cache hit");
                    return Ok(cached);
                }
            }
        }

        let mut failures: Vec<ProviderError> = Vec::new();
        let mut resolved = None;
        for slot in self.provider_order(preferred_provider) {
            match self.try_provider(slot, &full_address).await {
                Ok(result) => {
                    resolved = Some(result);
                    break;
                }
                Err(e) => {
                    debug!(error = %e, "provider failed, trying next");
                    failures.push(e);
                }
            }
        }

        let result = match resolved {
            Some(result) => result,
            None => {
                if !failures.is_empty() {
                    warn!(
                        address = %full_address,
                        attempts = failures.len(),
                        "all geocoding providers failed, approximating"
                    );
                }
                approximate(query, self.options.default_center)
            }
        };

        if use_cache {
            if let Some(cache) = &self.cache {
                cache.set_as(&cache_key, &result, GEOCODE_DATA_TYPE);
            }
        }

        Ok(result)
    }

    async fn try_provider(
        &self,
        slot: &ProviderSlot,
        full_address: &str,
    ) -> Result<GeocodeResult, ProviderError> {
        let name = slot.provider.name();
        slot.throttle.acquire(name).await?;

        let result = slot.provider.geocode(full_address).await?;
        self.options
            .validator
            .check(result.latitude, result.longitude)
            .map_err(|message| ProviderError::InvalidResponse {
                provider: name.to_string(),
                message,
            })?;
        Ok(result)
    }

    /// Geocode many addresses with at most `concurrency` in flight.
    ///
    /// Every item runs as its own task; a failure (or panic) in one item is
    /// recorded for that item only.
    pub async fn batch_geocode(
        self: &Arc<Self>,
        items: Vec<(String, AddressQuery)>,
        concurrency: usize,
        preferred_provider: Option<String>,
        use_cache: bool,
    ) -> BatchResult<GeocodeResult> {
        let concurrency = concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let keys = unique_keys(items.iter().map(|(key, _)| key.clone()));
        let total = items.len();

        let handles: Vec<_> = items
            .into_iter()
            .zip(keys)
            .enumerate()
            .map(|(index, ((_, query), key))| {
                let service = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                let preferred = preferred_provider.clone();
                let delay = self.options.pacing.delay_for(index, concurrency);
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _permit = semaphore.acquire_owned().await.map_err(|e| e.to_string())?;
                    service
                        .geocode_address(&query, preferred.as_deref(), use_cache)
                        .await
                        .map_err(|e| e.to_string())
                });
                (key, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(total);
        for (key, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => Outcome::from(result),
                Err(join_error) => Outcome::failure(format!("geocode task failed: {}", join_error)),
            };
            outcomes.push((key, outcome));
        }

        let result = BatchResult::from_outcomes(outcomes);
        info!(
            total = result.stats.total,
            success = result.stats.success,
            errors = result.stats.errors,
            "batch geocode finished"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSettings;
    use crate::geocoding::types::{Confidence, RateLimit};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Provider that replays a fixed response
    struct StubProvider {
        name: String,
        response: Result<(f64, f64), ProviderError>,
        rate_limit: RateLimit,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn ok(name: &str, lat: f64, lon: f64) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                response: Ok((lat, lon)),
                rate_limit: RateLimit::default(),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                response: Err(ProviderError::Network {
                    provider: name.to_string(),
                    message: "connection refused".into(),
                }),
                rate_limit: RateLimit::default(),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GeocodeProvider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn rate_limit(&self) -> RateLimit {
            self.rate_limit
        }

        async fn geocode(&self, _address: &str) -> Result<GeocodeResult, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone().map(|(lat, lon)| {
                GeocodeResult::from_provider(&self.name, lat, lon, Confidence::High, None)
            })
        }
    }

    fn options() -> GeocodingOptions {
        GeocodingOptions {
            pacing: Pacing::none(),
            ..GeocodingOptions::default()
        }
    }

    fn service(providers: Vec<Arc<dyn GeocodeProvider>>) -> GeocodingService {
        GeocodingService::new(providers, None, options())
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider() {
        let a = StubProvider::failing("A");
        let b = StubProvider::ok("B", 32.77, -96.79);
        let svc = service(vec![a.clone(), b.clone()]);

        let result = svc
            .geocode_address(&AddressQuery::new("1 Elm St", "Dallas", "TX"), None, false)
            .await
            .unwrap();

        assert_eq!(result.provider.as_deref(), Some("B"));
        assert!(!result.approximate);
        assert_eq!(result.latitude, 32.77);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_preferred_provider_goes_first() {
        let a = StubProvider::ok("A", 10.0, 10.0);
        let b = StubProvider::ok("B", 20.0, 20.0);
        let svc = service(vec![a.clone(), b.clone()]);

        let result = svc
            .geocode_address(&AddressQuery::new("1 Elm St", "Dallas", "TX"), Some("B"), false)
            .await
            .unwrap();
        assert_eq!(result.provider.as_deref(), Some("B"));
        assert_eq!(a.calls(), 0);

        // Unknown preference falls back to the configured order
        let result = svc
            .geocode_address(&AddressQuery::new("1 Elm St", "Dallas", "TX"), Some("zzz"), false)
            .await
            .unwrap();
        assert_eq!(result.provider.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn test_invalid_coordinates_are_skipped() {
        let null_island = StubProvider::ok("A", 0.0, 0.0);
        let b = StubProvider::ok("B", 30.0, -97.0);
        let svc = service(vec![null_island, b]);

        let result = svc
            .geocode_address(&AddressQuery::new("1 Elm St", "Austin", "TX"), None, false)
            .await
            .unwrap();
        assert_eq!(result.provider.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_degrades_to_city_center_without_providers() {
        let svc = service(vec![]);
        let result = svc
            .geocode_address(&AddressQuery::new("1 Main St", "Austin", "TX"), None, true)
            .await
            .unwrap();

        assert!(result.approximate);
        assert_eq!(result.confidence, Confidence::Low);
        assert!((result.latitude - 30.2672).abs() <= 0.0100001);
        assert!((result.longitude - -97.7431).abs() <= 0.0100001);
    }

    #[tokio::test]
    async fn test_all_providers_failing_unknown_city() {
        let svc = service(vec![StubProvider::failing("A"), StubProvider::failing("B")]);
        let result = svc
            .geocode_address(&AddressQuery::new("1 Main St", "Smallville", "KS"), None, false)
            .await
            .unwrap();
        assert_eq!(result.confidence, Confidence::VeryLow);
        assert!(result.approximate);
        assert_eq!(result.provider, None);
    }

    #[tokio::test]
    async fn test_empty_address_is_rejected() {
        let svc = service(vec![]);
        let err = svc
            .geocode_address(&AddressQuery::default(), None, true)
            .await
            .unwrap_err();
        assert_eq!(err, GeocodeError::EmptyAddress);
    }

    #[tokio::test]
    async fn test_results_and_approximations_are_cached() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(CacheManager::new(CacheSettings {
            directory: Some(dir.path().to_path_buf()),
            sweep_interval: Duration::ZERO,
            ..CacheSettings::default()
        }));
        let failing = StubProvider::failing("A");
        let svc = GeocodingService::new(vec![failing.clone()], Some(cache), options());
        let query = AddressQuery::new("404 Nowhere Rd", "Austin", "TX");

        let first = svc.geocode_address(&query, None, true).await.unwrap();
        let second = svc.geocode_address(&query, None, true).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(failing.calls(), 1);

        // Bypassing the cache hits providers again
        svc.geocode_address(&query, None, false).await.unwrap();
        assert_eq!(failing.calls(), 2);
    }

    #[tokio::test]
    async fn test_daily_quota_triggers_fallback() {
        let limited = Arc::new(StubProvider {
            name: "A".into(),
            response: Ok((10.0, 10.0)),
            rate_limit: RateLimit {
                min_interval: Duration::ZERO,
                daily_quota: Some(1),
            },
            calls: AtomicUsize::new(0),
        });
        let b = StubProvider::ok("B", 20.0, 20.0);
        let svc = service(vec![limited.clone(), b]);
        let query = AddressQuery::new("1 Elm St", "Dallas", "TX");

        let first = svc.geocode_address(&query, None, false).await.unwrap();
        let second = svc.geocode_address(&query, None, false).await.unwrap();
        assert_eq!(first.provider.as_deref(), Some("A"));
        assert_eq!(second.provider.as_deref(), Some("B"));
        assert_eq!(limited.calls(), 1);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let svc = Arc::new(service(vec![StubProvider::ok("A", 30.0, -97.0)]));
        let items: Vec<(String, AddressQuery)> = (0..5)
            .map(|i| {
                let query = if i == 2 {
                    AddressQuery::default()
                } else {
                    AddressQuery::new(&format!("{} Main St", i), "Austin", "TX")
                };
                (format!("p{}", i), query)
            })
            .collect();

        let result = svc.batch_geocode(items, 2, None, false).await;

        assert_eq!(result.stats.total, 5);
        assert_eq!(result.stats.success, 4);
        assert_eq!(result.stats.errors, 1);
        assert_eq!(result.per_item.len(), 5);
        assert_eq!(
            result.per_item["p2"].error(),
            Some("No address components to geocode")
        );
        assert!(result.per_item["p0"].is_success());
    }
}
