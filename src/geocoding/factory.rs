use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::providers::{http_client, CensusProvider, GoogleProvider, NominatimProvider};
use super::traits::GeocodeProvider;
use super::types::RateLimit;
use crate::app::GeocodingConfig;

/// Builds the ordered provider list from configuration
pub struct ProviderFactory;

impl ProviderFactory {
    /// Providers in fixed priority order: google, census, nominatim.
    /// Google is only included when its API key variable is set.
    pub fn from_config(config: &GeocodingConfig) -> Result<Vec<Arc<dyn GeocodeProvider>>> {
        let client = http_client(Duration::from_secs(config.request_timeout_secs))
            .context("Failed to build geocoding HTTP client")?;
        Self::from_config_with_key(config, client, |var| std::env::var(var).ok())
    }

    fn from_config_with_key(
        config: &GeocodingConfig,
        client: reqwest::Client,
        lookup_key: impl Fn(&str) -> Option<String>,
    ) -> Result<Vec<Arc<dyn GeocodeProvider>>> {
        let mut providers: Vec<Arc<dyn GeocodeProvider>> = Vec::new();

        let google = &config.google;
        if google.enabled {
            match lookup_key(&google.api_key_env).filter(|k| !k.trim().is_empty()) {
                Some(api_key) => providers.push(Arc::new(GoogleProvider::new(
                    client.clone(),
                    google.base_url.clone(),
                    api_key,
                    RateLimit {
                        min_interval: Duration::from_millis(google.min_interval_ms),
                        daily_quota: google.daily_quota,
                    },
                ))),
                None => debug!(var = %google.api_key_env, "google geocoder skipped, no API key"),
            }
        }

        let census = &config.census;
        if census.enabled {
            providers.push(Arc::new(CensusProvider::new(
                client.clone(),
                census.base_url.clone(),
                census.benchmark.clone(),
                RateLimit {
                    min_interval: Duration::from_millis(census.min_interval_ms),
                    daily_quota: census.daily_quota,
                },
            )));
        }

        let nominatim = &config.nominatim;
        if nominatim.enabled {
            providers.push(Arc::new(NominatimProvider::new(
                client,
                nominatim.base_url.clone(),
                nominatim.user_agent.clone(),
                RateLimit {
                    min_interval: Duration::from_millis(nominatim.min_interval_ms),
                    daily_quota: nominatim.daily_quota,
                },
            )));
        }

        if let Some(preferred) = &config.preferred_provider {
            if !providers.iter().any(|p| p.name() == preferred) {
                warn!(
                    preferred = %preferred,
                    available = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
                    "preferred geocoding provider not enabled, using priority order"
                );
            }
        }

        info!(
            providers = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "geocoding providers configured"
        );
        Ok(providers)
    }
}
