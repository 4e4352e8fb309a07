use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::app::Config;
use crate::cache::CacheManager;
use crate::geocoding::{http_client, GeocodingService, ProviderFactory};
use crate::research::{
    Enrichers, HttpResearchBackend, MemoryPropertyStore, NoopResearchBackend, PropertyResearcher,
    ResearchBackend,
};

/// Application services, built once from configuration
pub struct AppState {
    pub config: Config,
    pub cache: Arc<CacheManager>,
    pub geocoder: Arc<GeocodingService>,
    pub store: Arc<MemoryPropertyStore>,
    pub researcher: Arc<PropertyResearcher>,
}

impl AppState {
    /// Construct the cache, geocoder and researcher
    pub fn open(config: Config) -> Result<Self> {
        let cache = Arc::new(CacheManager::new(config.cache.settings()));

        let providers = ProviderFactory::from_config(&config.geocoding)?;
        let geocoder = Arc::new(GeocodingService::new(
            providers,
            Some(Arc::clone(&cache)),
            config.geocoding.options(),
        ));

        let backend = Self::backend(&config)?;
        let store = Arc::new(MemoryPropertyStore::new());
        let researcher = Arc::new(PropertyResearcher::new(
            Arc::clone(&cache),
            Arc::clone(&geocoder),
            Enrichers::builtin(),
            backend,
            Some(store.clone()),
            config.research.settings(),
        ));

        info!(providers = ?geocoder.provider_names(), "application state ready");
        Ok(Self {
            config,
            cache,
            geocoder,
            store,
            researcher,
        })
    }

    fn backend(config: &Config) -> Result<Arc<dyn ResearchBackend>> {
        let backend = &config.research.backend;
        let Some(url) = backend.url.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Ok(Arc::new(NoopResearchBackend));
        };

        let api_key = std::env::var(&backend.api_key_env).ok();
        if api_key.is_none() {
            warn!(var = %backend.api_key_env, "research backend API key not set");
        }
        let client = http_client(Duration::from_secs(backend.timeout_secs))
            .context("Failed to build research backend HTTP client")?;
        Ok(Arc::new(HttpResearchBackend::new(client, url, api_key)))
    }

    /// Stop background work
    pub fn close(&self) {
        self.cache.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_and_close() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.cache.directory = Some(dir.path().to_path_buf());
        config.cache.sweep_interval_secs = 0;
        config.geocoding.google.enabled = false;

        let state = AppState::open(config).unwrap();
        assert_eq!(state.geocoder.provider_names(), vec!["census", "nominatim"]);
        assert_eq!(state.researcher.settings().retry.max_attempts, 3);
        state.close();
    }

    #[tokio::test]
    async fn test_open_with_unavailable_preferred_provider() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.cache.directory = Some(dir.path().to_path_buf());
        config.cache.sweep_interval_secs = 0;
        config.geocoding.google.enabled = false;
        config.geocoding.preferred_provider = Some("google".to_string());

        let state = AppState::open(config).unwrap();
        assert_eq!(state.geocoder.provider_names(), vec!["census", "nominatim"]);
        state.close();
    }
}
