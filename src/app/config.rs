use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::{Pacing, RetryPolicy};
use crate::cache::CacheSettings;
use crate::constants::{
    CENSUS_GEOCODE_URL, CENSUS_MIN_INTERVAL_MS, DEFAULT_GEOCODE_CONCURRENCY, DEFAULT_MAP_CENTER,
    DEFAULT_MEMORY_CACHE_LIMIT, DEFAULT_RESEARCH_CONCURRENCY, DEFAULT_SWEEP_INTERVAL_SECS,
    GEOCODE_BATCH_JITTER_MS, GOOGLE_DAILY_QUOTA, GOOGLE_GEOCODE_URL, GOOGLE_MIN_INTERVAL_MS,
    HTTP_REQUEST_TIMEOUT_SECS, MAX_RESEARCH_ATTEMPTS, NOMINATIM_MIN_INTERVAL_MS, NOMINATIM_URL,
    RESEARCH_BATCH_JITTER_MS, RESEARCH_MODULE_TIMEOUT_SECS, RESEARCH_UNIT_TIMEOUT_SECS,
    RETRY_BASE_DELAY_MS,
};
use crate::geocoding::{BoundingBox, CoordinateValidator, GeocodingOptions, SuspectCenter};
use crate::research::{ResearchDepth, ResearchSettings};

const APP_NAME: &str = "deedscout";
const ENV_PREFIX: &str = "DEEDSCOUT_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub geocoding: GeocodingConfig,

    #[serde(default)]
    pub research: ResearchConfig,
}

/// Two-tier cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disk cache directory (defaults to the platform cache dir)
    pub directory: Option<PathBuf>,
    /// Maximum entries held in memory
    pub memory_limit: usize,
    /// Background purge interval; 0 disables it
    pub sweep_interval_secs: u64,
    /// TTL overrides in days, by data type
    pub ttl_days: BTreeMap<String, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: None,
            memory_limit: DEFAULT_MEMORY_CACHE_LIMIT,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            ttl_days: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            directory: self.directory.clone().or_else(default_cache_dir),
            memory_limit: self.memory_limit,
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            ttl_overrides: self.ttl_days.clone(),
        }
    }
}

/// Map center used when nothing better is known
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MapCenter {
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for MapCenter {
    fn default() -> Self {
        Self {
            latitude: DEFAULT_MAP_CENTER.0,
            longitude: DEFAULT_MAP_CENTER.1,
        }
    }
}

/// Geocoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    /// Provider tried first (google, census, nominatim)
    pub preferred_provider: Option<String>,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
    /// Default concurrency for batch geocoding
    pub batch_concurrency: usize,
    pub default_center: MapCenter,
    /// Reject provider coordinates outside this box
    pub bounding_box: Option<BoundingBox>,
    /// Placeholder points providers return for unresolvable addresses
    pub known_bad_centers: Vec<SuspectCenter>,
    pub google: GoogleConfig,
    pub census: CensusConfig,
    pub nominatim: NominatimConfig,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            preferred_provider: None,
            request_timeout_secs: HTTP_REQUEST_TIMEOUT_SECS,
            batch_concurrency: DEFAULT_GEOCODE_CONCURRENCY,
            default_center: MapCenter::default(),
            bounding_box: None,
            known_bad_centers: Vec::new(),
            google: GoogleConfig::default(),
            census: CensusConfig::default(),
            nominatim: NominatimConfig::default(),
        }
    }
}

impl GeocodingConfig {
    pub fn options(&self) -> GeocodingOptions {
        GeocodingOptions {
            default_center: (self.default_center.latitude, self.default_center.longitude),
            validator: CoordinateValidator::new(self.bounding_box, self.known_bad_centers.clone()),
            pacing: Pacing::from_millis(GEOCODE_BATCH_JITTER_MS),
        }
    }
}

/// Google Geocoding API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub enabled: bool,
    /// Environment variable containing API key
    pub api_key_env: String,
    pub base_url: String,
    pub min_interval_ms: u64,
    pub daily_quota: Option<u32>,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key_env: "GOOGLE_MAPS_API_KEY".to_string(),
            base_url: GOOGLE_GEOCODE_URL.to_string(),
            min_interval_ms: GOOGLE_MIN_INTERVAL_MS,
            daily_quota: Some(GOOGLE_DAILY_QUOTA),
        }
    }
}

/// US Census geocoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CensusConfig {
    pub enabled: bool,
    pub base_url: String,
    pub benchmark: String,
    pub min_interval_ms: u64,
    pub daily_quota: Option<u32>,
}

impl Default for CensusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: CENSUS_GEOCODE_URL.to_string(),
            benchmark: "Public_AR_Current".to_string(),
            min_interval_ms: CENSUS_MIN_INTERVAL_MS,
            daily_quota: None,
        }
    }
}

/// OpenStreetMap Nominatim configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NominatimConfig {
    pub enabled: bool,
    pub base_url: String,
    /// Nominatim's usage policy requires an identifying user agent
    pub user_agent: String,
    pub min_interval_ms: u64,
    pub daily_quota: Option<u32>,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: NOMINATIM_URL.to_string(),
            user_agent: format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION")),
            min_interval_ms: NOMINATIM_MIN_INTERVAL_MS,
            daily_quota: None,
        }
    }
}

/// Property research configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub default_depth: ResearchDepth,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub unit_timeout_secs: u64,
    pub module_timeout_secs: u64,
    pub backend: BackendConfig,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            default_depth: ResearchDepth::Standard,
            concurrency: DEFAULT_RESEARCH_CONCURRENCY,
            max_attempts: MAX_RESEARCH_ATTEMPTS,
            retry_base_delay_ms: RETRY_BASE_DELAY_MS,
            unit_timeout_secs: RESEARCH_UNIT_TIMEOUT_SECS,
            module_timeout_secs: RESEARCH_MODULE_TIMEOUT_SECS,
            backend: BackendConfig::default(),
        }
    }
}

impl ResearchConfig {
    pub fn settings(&self) -> ResearchSettings {
        ResearchSettings {
            retry: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                base_delay: Duration::from_millis(self.retry_base_delay_ms),
            },
            unit_timeout: Duration::from_secs(self.unit_timeout_secs),
            module_timeout: Duration::from_secs(self.module_timeout_secs),
            pacing: Pacing::from_millis(RESEARCH_BATCH_JITTER_MS),
        }
    }
}

/// Remote research backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL; unset means no backend
    pub url: Option<String>,
    /// Environment variable containing API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key_env: "DEEDSCOUT_BACKEND_API_KEY".to_string(),
            timeout_secs: RESEARCH_MODULE_TIMEOUT_SECS,
        }
    }
}

/// Load configuration from multiple sources
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let config_dir = get_config_dir()?;
    let global_config = config_dir.join("config.toml");
    let local_config = PathBuf::from(format!(".{}/config.toml", APP_NAME));

    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    if global_config.exists() {
        figment = figment.merge(Toml::file(&global_config));
    }

    if local_config.exists() {
        figment = figment.merge(Toml::file(&local_config));
    }

    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        figment = figment.merge(Toml::file(path));
    }

    // DEEDSCOUT_CACHE__MEMORY_LIMIT=500 -> cache.memory_limit
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    figment.extract().context("Failed to load configuration")
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
        let config_dir = proj_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;
        Ok(config_dir.to_path_buf())
    } else {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .context("Could not determine home directory")?;
        let config_dir = PathBuf::from(home).join(".config").join(APP_NAME);
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.cache_dir().to_path_buf())
}

/// Save configuration to file
pub fn save_config(config: &Config, path: Option<PathBuf>) -> Result<()> {
    let path = if let Some(p) = path {
        p
    } else {
        get_config_dir()?.join("config.toml")
    };

    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(&path, toml_string)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(())
}

/// Create a default configuration file if it doesn't exist
pub fn init_config() -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    let config_file = get_config_dir()?.join("config.toml");

    if !config_file.exists() {
        save_config(&Config::default(), Some(config_file.clone()))?;
        created.push(config_file);
    }

    let local_example = PathBuf::from(format!(".{}/config.toml.example", APP_NAME));
    if !local_example.exists() {
        if let Some(parent) = local_example.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let example_config = r#"# deedscout project configuration
# Overrides the global config for runs from this directory

[cache]
memory_limit = 2000

[cache.ttl_days]
geocode = 60

[geocoding]
preferred_provider = "census"

[geocoding.bounding_box]
min_latitude = 24.0
max_latitude = 50.0
min_longitude = -125.0
max_longitude = -66.0

[research]
default_depth = "comprehensive"
concurrency = 5
"#;
        std::fs::write(&local_example, example_config)?;
        created.push(local_example);
    }

    Ok(created)
}
