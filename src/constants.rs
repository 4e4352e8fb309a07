/// Constants module to avoid magic numbers in the codebase

// Cache Configuration
pub const DEFAULT_MEMORY_CACHE_LIMIT: usize = 1000;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_DATA_TYPE: &str = "default";
pub const CACHE_FILE_EXTENSION: &str = "json";
pub const CACHE_TMP_MARKER: &str = ".tmp-";

// TTL policy in days, keyed by data type
pub const DEFAULT_TTL_DAYS: &[(&str, u64)] = &[
    ("property_details", 30),
    ("investment_potential", 7),
    ("market_conditions", 7),
    ("risks", 90),
    ("research", 14),
    ("geocode", 30),
    ("default", 7),
];

// Data types used by the pipeline
pub const GEOCODE_DATA_TYPE: &str = "geocode";
pub const RESEARCH_DATA_TYPE: &str = "research";

// Timeouts
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const RESEARCH_UNIT_TIMEOUT_SECS: u64 = 300;
pub const RESEARCH_MODULE_TIMEOUT_SECS: u64 = 120;

// Geocoding
pub const APPROX_CITY_JITTER_DEG: f64 = 0.01;
pub const APPROX_DEFAULT_JITTER_DEG: f64 = 0.1;
pub const DEFAULT_MAP_CENTER: (f64, f64) = (39.8283, -98.5795); // contiguous US
pub const GEOCODE_BATCH_JITTER_MS: (u64, u64) = (100, 300);
pub const DEFAULT_GEOCODE_CONCURRENCY: usize = 3;

// Provider defaults
pub const GOOGLE_GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
pub const CENSUS_GEOCODE_URL: &str =
    "https://geocoding.geo.census.gov/geocoder/locations/onelineaddress";
pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const GOOGLE_MIN_INTERVAL_MS: u64 = 20;
pub const CENSUS_MIN_INTERVAL_MS: u64 = 200;
pub const NOMINATIM_MIN_INTERVAL_MS: u64 = 1000; // usage policy: 1 req/s
pub const GOOGLE_DAILY_QUOTA: u32 = 2500;

// Research batch
pub const DEFAULT_RESEARCH_CONCURRENCY: usize = 3;
pub const RESEARCH_BATCH_JITTER_MS: (u64, u64) = (100, 500);
pub const MAX_RESEARCH_ATTEMPTS: u32 = 3;
pub const RETRY_BASE_DELAY_MS: u64 = 1000;
