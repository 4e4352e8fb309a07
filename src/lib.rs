pub mod app;
pub mod batch;
pub mod cache;
pub mod cli;
pub mod constants;
pub mod geocoding;
pub mod research;
pub mod utils;

pub use app::{load_config, AppState, Config};
pub use cache::{CacheManager, CacheSettings};
pub use geocoding::{AddressQuery, GeocodeResult, GeocodingService};
pub use research::{Property, PropertyResearcher, ResearchDepth, ResearchReport};
