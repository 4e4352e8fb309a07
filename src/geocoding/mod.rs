// Gateway module for geocoding - follows the Train Station Pattern
// All external access must go through this gateway

mod factory;
mod fallback;
mod providers;
mod rate_limit;
mod service;
mod traits;
mod types;
mod validation;

pub use factory::ProviderFactory;
pub use fallback::{approximate, city_center};
pub use providers::{http_client, CensusProvider, GoogleProvider, NominatimProvider};
pub use rate_limit::ProviderThrottle;
pub use service::{GeocodingOptions, GeocodingService};
pub use traits::GeocodeProvider;
pub use types::{AddressQuery, Confidence, GeocodeResult, RateLimit};
pub use validation::{BoundingBox, CoordinateValidator, SuspectCenter};
