use once_cell::sync::Lazy;
use rand::Rng;
use std::collections::HashMap;

use super::types::{AddressQuery, Confidence, GeocodeResult};
use crate::constants::{APPROX_CITY_JITTER_DEG, APPROX_DEFAULT_JITTER_DEG};

/// (city, state, latitude, longitude)
const CITY_CENTERS: &[(&str, &str, f64, f64)] = &[
    ("Austin", "TX", 30.2672, -97.7431),
    ("Houston", "TX", 29.7604, -95.3698),
    ("Dallas", "TX", 32.7767, -96.7970),
    ("San Antonio", "TX", 29.4241, -98.4936),
    ("Fort Worth", "TX", 32.7555, -97.3308),
    ("El Paso", "TX", 31.7619, -106.4850),
    ("New York", "NY", 40.7128, -74.0060),
    ("Los Angeles", "CA", 34.0522, -118.2437),
    ("San Francisco", "CA", 37.7749, -122.4194),
    ("San Diego", "CA", 32.7157, -117.1611),
    ("Chicago", "IL", 41.8781, -87.6298),
    ("Phoenix", "AZ", 33.4484, -112.0740),
    ("Philadelphia", "PA", 39.9526, -75.1652),
    ("Denver", "CO", 39.7392, -104.9903),
    ("Seattle", "WA", 47.6062, -122.3321),
    ("Portland", "OR", 45.5152, -122.6784),
    ("Portland", "ME", 43.6591, -70.2568),
    ("Miami", "FL", 25.7617, -80.1918),
    ("Orlando", "FL", 28.5383, -81.3792),
    ("Tampa", "FL", 27.9506, -82.4572),
    ("Atlanta", "GA", 33.7490, -84.3880),
    ("Boston", "MA", 42.3601, -71.0589),
    ("Nashville", "TN", 36.1627, -86.7816),
    ("Charlotte", "NC", 35.2271, -80.8431),
    ("Las Vegas", "NV", 36.1699, -115.1398),
    ("Washington", "DC", 38.9072, -77.0369),
    ("Kansas City", "MO", 39.0997, -94.5786),
    ("Kansas City", "KS", 39.1141, -94.6275),
];

/// Lower-cased city name -> [(state, lat, lon)]
static CITY_INDEX: Lazy<HashMap<String, Vec<(&'static str, f64, f64)>>> = Lazy::new(|| {
    let mut index: HashMap<String, Vec<(&'static str, f64, f64)>> = HashMap::new();
    for (city, state, lat, lon) in CITY_CENTERS {
        index
            .entry(city.to_lowercase())
            .or_default()
            .push((*state, *lat, *lon));
    }
    index
});

/// Reference point for a known city; a given state must match
pub fn city_center(city: &str, state: Option<&str>) -> Option<(f64, f64)> {
    let candidates = CITY_INDEX.get(&city.trim().to_lowercase())?;
    let state = state.map(str::trim).filter(|s| !s.is_empty());
    candidates
        .iter()
        .find(|(s, _, _)| state.map_or(true, |wanted| s.eq_ignore_ascii_case(wanted)))
        .map(|(_, lat, lon)| (*lat, *lon))
}

fn jitter(spread: f64) -> f64 {
    rand::thread_rng().gen_range(-spread..=spread)
}

/// Synthesize a usable result when no provider produced one
pub fn approximate(query: &AddressQuery, default_center: (f64, f64)) -> GeocodeResult {
    let known = query
        .city
        .as_deref()
        .and_then(|city| city_center(city, query.state.as_deref()));

    let (center, spread, confidence) = match known {
        Some(center) => (center, APPROX_CITY_JITTER_DEG, Confidence::Low),
        None => (default_center, APPROX_DEFAULT_JITTER_DEG, Confidence::VeryLow),
    };

    GeocodeResult {
        latitude: (center.0 + jitter(spread)).clamp(-90.0, 90.0),
        longitude: (center.1 + jitter(spread)).clamp(-180.0, 180.0),
        confidence,
        provider: None,
        approximate: true,
        formatted_address: query.full_address(),
    }
}
