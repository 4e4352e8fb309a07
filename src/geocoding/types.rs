use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::FileCache;

/// How much a geocode can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    VeryLow,
}

/// Coordinates for an address, from a provider or approximated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeResult {
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: Confidence,
    /// Provider that produced the result; `None` when approximated
    pub provider: Option<String>,
    pub approximate: bool,
    pub formatted_address: Option<String>,
}

impl GeocodeResult {
    pub fn from_provider(
        provider: &str,
        latitude: f64,
        longitude: f64,
        confidence: Confidence,
        formatted_address: Option<String>,
    ) -> Self {
        Self {
            latitude,
            longitude,
            confidence,
            provider: Some(provider.to_string()),
            approximate: false,
            formatted_address,
        }
    }
}

/// Address components to geocode
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressQuery {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
}

impl AddressQuery {
    pub fn new(address: &str, city: &str, state: &str) -> Self {
        Self {
            address: Some(address.to_string()),
            city: Some(city.to_string()),
            state: Some(state.to_string()),
            zip_code: None,
        }
    }

    /// Non-empty components joined by ", " with whitespace collapsed
    pub fn full_address(&self) -> Option<String> {
        let parts: Vec<String> = [&self.address, &self.city, &self.state, &self.zip_code]
            .into_iter()
            .flatten()
            .map(|part| part.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|part| !part.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }

    /// Cache key derived from a hash of the normalized full address
    pub fn cache_key(&self) -> Option<String> {
        self.full_address()
            .map(|full| format!("geocode:{}", FileCache::hash_key(&full.to_lowercase())))
    }
}

/// Per-provider pacing limits
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateLimit {
    /// Minimum spacing between two requests to the provider
    pub min_interval: Duration,
    /// Requests allowed per UTC day
    pub daily_quota: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_address_skips_empty_parts() {
        let query = AddressQuery {
            address: Some("  1  Main   St ".into()),
            city: Some("".into()),
            state: Some("TX".into()),
            zip_code: None,
        };
        assert_eq!(query.full_address().as_deref(), Some("1 Main St, TX"));
        assert_eq!(AddressQuery::default().full_address(), None);
        assert_eq!(AddressQuery::default().cache_key(), None);
    }

    #[test]
    fn test_cache_key_is_case_insensitive() {
        let a = AddressQuery::new("1 Main St", "Austin", "TX");
        let b = AddressQuery::new("1 MAIN ST", "austin", "tx");
        assert_eq!(a.cache_key(), b.cache_key());
        assert!(a.cache_key().unwrap().starts_with("geocode:"));
    }

    #[test]
    fn test_confidence_wire_names() {
        assert_eq!(serde_json::to_string(&Confidence::VeryLow).unwrap(), "\"very_low\"");
    }
}
