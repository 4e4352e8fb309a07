use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::traits::GeocodeProvider;
use super::types::{Confidence, GeocodeResult, RateLimit};
use crate::utils::ProviderError;

/// Google Geocoding API
pub struct GoogleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    rate_limit: RateLimit,
}

impl GoogleProvider {
    pub const NAME: &'static str = "google";

    pub fn new(client: Client, base_url: String, api_key: String, rate_limit: RateLimit) -> Self {
        Self {
            client,
            base_url,
            api_key,
            rate_limit,
        }
    }
}

impl std::fmt::Debug for GoogleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleProvider")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    status: String,
    #[serde(default)]
    results: Vec<GoogleResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleResult {
    formatted_address: Option<String>,
    geometry: GoogleGeometry,
}

#[derive(Debug, Deserialize)]
struct GoogleGeometry {
    location: GoogleLocation,
    location_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleLocation {
    lat: f64,
    lng: f64,
}

fn parse_google(body: GoogleResponse, quota: u32) -> Result<GeocodeResult, ProviderError> {
    let provider = GoogleProvider::NAME;
    match body.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => {
            return Err(ProviderError::NoResults {
                provider: provider.to_string(),
            })
        }
        "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => {
            return Err(ProviderError::QuotaExceeded {
                provider: provider.to_string(),
                quota,
            })
        }
        other => {
            return Err(ProviderError::InvalidResponse {
                provider: provider.to_string(),
                message: body
                    .error_message
                    .unwrap_or_else(|| format!("status {}", other)),
            })
        }
    }

    let first = body
        .results
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::NoResults {
            provider: provider.to_string(),
        })?;

    let confidence = match first.geometry.location_type.as_deref() {
        Some("ROOFTOP") => Confidence::High,
        Some("RANGE_INTERPOLATED") => Confidence::Medium,
        _ => Confidence::Low,
    };

    Ok(GeocodeResult::from_provider(
        provider,
        first.geometry.location.lat,
        first.geometry.location.lng,
        confidence,
        first.formatted_address,
    ))
}

#[async_trait]
impl GeocodeProvider for GoogleProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn rate_limit(&self) -> RateLimit {
        self.rate_limit
    }

    async fn geocode(&self, address: &str) -> Result<GeocodeResult, ProviderError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("address", address), ("key", self.api_key.as_str())])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::from_reqwest(Self::NAME, e))?;

        let body: GoogleResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                provider: Self::NAME.to_string(),
                message: e.to_string(),
            })?;

        parse_google(body, self.rate_limit.daily_quota.unwrap_or_default())
    }
}

/// US Census Bureau one-line address geocoder (no key required)
#[derive(Debug)]
pub struct CensusProvider {
    client: Client,
    base_url: String,
    benchmark: String,
    rate_limit: RateLimit,
}

impl CensusProvider {
    pub const NAME: &'static str = "census";

    pub fn new(client: Client, base_url: String, benchmark: String, rate_limit: RateLimit) -> Self {
        Self {
            client,
            base_url,
            benchmark,
            rate_limit,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CensusResponse {
    result: CensusResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CensusResult {
    #[serde(default)]
    address_matches: Vec<CensusMatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CensusMatch {
    matched_address: Option<String>,
    coordinates: CensusCoordinates,
}

/// x is longitude, y is latitude
#[derive(Debug, Deserialize)]
struct CensusCoordinates {
    x: f64,
    y: f64,
}

fn parse_census(body: CensusResponse) -> Result<GeocodeResult, ProviderError> {
    let matches = body.result.address_matches;
    let confidence = if matches.len() == 1 {
        Confidence::High
    } else {
        Confidence::Medium
    };
    let first = matches
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::NoResults {
            provider: CensusProvider::NAME.to_string(),
        })?;

    Ok(GeocodeResult::from_provider(
        CensusProvider::NAME,
        first.coordinates.y,
        first.coordinates.x,
        confidence,
        first.matched_address,
    ))
}

#[async_trait]
impl GeocodeProvider for CensusProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn rate_limit(&self) -> RateLimit {
        self.rate_limit
    }

    async fn geocode(&self, address: &str) -> Result<GeocodeResult, ProviderError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("address", address),
                ("benchmark", self.benchmark.as_str()),
                ("format", "json"),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::from_reqwest(Self::NAME, e))?;

        let body: CensusResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: Self::NAME.to_string(),
                    message: e.to_string(),
                })?;

        parse_census(body)
    }
}

/// OpenStreetMap Nominatim search API
#[derive(Debug)]
pub struct NominatimProvider {
    client: Client,
    base_url: String,
    user_agent: String,
    rate_limit: RateLimit,
}

impl NominatimProvider {
    pub const NAME: &'static str = "nominatim";

    pub fn new(client: Client, base_url: String, user_agent: String, rate_limit: RateLimit) -> Self {
        Self {
            client,
            base_url,
            user_agent,
            rate_limit,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    display_name: Option<String>,
    importance: Option<f64>,
}

fn parse_nominatim(places: Vec<NominatimPlace>) -> Result<GeocodeResult, ProviderError> {
    let provider = NominatimProvider::NAME;
    let first = places
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::NoResults {
            provider: provider.to_string(),
        })?;

    let parse = |raw: &str| {
        raw.trim()
            .parse::<f64>()
            .map_err(|e| ProviderError::InvalidResponse {
                provider: provider.to_string(),
                message: format!("bad coordinate {:?}: {}", raw, e),
            })
    };
    let latitude = parse(&first.lat)?;
    let longitude = parse(&first.lon)?;

    let confidence = match first.importance {
        Some(i) if i >= 0.6 => Confidence::High,
        Some(i) if i >= 0.4 => Confidence::Medium,
        _ => Confidence::Low,
    };

    Ok(GeocodeResult::from_provider(
        provider,
        latitude,
        longitude,
        confidence,
        first.display_name,
    ))
}

#[async_trait]
impl GeocodeProvider for NominatimProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn rate_limit(&self) -> RateLimit {
        self.rate_limit
    }

    async fn geocode(&self, address: &str) -> Result<GeocodeResult, ProviderError> {
        let response = self
            .client
            .get(&self.base_url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProviderError::from_reqwest(Self::NAME, e))?;

        let places: Vec<NominatimPlace> =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    provider: Self::NAME.to_string(),
                    message: e.to_string(),
                })?;

        parse_nominatim(places)
    }
}

/// Shared HTTP client with a per-request timeout
pub fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder().timeout(timeout).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_google_rooftop() {
        let body: GoogleResponse = serde_json::from_value(json!({
            "status": "OK",
            "results": [{
                "formatted_address": "1 Main St, Austin, TX 78701, USA",
                "geometry": {
                    "location": {"lat": 30.2672, "lng": -97.7431},
                    "location_type": "ROOFTOP"
                }
            }]
        }))
        .unwrap();
        let result = parse_google(body, 100).unwrap();
        assert_eq!(result.provider.as_deref(), Some("google"));
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.latitude, 30.2672);
        assert!(!result.approximate);
    }

    #[test]
    fn test_parse_google_statuses() {
        let zero: GoogleResponse =
            serde_json::from_value(json!({"status": "ZERO_RESULTS", "results": []})).unwrap();
        assert!(matches!(parse_google(zero, 1), Err(ProviderError::NoResults { .. })));

        let limited: GoogleResponse =
            serde_json::from_value(json!({"status": "OVER_QUERY_LIMIT"})).unwrap();
        assert!(matches!(
            parse_google(limited, 1),
            Err(ProviderError::QuotaExceeded { .. })
        ));

        let denied: GoogleResponse = serde_json::from_value(
            json!({"status": "REQUEST_DENIED", "error_message": "bad key"}),
        )
        .unwrap();
        assert_eq!(
            parse_google(denied, 1),
            Err(ProviderError::InvalidResponse {
                provider: "google".into(),
                message: "bad key".into()
            })
        );
    }

    #[test]
    fn test_parse_census_swaps_axes() {
        let body: CensusResponse = serde_json::from_value(json!({
            "result": {
                "addressMatches": [{
                    "matchedAddress": "1 MAIN ST, AUSTIN, TX, 78701",
                    "coordinates": {"x": -97.74, "y": 30.26}
                }]
            }
        }))
        .unwrap();
        let result = parse_census(body).unwrap();
        assert_eq!(result.latitude, 30.26);
        assert_eq!(result.longitude, -97.74);
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn test_parse_nominatim() {
        let places: Vec<NominatimPlace> = serde_json::from_value(json!([
            {"lat": "30.2672", "lon": "-97.7431", "display_name": "Austin", "importance": 0.45}
        ]))
        .unwrap();
        let result = parse_nominatim(places).unwrap();
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.longitude, -97.7431);

        assert!(matches!(
            parse_nominatim(vec![]),
            Err(ProviderError::NoResults { .. })
        ));

        let bad: Vec<NominatimPlace> =
            serde_json::from_value(json!([{"lat": "north", "lon": "1"}])).unwrap();
        assert!(matches!(
            parse_nominatim(bad),
            Err(ProviderError::InvalidResponse { .. })
        ));
    }
}
