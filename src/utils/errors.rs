use std::time::Duration;
use thiserror::Error;

/// Disk-tier cache failures. Never escape the cache manager.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single geocoding provider. Always recoverable by falling back.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("{provider}: daily quota of {quota} requests exceeded")]
    QuotaExceeded { provider: String, quota: u32 },

    #[error("{provider}: request timed out")]
    Timeout { provider: String },

    #[error("{provider}: network error: {message}")]
    Network { provider: String, message: String },

    #[error("{provider}: HTTP {status}")]
    Http { provider: String, status: u16 },

    #[error("{provider}: no results")]
    NoResults { provider: String },

    #[error("{provider}: invalid response: {message}")]
    InvalidResponse { provider: String, message: String },
}

impl ProviderError {
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout {
                provider: provider.to_string(),
            }
        } else if let Some(status) = err.status() {
            ProviderError::Http {
                provider: provider.to_string(),
                status: status.as_u16(),
            }
        } else {
            ProviderError::Network {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeocodeError {
    #[error("No address components to geocode")]
    EmptyAddress,
}

/// Per-property research failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResearchError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Research timed out after {0:?}")]
    Timeout(Duration),

    #[error("Research task failed: {0}")]
    Internal(String),
}

impl ResearchError {
    /// Whether another attempt could succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, ResearchError::Validation(_))
    }
}

/// Research backend failures, returned as values rather than raised
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Research backend not configured")]
    NotConfigured,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_permanent() {
        assert!(!ResearchError::Validation("no address".into()).is_transient());
        assert!(ResearchError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(ResearchError::Internal("panic".into()).is_transient());
    }

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::QuotaExceeded {
            provider: "google".into(),
            quota: 10,
        };
        assert_eq!(err.to_string(), "google: daily quota of 10 requests exceeded");
    }
}
