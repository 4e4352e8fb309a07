use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::collaborators::ResearchBackend;
use crate::utils::BackendError;

/// JSON-over-HTTP research service client.
///
/// Each operation is a `POST {base_url}/{endpoint}` with a JSON body.
pub struct HttpResearchBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpResearchBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResearchBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
}

impl HttpResearchBackend {
    pub fn new(client: Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value, BackendError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(%url, "research backend request");

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::Api(format!("{} from {}: {}", status, endpoint, text)));
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::Api(format!("invalid JSON from {}: {}", endpoint, e)))
    }
}

#[async_trait]
impl ResearchBackend for HttpResearchBackend {
    async fn generate_executive_summary(&self, context: &Value) -> Result<String, BackendError> {
        let value = self.post("executive-summary", context).await?;
        let parsed: SummaryResponse = serde_json::from_value(value)
            .map_err(|e| BackendError::Api(format!("unexpected summary payload: {}", e)))?;
        Ok(parsed.summary)
    }

    async fn research_property(&self, property: &Value) -> Result<Value, BackendError> {
        self.post("research", &json!({ "property": property })).await
    }

    async fn analyze_investment_potential(&self, property: &Value) -> Result<Value, BackendError> {
        self.post("investment", &json!({ "property": property })).await
    }

    async fn identify_risks(&self, property: &Value) -> Result<Value, BackendError> {
        self.post("risks", &json!({ "property": property })).await
    }

    async fn get_market_intelligence(&self, location: &Value) -> Result<Value, BackendError> {
        self.post("market", &json!({ "location": location })).await
    }
}

/// Backend used when no research service is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResearchBackend;

#[async_trait]
impl ResearchBackend for NoopResearchBackend {
    async fn generate_executive_summary(&self, _context: &Value) -> Result<String, BackendError> {
        Err(BackendError::NotConfigured)
    }

    async fn research_property(&self, _property: &Value) -> Result<Value, BackendError> {
        Err(BackendError::NotConfigured)
    }

    async fn analyze_investment_potential(&self, _property: &Value) -> Result<Value, BackendError> {
        Err(BackendError::NotConfigured)
    }

    async fn identify_risks(&self, _property: &Value) -> Result<Value, BackendError> {
        Err(BackendError::NotConfigured)
    }

    async fn get_market_intelligence(&self, _location: &Value) -> Result<Value, BackendError> {
        Err(BackendError::NotConfigured)
    }
}
