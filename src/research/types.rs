use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::batch::Outcome;
use crate::cache::FileCache;
use crate::geocoding::{AddressQuery, CoordinateValidator, GeocodeResult};

/// A property record as supplied by callers or the store.
///
/// Unknown input fields are kept in `extra` so they survive a round-trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_built: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub square_feet: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annual_income: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annual_expenses: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn present(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl Property {
    pub fn id(&self) -> Option<&str> {
        present(&self.id)
    }

    /// At least one of address, city, state or name is present
    pub fn has_identity(&self) -> bool {
        [&self.address, &self.city, &self.state, &self.name]
            .into_iter()
            .any(|f| present(f).is_some())
    }

    pub fn has_valid_coordinates(&self) -> bool {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => CoordinateValidator::in_earth_range(lat, lon),
            _ => false,
        }
    }

    pub fn address_query(&self) -> AddressQuery {
        AddressQuery {
            address: self.address.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip_code: self.zip_code.clone(),
        }
    }

    /// Key for batch results: id, then address, then name, then position
    pub fn batch_key(&self, index: usize) -> String {
        self.id()
            .or_else(|| present(&self.address))
            .or_else(|| present(&self.name))
            .map(str::to_string)
            .unwrap_or_else(|| format!("property_{}", index))
    }

    /// Human-readable label for logs and summaries
    pub fn label(&self) -> String {
        present(&self.name)
            .or_else(|| present(&self.address))
            .map(str::to_string)
            .or_else(|| self.address_query().full_address())
            .unwrap_or_else(|| "property".to_string())
    }
}

/// How much research to run; each level is a strict superset of the previous
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    Basic,
    #[default]
    Standard,
    Comprehensive,
    Exhaustive,
}

impl ResearchDepth {
    pub fn modules(self) -> &'static [ResearchModule] {
        use ResearchModule::*;
        match self {
            ResearchDepth::Basic => &[PropertyDetails, InvestmentPotential],
            ResearchDepth::Standard => &[PropertyDetails, InvestmentPotential, MarketConditions],
            ResearchDepth::Comprehensive | ResearchDepth::Exhaustive => &[
                PropertyDetails,
                InvestmentPotential,
                MarketConditions,
                RiskAssessment,
            ],
        }
    }

    /// Risk module chains insurance and risk-vs-reward analyses
    pub fn chains_risk_analysis(self) -> bool {
        self >= ResearchDepth::Comprehensive
    }

    /// Executive summary is requested from the research backend
    pub fn uses_backend_summary(self) -> bool {
        self >= ResearchDepth::Comprehensive
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResearchDepth::Basic => "basic",
            ResearchDepth::Standard => "standard",
            ResearchDepth::Comprehensive => "comprehensive",
            ResearchDepth::Exhaustive => "exhaustive",
        }
    }
}

impl fmt::Display for ResearchDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResearchDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(ResearchDepth::Basic),
            "standard" => Ok(ResearchDepth::Standard),
            "comprehensive" => Ok(ResearchDepth::Comprehensive),
            "exhaustive" => Ok(ResearchDepth::Exhaustive),
            other => Err(format!(
                "unknown research depth '{}' (expected basic, standard, comprehensive or exhaustive)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResearchModule {
    PropertyDetails,
    InvestmentPotential,
    MarketConditions,
    RiskAssessment,
}

impl ResearchModule {
    pub fn as_str(self) -> &'static str {
        match self {
            ResearchModule::PropertyDetails => "property_details",
            ResearchModule::InvestmentPotential => "investment_potential",
            ResearchModule::MarketConditions => "market_conditions",
            ResearchModule::RiskAssessment => "risk_assessment",
        }
    }
}

/// Merged research output for one property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchReport {
    pub property_id: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub research_depth: ResearchDepth,
    /// One entry per attempted module: its output or `{"error": ...}`
    pub modules: BTreeMap<String, Outcome<Value>>,
    pub executive_summary: String,
    pub research_date: DateTime<Utc>,
    /// Coordinates geocoded during research, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<GeocodeResult>,
}

impl ResearchReport {
    pub fn module(&self, module: ResearchModule) -> Option<&Value> {
        self.modules.get(module.as_str()).and_then(Outcome::success)
    }

    pub fn failed_modules(&self) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Cache key over (id, address, city, state, depth)
pub fn report_cache_key(property: &Property, depth: ResearchDepth) -> String {
    let parts = [
        property.id().unwrap_or_default(),
        present(&property.address).unwrap_or_default(),
        present(&property.city).unwrap_or_default(),
        present(&property.state).unwrap_or_default(),
        depth.as_str(),
    ];
    format!(
        "research:{}",
        FileCache::hash_key(&parts.join("|").to_lowercase())
    )
}

/// Snapshot passed to progress callbacks after each batch unit finishes
#[derive(Debug)]
pub struct BatchProgress<'a> {
    pub completed: usize,
    pub total: usize,
    pub key: &'a str,
    pub outcome: &'a Outcome<ResearchReport>,
}

pub type ProgressCallback = Arc<dyn Fn(&BatchProgress<'_>) + Send + Sync>;

/// Result of a grouped save
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSaveSummary {
    pub success_count: usize,
    pub failed_ids: Vec<String>,
}
