use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use super::builtin::{BasicInvestmentAnalyzer, BasicMarketAnalyzer, BasicProfiler, BasicRiskAssessor};
use super::types::{BatchSaveSummary, Property, ResearchDepth, ResearchReport};
use crate::utils::BackendError;

/// Persistence for properties and their research results
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PropertyStore: Send + Sync {
    /// Properties never researched, researched longer than `days_threshold`
    /// days ago, or researched at a shallower depth
    async fn get_properties_needing_research(
        &self,
        limit: usize,
        depth: ResearchDepth,
        days_threshold: u32,
    ) -> Result<Vec<Property>>;

    async fn save_research_results(&self, property_id: &str, report: &ResearchReport) -> Result<bool>;

    async fn batch_save_research_results(
        &self,
        results: Vec<(String, ResearchReport)>,
    ) -> Result<BatchSaveSummary>;

    /// Partial update; only the given fields change
    async fn update_property_fields(&self, property_id: &str, fields: Map<String, Value>) -> Result<()>;
}

/// Remote research service. Every call returns a structured error
/// instead of failing the caller.
#[async_trait]
pub trait ResearchBackend: Send + Sync {
    async fn generate_executive_summary(&self, context: &Value) -> Result<String, BackendError>;

    async fn research_property(&self, property: &Value) -> Result<Value, BackendError>;

    async fn analyze_investment_potential(&self, property: &Value) -> Result<Value, BackendError>;

    async fn identify_risks(&self, property: &Value) -> Result<Value, BackendError>;

    async fn get_market_intelligence(&self, location: &Value) -> Result<Value, BackendError>;
}

#[async_trait]
pub trait PropertyProfiler: Send + Sync {
    async fn profile(&self, property: &Value, depth: ResearchDepth) -> Result<Value>;
}

#[async_trait]
pub trait InvestmentAnalyzer: Send + Sync {
    async fn analyze(&self, property: &Value) -> Result<Value>;
}

#[async_trait]
pub trait MarketAnalyzer: Send + Sync {
    async fn analyze_market(&self, property: &Value, depth: ResearchDepth) -> Result<Value>;
}

#[async_trait]
pub trait RiskAssessor: Send + Sync {
    async fn assess(&self, property: &Value, depth: ResearchDepth) -> Result<Value>;

    async fn insurance_requirements(&self, property: &Value, risk: &Value) -> Result<Value>;

    async fn risk_vs_reward(&self, risk: &Value, investment: &Value) -> Result<Value>;
}

/// The enrichment collaborators a researcher fans out to
#[derive(Clone)]
pub struct Enrichers {
    pub profiler: Arc<dyn PropertyProfiler>,
    pub investment: Arc<dyn InvestmentAnalyzer>,
    pub market: Arc<dyn MarketAnalyzer>,
    pub risk: Arc<dyn RiskAssessor>,
}

impl Enrichers {
    pub fn builtin() -> Self {
        Self {
            profiler: Arc::new(BasicProfiler),
            investment: Arc::new(BasicInvestmentAnalyzer),
            market: Arc::new(BasicMarketAnalyzer),
            risk: Arc::new(BasicRiskAssessor),
        }
    }
}

impl Default for Enrichers {
    fn default() -> Self {
        Self::builtin()
    }
}
