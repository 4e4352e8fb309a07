// Gateway module for research - follows the Train Station Pattern
// All external access must go through this gateway

mod backend;
mod builtin;
mod collaborators;
mod researcher;
mod store;
mod summary;
mod types;

pub use backend::{HttpResearchBackend, NoopResearchBackend};
pub use builtin::{BasicInvestmentAnalyzer, BasicMarketAnalyzer, BasicProfiler, BasicRiskAssessor};
pub use collaborators::{
    Enrichers, InvestmentAnalyzer, MarketAnalyzer, PropertyProfiler, PropertyStore, ResearchBackend,
    RiskAssessor,
};
pub use researcher::{PropertyResearcher, ResearchSettings};
pub use store::MemoryPropertyStore;
pub use summary::local_summary;
pub use types::{
    report_cache_key, BatchProgress, BatchSaveSummary, ProgressCallback, Property, ResearchDepth,
    ResearchModule, ResearchReport,
};
