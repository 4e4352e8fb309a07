use anyhow::Context as _;
use chrono::Utc;
use futures::future::{FutureExt, OptionFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::collaborators::{Enrichers, PropertyStore, ResearchBackend};
use super::summary::local_summary;
use super::types::{
    report_cache_key, BatchProgress, ProgressCallback, Property, ResearchDepth, ResearchModule,
    ResearchReport,
};
use crate::batch::{unique_keys, BatchResult, Outcome, Pacing, RetryPolicy};
use crate::cache::CacheManager;
use crate::constants::{
    MAX_RESEARCH_ATTEMPTS, RESEARCH_BATCH_JITTER_MS, RESEARCH_DATA_TYPE,
    RESEARCH_MODULE_TIMEOUT_SECS, RESEARCH_UNIT_TIMEOUT_SECS, RETRY_BASE_DELAY_MS,
};
use crate::geocoding::{CoordinateValidator, GeocodeResult, GeocodingService};
use crate::utils::{GeocodeError, ResearchError};

/// Retry, timeout and pacing knobs for [`PropertyResearcher`]
#[derive(Debug, Clone, Copy)]
pub struct ResearchSettings {
    /// Applies to batch units and to the grouped save
    pub retry: RetryPolicy,
    /// Upper bound on one research attempt for one property
    pub unit_timeout: Duration,
    /// Upper bound on each enrichment call
    pub module_timeout: Duration,
    pub pacing: Pacing,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: MAX_RESEARCH_ATTEMPTS,
                base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            },
            unit_timeout: Duration::from_secs(RESEARCH_UNIT_TIMEOUT_SECS),
            module_timeout: Duration::from_secs(RESEARCH_MODULE_TIMEOUT_SECS),
            pacing: Pacing::from_millis(RESEARCH_BATCH_JITTER_MS),
        }
    }
}

type ModuleResult = Result<Value, String>;

/// Run one enrichment call, turning errors, panics and timeouts into messages
async fn guarded<F>(name: &str, timeout: Duration, call: F) -> ModuleResult
where
    F: Future<Output = anyhow::Result<Value>>,
{
    match tokio::time::timeout(timeout, AssertUnwindSafe(call).catch_unwind()).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(format!("{:#}", e)),
        Ok(Err(_)) => Err(format!("{} panicked", name)),
        Err(_) => Err(format!("{} timed out after {:?}", name, timeout)),
    }
}

fn outcome_value(result: ModuleResult) -> Value {
    match result {
        Ok(value) => value,
        Err(message) => json!({ "error": message }),
    }
}

/// Orchestrates geocoding, enrichment fan-out, summaries, caching and
/// persistence for single properties and batches
pub struct PropertyResearcher {
    cache: Arc<CacheManager>,
    geocoder: Arc<GeocodingService>,
    enrichers: Enrichers,
    backend: Arc<dyn ResearchBackend>,
    store: Option<Arc<dyn PropertyStore>>,
    settings: ResearchSettings,
}

impl PropertyResearcher {
    pub fn new(
        cache: Arc<CacheManager>,
        geocoder: Arc<GeocodingService>,
        enrichers: Enrichers,
        backend: Arc<dyn ResearchBackend>,
        store: Option<Arc<dyn PropertyStore>>,
        settings: ResearchSettings,
    ) -> Self {
        Self {
            cache,
            geocoder,
            enrichers,
            backend,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &ResearchSettings {
        &self.settings
    }

    /// Research one property and persist the report when it has an id.
    ///
    /// Only a property with no address, city, state or name is an error;
    /// every other failure ends up inside the report.
    pub async fn research_property(
        &self,
        property: &Property,
        depth: ResearchDepth,
        force_refresh: bool,
    ) -> Result<ResearchReport, ResearchError> {
        self.research(property, depth, force_refresh, true).await
    }

    async fn research(
        &self,
        property: &Property,
        depth: ResearchDepth,
        force_refresh: bool,
        persist: bool,
    ) -> Result<ResearchReport, ResearchError> {
        if !property.has_identity() {
            return Err(ResearchError::Validation(
                "property needs at least one of address, city, state or name".to_string(),
            ));
        }

        let cache_key = report_cache_key(property, depth);
        if !force_refresh {
            if let Some(report) = self.cache.get_as::<ResearchReport>(&cache_key, RESEARCH_DATA_TYPE) {
                debug!(property = %property.label(), "research cache hit");
                if persist {
                    self.persist_report(&report).await;
                }
                return Ok(report);
            }
        }

        let mut working = property.clone();
        let coordinates = self.ensure_coordinates(&mut working).await;
        let property_value =
            serde_json::to_value(&working).map_err(|e| ResearchError::Internal(e.to_string()))?;

        let modules = self.run_modules(&property_value, depth).await;

        let mut report = ResearchReport {
            property_id: working.id().map(str::to_string),
            address: working.address.clone(),
            city: working.city.clone(),
            state: working.state.clone(),
            research_depth: depth,
            modules,
            executive_summary: String::new(),
            research_date: Utc::now(),
            coordinates,
        };
        report.executive_summary = self.summarize(&working, &property_value, &report).await;

        self.cache.set_as(&cache_key, &report, RESEARCH_DATA_TYPE);

        if persist {
            self.persist_report(&report).await;
        }

        let failed = report.failed_modules();
        info!(
            property = %working.label(),
            %depth,
            modules = report.modules.len(),
            failed = failed.len(),
            "research complete"
        );
        Ok(report)
    }

    /// Geocode when coordinates are missing or invalid; never fails the pipeline
    async fn ensure_coordinates(&self, property: &mut Property) -> Option<GeocodeResult> {
        if property.has_valid_coordinates() {
            return None;
        }
        match self
            .geocoder
            .geocode_address(&property.address_query(), None, true)
            .await
        {
            Ok(result) => {
                property.latitude = Some(result.latitude);
                property.longitude = Some(result.longitude);
                Some(result)
            }
            Err(e) => {
                warn!(property = %property.label(), error = %e, "geocoding skipped");
                None
            }
        }
    }

    /// Fan out to the depth's modules concurrently, one entry per module
    async fn run_modules(&self, property: &Value, depth: ResearchDepth) -> BTreeMap<String, Outcome<Value>> {
        let timeout = self.settings.module_timeout;
        let wants = |module: ResearchModule| depth.modules().contains(&module);

        let details = guarded(
            ResearchModule::PropertyDetails.as_str(),
            timeout,
            self.enrichers.profiler.profile(property, depth),
        );

        // Shared so the risk chain can reuse the investment output
        let investment = guarded(
            ResearchModule::InvestmentPotential.as_str(),
            timeout,
            self.enrichers.investment.analyze(property),
        )
        .boxed()
        .shared();

        let market: OptionFuture<_> = wants(ResearchModule::MarketConditions)
            .then(|| {
                guarded(
                    ResearchModule::MarketConditions.as_str(),
                    timeout,
                    self.enrichers.market.analyze_market(property, depth),
                )
            })
            .into();

        let risk: OptionFuture<_> = wants(ResearchModule::RiskAssessment)
            .then(|| self.risk_module(property, depth, investment.clone()))
            .into();

        let (details, investment, market, risk) =
            futures::join!(details, investment.clone(), market, risk);

        let mut modules = BTreeMap::new();
        let mut record = |module: ResearchModule, result: ModuleResult| {
            if let Err(message) = &result {
                warn!(module = module.as_str(), error = %message, "research module failed");
            }
            modules.insert(module.as_str().to_string(), Outcome::from(result));
        };
        record(ResearchModule::PropertyDetails, details);
        record(ResearchModule::InvestmentPotential, investment);
        if let Some(market) = market {
            record(ResearchModule::MarketConditions, market);
        }
        if let Some(risk) = risk {
            record(ResearchModule::RiskAssessment, risk);
        }
        modules
    }

    async fn risk_module<F>(&self, property: &Value, depth: ResearchDepth, investment: F) -> ModuleResult
    where
        F: Future<Output = ModuleResult>,
    {
        let timeout = self.settings.module_timeout;
        let assessor = &self.enrichers.risk;
        let risk = guarded("risk_assessment", timeout, assessor.assess(property, depth)).await?;
        if !depth.chains_risk_analysis() {
            return Ok(risk);
        }

        let insurance = guarded(
            "insurance_requirements",
            timeout,
            assessor.insurance_requirements(property, &risk),
        );
        let reward = async {
            match investment.await {
                Ok(investment) => {
                    guarded("risk_vs_reward", timeout, assessor.risk_vs_reward(&risk, &investment)).await
                }
                Err(e) => Err(format!("investment analysis unavailable: {}", e)),
            }
        };
        let (insurance, reward) = futures::join!(insurance, reward);

        let mut risk = match risk {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("assessment".to_string(), other);
                map
            }
        };
        risk.insert("insuranceRequirements".to_string(), outcome_value(insurance));
        risk.insert("riskVsReward".to_string(), outcome_value(reward));
        Ok(Value::Object(risk))
    }

    /// Backend summary for deep research, local summary otherwise or on failure
    async fn summarize(&self, property: &Property, property_value: &Value, report: &ResearchReport) -> String {
        if report.research_depth.uses_backend_summary() {
            let context = json!({
                "property": property_value,
                "researchDepth": report.research_depth,
                "modules": &report.modules,
            });
            match tokio::time::timeout(
                self.settings.module_timeout,
                self.backend.generate_executive_summary(&context),
            )
            .await
            {
                Ok(Ok(summary)) if !summary.trim().is_empty() => return summary,
                Ok(Ok(_)) => debug!("research backend returned an empty summary"),
                Ok(Err(e)) => warn!(error = %e, "executive summary unavailable, using local summary"),
                Err(_) => warn!("executive summary timed out, using local summary"),
            }
        }
        local_summary(property, report)
    }

    async fn persist_report(&self, report: &ResearchReport) {
        let (Some(store), Some(id)) = (&self.store, report.property_id.as_deref()) else {
            return;
        };
        match store.save_research_results(id, report).await {
            Ok(true) => debug!(property_id = id, "research results saved"),
            Ok(false) => warn!(property_id = id, "store did not accept research results"),
            Err(e) => warn!(property_id = id, error = %e, "failed to save research results"),
        }
    }

    /// One batch attempt: bounded by the unit timeout, panics become errors
    async fn research_unit(
        &self,
        property: &Property,
        depth: ResearchDepth,
        force_refresh: bool,
    ) -> Result<ResearchReport, ResearchError> {
        let unit = AssertUnwindSafe(self.research(property, depth, force_refresh, false)).catch_unwind();
        match tokio::time::timeout(self.settings.unit_timeout, unit).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ResearchError::Internal("research unit panicked".to_string())),
            Err(_) => Err(ResearchError::Timeout(self.settings.unit_timeout)),
        }
    }

    /// Research many properties with at most `concurrency` in flight.
    ///
    /// `on_progress` fires once per property in completion order. Successful
    /// reports with an id are saved afterwards in one grouped call.
    pub async fn batch_research_properties(
        self: &Arc<Self>,
        properties: Vec<Property>,
        depth: ResearchDepth,
        concurrency: usize,
        force_refresh: bool,
        on_progress: Option<ProgressCallback>,
    ) -> BatchResult<ResearchReport> {
        let concurrency = concurrency.max(1);
        let total = properties.len();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let keys = unique_keys(
            properties
                .iter()
                .enumerate()
                .map(|(index, property)| property.batch_key(index)),
        );

        info!(total, concurrency, %depth, "starting batch research");

        let mut pending: FuturesUnordered<_> = properties
            .into_iter()
            .zip(keys)
            .enumerate()
            .map(|(index, (property, key))| {
                let researcher = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                let delay = self.settings.pacing.delay_for(index, concurrency);
                let label = key.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| ResearchError::Internal(e.to_string()))?;
                    researcher
                        .settings
                        .retry
                        .run(&label, ResearchError::is_transient, |_| {
                            researcher.research_unit(&property, depth, force_refresh)
                        })
                        .await
                })
                .map(move |joined| (key, joined))
            })
            .collect();

        let mut outcomes = Vec::with_capacity(total);
        let mut completed = 0;
        while let Some((key, joined)) = pending.next().await {
            completed += 1;
            let outcome = match joined {
                Ok(Ok(report)) => Outcome::Success(report),
                Ok(Err(e)) if e.is_transient() => {
                    error!(property = %key, error = %e, "research failed after retries");
                    Outcome::failure(e.to_string())
                }
                Ok(Err(e)) => {
                    warn!(property = %key, error = %e, "research failed");
                    Outcome::failure(e.to_string())
                }
                Err(join_error) => Outcome::failure(format!("research task failed: {}", join_error)),
            };
            if let Some(callback) = &on_progress {
                callback(&BatchProgress {
                    completed,
                    total,
                    key: &key,
                    outcome: &outcome,
                });
            }
            outcomes.push((key, outcome));
        }

        self.persist_batch(&outcomes).await;

        let result = BatchResult::from_outcomes(outcomes);
        info!(
            total = result.stats.total,
            success = result.stats.success,
            errors = result.stats.errors,
            "batch research finished"
        );
        result
    }

    async fn persist_batch(&self, outcomes: &[(String, Outcome<ResearchReport>)]) {
        let Some(store) = &self.store else {
            return;
        };
        let items: Vec<(String, ResearchReport)> = outcomes
            .iter()
            .filter_map(|(_, outcome)| outcome.success())
            .filter_map(|report| report.property_id.clone().map(|id| (id, report.clone())))
            .collect();
        if items.is_empty() {
            return;
        }

        let count = items.len();
        let saved = self
            .settings
            .retry
            .run(
                "batch_save_research_results",
                |_: &anyhow::Error| true,
                |_| store.batch_save_research_results(items.clone()),
            )
            .await;

        match saved {
            Ok(summary) => {
                info!(saved = summary.success_count, "batch research results saved");
                if !summary.failed_ids.is_empty() {
                    warn!(failed = ?summary.failed_ids, "some research results were not saved");
                }
            }
            Err(e) => error!(count, error = %e, "failed to save batch research results"),
        }
    }

    /// Geocode a property in place; coordinates from a provider are also
    /// written back to the store
    pub async fn geocode_property(
        &self,
        property: &mut Property,
        force_refresh: bool,
    ) -> Result<GeocodeResult, GeocodeError> {
        let result = self
            .geocoder
            .geocode_address(&property.address_query(), None, !force_refresh)
            .await?;
        self.apply_coordinates(property, &result).await;
        Ok(result)
    }

    pub async fn batch_geocode_properties(
        &self,
        properties: &mut [Property],
        concurrency: usize,
        force_refresh: bool,
    ) -> BatchResult<GeocodeResult> {
        let keys = unique_keys(
            properties
                .iter()
                .enumerate()
                .map(|(index, property)| property.batch_key(index)),
        );
        let items = keys
            .iter()
            .cloned()
            .zip(properties.iter().map(Property::address_query))
            .collect();

        let result = self
            .geocoder
            .batch_geocode(items, concurrency, None, !force_refresh)
            .await;

        for (key, property) in keys.iter().zip(properties.iter_mut()) {
            if let Some(coordinates) = result.per_item.get(key).and_then(Outcome::success) {
                self.apply_coordinates(property, coordinates).await;
            }
        }
        result
    }

    async fn apply_coordinates(&self, property: &mut Property, result: &GeocodeResult) {
        property.latitude = Some(result.latitude);
        property.longitude = Some(result.longitude);

        if result.approximate || !CoordinateValidator::in_earth_range(result.latitude, result.longitude) {
            return;
        }
        let (Some(store), Some(id)) = (&self.store, property.id()) else {
            return;
        };

        let mut fields = Map::new();
        fields.insert("latitude".to_string(), json!(result.latitude));
        fields.insert("longitude".to_string(), json!(result.longitude));
        if let Err(e) = store.update_property_fields(id, fields).await {
            warn!(property_id = id, error = %e, "failed to store coordinates");
        }
    }

    /// Research whatever the store reports as stale or missing
    pub async fn research_pending(
        self: &Arc<Self>,
        limit: usize,
        depth: ResearchDepth,
        days_threshold: u32,
        concurrency: usize,
        on_progress: Option<ProgressCallback>,
    ) -> anyhow::Result<BatchResult<ResearchReport>> {
        let store = self.store.as_ref().context("No property store configured")?;
        let properties = store
            .get_properties_needing_research(limit, depth, days_threshold)
            .await
            .context("Failed to load properties needing research")?;
        info!(count = properties.len(), "properties need research");

        Ok(self
            .batch_research_properties(properties, depth, concurrency, false, on_progress)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheSettings;
    use crate::geocoding::{Confidence, GeocodeProvider, GeocodingOptions};
    use crate::research::collaborators::{MarketAnalyzer, MockPropertyStore, PropertyProfiler};
    use crate::research::{
        BatchSaveSummary, InvestmentAnalyzer, MemoryPropertyStore, NoopResearchBackend,
    };
    use crate::utils::{BackendError, ProviderError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        cache: Arc<CacheManager>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let cache = Arc::new(CacheManager::new(CacheSettings {
                directory: Some(dir.path().to_path_buf()),
                sweep_interval: Duration::ZERO,
                ..CacheSettings::default()
            }));
            Self { _dir: dir, cache }
        }

        fn researcher(
            &self,
            providers: Vec<Arc<dyn GeocodeProvider>>,
            enrichers: Enrichers,
            backend: Arc<dyn ResearchBackend>,
            store: Option<Arc<dyn PropertyStore>>,
        ) -> Arc<PropertyResearcher> {
            let geocoder = Arc::new(GeocodingService::new(
                providers,
                Some(Arc::clone(&self.cache)),
                GeocodingOptions {
                    pacing: Pacing::none(),
                    ..GeocodingOptions::default()
                },
            ));
            Arc::new(PropertyResearcher::new(
                Arc::clone(&self.cache),
                geocoder,
                enrichers,
                backend,
                store,
                test_settings(),
            ))
        }

        fn simple(&self) -> Arc<PropertyResearcher> {
            self.researcher(vec![], Enrichers::builtin(), Arc::new(NoopResearchBackend), None)
        }
    }

    fn test_settings() -> ResearchSettings {
        ResearchSettings {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            unit_timeout: Duration::from_secs(5),
            module_timeout: Duration::from_secs(2),
            pacing: Pacing::none(),
        }
    }

    fn austin(id: Option<&str>) -> Property {
        Property {
            id: id.map(str::to_string),
            address: Some("1 Main St".into()),
            city: Some("Austin".into()),
            state: Some("TX".into()),
            ..Property::default()
        }
    }

    struct FixedProvider;

    #[async_trait]
    impl GeocodeProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn geocode(&self, _address: &str) -> Result<GeocodeResult, ProviderError> {
            Ok(GeocodeResult::from_provider("fixed", 30.25, -97.75, Confidence::High, None))
        }
    }

    struct SummaryBackend;

    #[async_trait]
    impl ResearchBackend for SummaryBackend {
        async fn generate_executive_summary(&self, _context: &Value) -> Result<String, BackendError> {
            Ok("Backend summary".to_string())
        }
        async fn research_property(&self, _property: &Value) -> Result<Value, BackendError> {
            Ok(json!({}))
        }
        async fn analyze_investment_potential(&self, _property: &Value) -> Result<Value, BackendError> {
            Ok(json!({}))
        }
        async fn identify_risks(&self, _property: &Value) -> Result<Value, BackendError> {
            Ok(json!({}))
        }
        async fn get_market_intelligence(&self, _location: &Value) -> Result<Value, BackendError> {
            Ok(json!({}))
        }
    }

    struct BrokenMarket;

    #[async_trait]
    impl MarketAnalyzer for BrokenMarket {
        async fn analyze_market(&self, _property: &Value, _depth: ResearchDepth) -> anyhow::Result<Value> {
            anyhow::bail!("market feed down")
        }
    }

    struct SlowInvestment;

    #[async_trait]
    impl InvestmentAnalyzer for SlowInvestment {
        async fn analyze(&self, _property: &Value) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(json!({}))
        }
    }

    /// Counts calls; the first call stalls when `stall_first` is set
    struct CountingProfiler {
        calls: AtomicUsize,
        stall_first: bool,
    }

    #[async_trait]
    impl PropertyProfiler for CountingProfiler {
        async fn profile(&self, _property: &Value, _depth: ResearchDepth) -> anyhow::Result<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stall_first && call == 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Ok(json!({ "propertyType": "multifamily" }))
        }
    }

    #[tokio::test]
    async fn test_basic_research_without_providers_near_austin() {
        let fixture = Fixture::new();
        let report = fixture
            .simple()
            .research_property(&austin(None), ResearchDepth::Basic, false)
            .await
            .unwrap();

        let keys: Vec<_> = report.modules.keys().cloned().collect();
        assert_eq!(keys, vec!["investment_potential", "property_details"]);
        assert!(!report.executive_summary.is_empty());

        let coordinates = report.coordinates.unwrap();
        assert!(coordinates.approximate);
        assert!((coordinates.latitude - 30.2672).abs() <= 0.0100001);
        assert!((coordinates.longitude - -97.7431).abs() <= 0.0100001);
    }

    #[tokio::test]
    async fn test_depth_monotonicity() {
        let fixture = Fixture::new();
        let researcher = fixture.simple();
        let property = Property {
            price: Some(900_000.0),
            annual_income: Some(90_000.0),
            annual_expenses: Some(30_000.0),
            year_built: Some(1990),
            ..austin(None)
        };

        let basic = researcher
            .research_property(&property, ResearchDepth::Basic, false)
            .await
            .unwrap();
        let deep = researcher
            .research_property(&property, ResearchDepth::Comprehensive, false)
            .await
            .unwrap();

        assert!(basic.modules.keys().all(|k| deep.modules.contains_key(k)));
        assert_eq!(deep.modules.len(), 4);

        let risk = deep.module(ResearchModule::RiskAssessment).unwrap();
        assert!(risk.get("insuranceRequirements").is_some());
        assert!(risk["riskVsReward"].get("verdict").is_some());
    }

    #[tokio::test]
    async fn test_property_without_identity_is_rejected() {
        let fixture = Fixture::new();
        let err = fixture
            .simple()
            .research_property(&Property::default(), ResearchDepth::Basic, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ResearchError::Validation(_)));
    }

    #[tokio::test]
    async fn test_module_failures_are_captured() {
        let fixture = Fixture::new();
        let enrichers = Enrichers {
            market: Arc::new(BrokenMarket),
            investment: Arc::new(SlowInvestment),
            ..Enrichers::builtin()
        };
        let researcher = Arc::new(PropertyResearcher::new(
            Arc::clone(&fixture.cache),
            Arc::new(GeocodingService::new(vec![], None, GeocodingOptions::default())),
            enrichers,
            Arc::new(NoopResearchBackend),
            None,
            ResearchSettings {
                module_timeout: Duration::from_millis(50),
                ..test_settings()
            },
        ));

        let report = researcher
            .research_property(&austin(None), ResearchDepth::Comprehensive, false)
            .await
            .unwrap();

        assert_eq!(report.modules.len(), 4);
        assert_eq!(
            report.modules["market_conditions"].error(),
            Some("market feed down")
        );
        assert!(report.modules["investment_potential"]
            .error()
            .unwrap()
            .contains("timed out"));
        assert!(report.modules["property_details"].is_success());

        // Risk still runs; its reward analysis records the missing input
        let risk = report.module(ResearchModule::RiskAssessment).unwrap();
        assert!(risk["riskVsReward"]["error"]
            .as_str()
            .unwrap()
            .starts_with("investment analysis unavailable"));
    }

    #[tokio::test]
    async fn test_backend_summary_only_for_deep_research() {
        let fixture = Fixture::new();
        let researcher = fixture.researcher(
            vec![],
            Enrichers::builtin(),
            Arc::new(SummaryBackend),
            None,
        );

        let deep = researcher
            .research_property(&austin(None), ResearchDepth::Exhaustive, false)
            .await
            .unwrap();
        assert_eq!(deep.executive_summary, "Backend summary");

        let standard = researcher
            .research_property(&austin(None), ResearchDepth::Standard, false)
            .await
            .unwrap();
        assert_ne!(standard.executive_summary, "Backend summary");
        assert!(!standard.executive_summary.is_empty());
    }

    #[tokio::test]
    async fn test_cached_report_reused_unless_forced() {
        let fixture = Fixture::new();
        let profiler = Arc::new(CountingProfiler {
            calls: AtomicUsize::new(0),
            stall_first: false,
        });
        let researcher = fixture.researcher(
            vec![],
            Enrichers {
                profiler: profiler.clone(),
                ..Enrichers::builtin()
            },
            Arc::new(NoopResearchBackend),
            None,
        );

        let first = researcher
            .research_property(&austin(None), ResearchDepth::Basic, false)
            .await
            .unwrap();
        let second = researcher
            .research_property(&austin(None), ResearchDepth::Basic, false)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(profiler.calls.load(Ordering::SeqCst), 1);

        researcher
            .research_property(&austin(None), ResearchDepth::Basic, true)
            .await
            .unwrap();
        assert_eq!(profiler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_report_persisted_and_store_errors_ignored() {
        let fixture = Fixture::new();
        let mut store = MockPropertyStore::new();
        store
            .expect_save_research_results()
            .withf(|id, _| id.to_string() == "p1")
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("database offline")));

        let researcher = fixture.researcher(
            vec![],
            Enrichers::builtin(),
            Arc::new(NoopResearchBackend),
            Some(Arc::new(store)),
        );
        let report = researcher
            .research_property(&austin(Some("p1")), ResearchDepth::Basic, false)
            .await
            .unwrap();
        assert_eq!(report.property_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures_and_reports_progress() {
        let fixture = Fixture::new();
        let researcher = fixture.simple();
        let properties: Vec<Property> = (0..5)
            .map(|i| {
                if i == 2 {
                    Property::default()
                } else {
                    Property {
                        address: Some(format!("{} Main St", i)),
                        ..austin(None)
                    }
                }
            })
            .collect();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |progress: &BatchProgress<'_>| {
            sink.lock()
                .push((progress.completed, progress.total, progress.key.to_string()));
        });

        let result = researcher
            .batch_research_properties(properties, ResearchDepth::Basic, 2, false, Some(callback))
            .await;

        assert_eq!(result.stats.total, 5);
        assert_eq!(result.stats.success, 4);
        assert_eq!(result.stats.errors, 1);
        assert_eq!(result.stats.success_rate, 80.0);
        assert!(result.per_item["property_2"]
            .error()
            .unwrap()
            .starts_with("Validation error"));

        let seen = seen.lock();
        let counts: Vec<usize> = seen.iter().map(|(completed, _, _)| *completed).collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);
        assert!(seen.iter().all(|(_, total, _)| *total == 5));
        let mut keys: Vec<_> = seen.iter().map(|(_, _, key)| key.clone()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 5);
    }

    #[tokio::test]
    async fn test_batch_retries_timed_out_unit() {
        let fixture = Fixture::new();
        let profiler = Arc::new(CountingProfiler {
            calls: AtomicUsize::new(0),
            stall_first: true,
        });
        let researcher = Arc::new(PropertyResearcher::new(
            Arc::clone(&fixture.cache),
            Arc::new(GeocodingService::new(vec![], None, GeocodingOptions::default())),
            Enrichers {
                profiler: profiler.clone(),
                ..Enrichers::builtin()
            },
            Arc::new(NoopResearchBackend),
            None,
            ResearchSettings {
                unit_timeout: Duration::from_millis(200),
                ..test_settings()
            },
        ));

        let result = researcher
            .batch_research_properties(vec![austin(None)], ResearchDepth::Basic, 1, false, None)
            .await;

        assert_eq!(result.stats.success, 1);
        assert_eq!(profiler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_batch_saves_in_one_grouped_call() {
        let fixture = Fixture::new();
        let mut store = MockPropertyStore::new();
        store
            .expect_batch_save_research_results()
            .withf(|items| items.len() == 2)
            .times(1)
            .returning(|items| {
                Ok(BatchSaveSummary {
                    success_count: items.len(),
                    failed_ids: vec![],
                })
            });

        let researcher = fixture.researcher(
            vec![],
            Enrichers::builtin(),
            Arc::new(NoopResearchBackend),
            Some(Arc::new(store)),
        );
        let properties = vec![austin(Some("a")), austin(Some("b")), austin(None)];
        let result = researcher
            .batch_research_properties(properties, ResearchDepth::Basic, 3, false, None)
            .await;
        assert_eq!(result.stats.success, 3);
    }

    #[tokio::test]
    async fn test_geocode_property_writes_back_coordinates() {
        let fixture = Fixture::new();
        let store = Arc::new(MemoryPropertyStore::new());
        store.insert_all(vec![austin(Some("a")), austin(Some("b"))]);
        let researcher = fixture.researcher(
            vec![Arc::new(FixedProvider)],
            Enrichers::builtin(),
            Arc::new(NoopResearchBackend),
            Some(store.clone()),
        );

        let mut property = austin(Some("a"));
        let result = researcher.geocode_property(&mut property, false).await.unwrap();
        assert_eq!(result.provider.as_deref(), Some("fixed"));
        assert_eq!(property.latitude, Some(30.25));
        assert_eq!(store.property("a").unwrap().longitude, Some(-97.75));

        let mut batch = vec![austin(Some("b")), austin(None)];
        let result = researcher.batch_geocode_properties(&mut batch, 2, false).await;
        assert_eq!(result.stats.success, 2);
        assert!(batch.iter().all(Property::has_valid_coordinates));
        assert_eq!(store.property("b").unwrap().latitude, Some(30.25));
    }

    #[tokio::test]
    async fn test_cached_report_still_persisted() {
        let fixture = Fixture::new();
        fixture
            .simple()
            .research_property(&austin(Some("x")), ResearchDepth::Basic, false)
            .await
            .unwrap();

        let store = Arc::new(MemoryPropertyStore::new());
        store.insert_all(vec![austin(Some("x"))]);
        let profiler = Arc::new(CountingProfiler {
            calls: AtomicUsize::new(0),
            stall_first: false,
        });
        let researcher = fixture.researcher(
            vec![],
            Enrichers {
                profiler: profiler.clone(),
                ..Enrichers::builtin()
            },
            Arc::new(NoopResearchBackend),
            Some(store.clone()),
        );
        researcher
            .research_property(&austin(Some("x")), ResearchDepth::Basic, false)
            .await
            .unwrap();

        assert_eq!(profiler.calls.load(Ordering::SeqCst), 0);
        assert!(store.report("x").is_some());
    }

    /// Stalls forever on properties at "9 Slow Rd", fast elsewhere
    struct StallingProfiler {
        stalled_calls: AtomicUsize,
    }

    #[async_trait]
    impl PropertyProfiler for StallingProfiler {
        async fn profile(&self, property: &Value, _depth: ResearchDepth) -> anyhow::Result<Value> {
            if property["address"] == "9 Slow Rd" {
                self.stalled_calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(json!({ "propertyType": "multifamily" }))
        }
    }

    #[tokio::test]
    async fn test_batch_unit_failing_every_attempt() {
        let fixture = Fixture::new();
        let profiler = Arc::new(StallingProfiler {
            stalled_calls: AtomicUsize::new(0),
        });
        let researcher = Arc::new(PropertyResearcher::new(
            Arc::clone(&fixture.cache),
            Arc::new(GeocodingService::new(vec![], None, GeocodingOptions::default())),
            Enrichers {
                profiler: profiler.clone(),
                ..Enrichers::builtin()
            },
            Arc::new(NoopResearchBackend),
            None,
            ResearchSettings {
                unit_timeout: Duration::from_millis(100),
                ..test_settings()
            },
        ));

        let properties = vec![
            Property {
                id: Some("ok1".into()),
                ..austin(None)
            },
            Property {
                id: Some("slow".into()),
                address: Some("9 Slow Rd".into()),
                ..austin(None)
            },
            Property {
                id: Some("ok2".into()),
                address: Some("2 Main St".into()),
                ..austin(None)
            },
        ];

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Arc::new(move |progress: &BatchProgress<'_>| {
            sink.lock().push(progress.key.to_string());
        });

        let result = researcher
            .batch_research_properties(properties, ResearchDepth::Basic, 3, false, Some(callback))
            .await;

        assert_eq!(profiler.stalled_calls.load(Ordering::SeqCst), 3);
        assert!(result.per_item["slow"]
            .error()
            .unwrap()
            .starts_with("Research timed out"));
        assert!(result.per_item["ok1"].is_success());
        assert!(result.per_item["ok2"].is_success());
        assert_eq!(result.stats.errors, 1);

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen.iter().filter(|key| key.as_str() == "slow").count(), 1);
    }

    #[tokio::test]
    async fn test_research_pending_uses_store() {
        let fixture = Fixture::new();
        let store = Arc::new(MemoryPropertyStore::new());
        store.insert_all(vec![austin(Some("a")), austin(Some("b"))]);
        let researcher = fixture.researcher(
            vec![],
            Enrichers::builtin(),
            Arc::new(NoopResearchBackend),
            Some(store.clone()),
        );

        let result = researcher
            .research_pending(10, ResearchDepth::Basic, 30, 2, None)
            .await
            .unwrap();
        assert_eq!(result.stats.success, 2);
        assert!(store.report("a").is_some());

        let again = researcher
            .research_pending(10, ResearchDepth::Basic, 30, 2, None)
            .await
            .unwrap();
        assert_eq!(again.stats.total, 0);

        assert!(fixture.simple().research_pending(1, ResearchDepth::Basic, 30, 1, None).await.is_err());
    }
}
