use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use super::collaborators::PropertyStore;
use super::types::{BatchSaveSummary, Property, ResearchDepth, ResearchReport};

#[derive(Debug, Default)]
struct StoreState {
    properties: BTreeMap<String, Property>,
    reports: BTreeMap<String, ResearchReport>,
}

/// In-process [`PropertyStore`] keyed by property id
#[derive(Debug, Default)]
pub struct MemoryPropertyStore {
    state: RwLock<StoreState>,
}

impl MemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace properties; records without an id are skipped
    pub fn insert_all(&self, properties: impl IntoIterator<Item = Property>) -> usize {
        let mut state = self.state.write();
        let mut inserted = 0;
        for property in properties {
            match property.id().map(str::to_string) {
                Some(id) => {
                    state.properties.insert(id, property);
                    inserted += 1;
                }
                None => debug!(label = %property.label(), "skipping property without id"),
            }
        }
        inserted
    }

    pub fn property(&self, id: &str) -> Option<Property> {
        self.state.read().properties.get(id).cloned()
    }

    pub fn report(&self, id: &str) -> Option<ResearchReport> {
        self.state.read().reports.get(id).cloned()
    }

    fn store_report(state: &mut StoreState, id: &str, report: ResearchReport) -> bool {
        if !state.properties.contains_key(id) {
            return false;
        }
        state.reports.insert(id.to_string(), report);
        true
    }
}

#[async_trait]
impl PropertyStore for MemoryPropertyStore {
    async fn get_properties_needing_research(
        &self,
        limit: usize,
        depth: ResearchDepth,
        days_threshold: u32,
    ) -> Result<Vec<Property>> {
        let cutoff = Utc::now() - Duration::days(i64::from(days_threshold));
        let state = self.state.read();
        Ok(state
            .properties
            .iter()
            .filter(|(id, _)| match state.reports.get(*id) {
                None => true,
                Some(report) => report.research_date < cutoff || report.research_depth < depth,
            })
            .map(|(_, property)| property.clone())
            .take(limit)
            .collect())
    }

    async fn save_research_results(&self, property_id: &str, report: &ResearchReport) -> Result<bool> {
        let mut state = self.state.write();
        Ok(Self::store_report(&mut state, property_id, report.clone()))
    }

    async fn batch_save_research_results(
        &self,
        results: Vec<(String, ResearchReport)>,
    ) -> Result<BatchSaveSummary> {
        let mut state = self.state.write();
        let mut summary = BatchSaveSummary::default();
        for (id, report) in results {
            if Self::store_report(&mut state, &id, report) {
                summary.success_count += 1;
            } else {
                summary.failed_ids.push(id);
            }
        }
        Ok(summary)
    }

    async fn update_property_fields(&self, property_id: &str, fields: Map<String, Value>) -> Result<()> {
        let mut state = self.state.write();
        let Some(property) = state.properties.get_mut(property_id) else {
            bail!("Unknown property id: {}", property_id);
        };

        // Merge at the JSON level so unknown fields land in `extra`
        let mut merged = match serde_json::to_value(&*property)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        merged.extend(fields);
        *property = serde_json::from_value(Value::Object(merged))?;
        Ok(())
    }
}
