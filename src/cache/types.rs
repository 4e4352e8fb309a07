use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::constants::{DEFAULT_DATA_TYPE, DEFAULT_TTL_DAYS};

/// On-disk cache record: `{data, timestamp, dataType}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_data_type")]
    pub data_type: String,
}

fn default_data_type() -> String {
    DEFAULT_DATA_TYPE.to_string()
}

impl CacheEntry {
    pub fn new(data: Value, data_type: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            data,
            timestamp,
            data_type: data_type.to_string(),
        }
    }
}

/// Table-driven time-to-live per data type
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    table: HashMap<String, Duration>,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::with_overrides(&BTreeMap::new())
    }
}

impl TtlPolicy {
    /// Built-in table with per-type overrides (in days) layered on top
    pub fn with_overrides(overrides: &BTreeMap<String, u64>) -> Self {
        let mut table: HashMap<String, Duration> = DEFAULT_TTL_DAYS
            .iter()
            .map(|(name, days)| (name.to_string(), Duration::days(*days as i64)))
            .collect();
        for (name, days) in overrides {
            match i64::try_from(*days).ok().and_then(Duration::try_days) {
                Some(ttl) => {
                    table.insert(name.clone(), ttl);
                }
                None => warn!(data_type = %name, days, "TTL override out of range, keeping default"),
            }
        }
        Self { table }
    }

    /// TTL for a data type; unknown types use the `default` entry
    pub fn ttl(&self, data_type: &str) -> Duration {
        self.table
            .get(data_type)
            .or_else(|| self.table.get(DEFAULT_DATA_TYPE))
            .copied()
            .unwrap_or_else(|| Duration::days(7))
    }

    pub fn is_expired(&self, written: DateTime<Utc>, data_type: &str, now: DateTime<Utc>) -> bool {
        now - written > self.ttl(data_type)
    }
}

/// Time source for expiry decisions
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic expiry
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
