use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A measurement to append. `timestamp` defaults to the append time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub percentage: f64,
    #[serde(default)]
    pub sample_count: u32,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl Measurement {
    pub fn new(percentage: f64) -> Self {
        Measurement {
            timestamp: None,
            percentage,
            sample_count: 0,
            details: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A stored, immutable measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub record_id: i64,
    pub owner_id: String,
    pub timestamp: DateTime<Utc>,
    pub percentage: f64,
    pub sample_count: u32,
    pub details: Option<serde_json::Value>,
}

/// Filters for `HistoryStore::query`. All bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HistoryQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}
