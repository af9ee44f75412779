//! Append-only measurement history.

use super::models::*;
use super::schema::HISTORY_VERSIONED_SCHEMAS;
use crate::error::{TaskError, TaskResult};
use crate::sqlite_persistence::{from_millis, open_in_memory, open_versioned, to_millis};
use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub trait HistoryStore: Send + Sync {
    /// Validates and appends one measurement, returning the new record id.
    /// Invalid input is rejected before anything is written.
    fn append(&self, owner_id: &str, measurement: &Measurement) -> TaskResult<i64>;

    /// Records for `owner_id`, newest first.
    fn query(&self, owner_id: &str, query: &HistoryQuery) -> TaskResult<Vec<HistoryRecord>>;
}

/// Checks a measurement without touching storage.
pub fn validate_measurement(owner_id: &str, measurement: &Measurement) -> TaskResult<()> {
    if owner_id.trim().is_empty() {
        return Err(TaskError::Validation("owner_id must not be empty".into()));
    }
    let pct = measurement.percentage;
    if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
        return Err(TaskError::Validation(format!(
            "percentage must be within [0, 100], got {}",
            pct
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path, HISTORY_VERSIONED_SCHEMAS, "history")?;
        Ok(SqliteHistoryStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(SqliteHistoryStore {
            conn: Arc::new(Mutex::new(open_in_memory(HISTORY_VERSIONED_SCHEMAS)?)),
        })
    }

    fn conn(&self) -> TaskResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TaskError::backend(anyhow!("history connection mutex poisoned")))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<HistoryRecord> {
        let details: Option<String> = row.get("details")?;
        Ok(HistoryRecord {
            record_id: row.get("record_id")?,
            owner_id: row.get("owner_id")?,
            timestamp: from_millis(row.get("timestamp")?),
            percentage: row.get("percentage")?,
            sample_count: row.get::<_, i64>("sample_count")?.max(0) as u32,
            details: details.and_then(|d| serde_json::from_str(&d).ok()),
        })
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn append(&self, owner_id: &str, measurement: &Measurement) -> TaskResult<i64> {
        validate_measurement(owner_id, measurement)?;

        let details = measurement
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| TaskError::Validation(format!("unserializable details: {}", e)))?;
        let timestamp = measurement.timestamp.unwrap_or_else(Utc::now);

        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO measurements (owner_id, timestamp, percentage, sample_count, details)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                owner_id,
                to_millis(&timestamp),
                measurement.percentage,
                measurement.sample_count as i64,
                details,
            ],
        )
        .map_err(|e| TaskError::backend(e.into()))?;
        Ok(conn.last_insert_rowid())
    }

    fn query(&self, owner_id: &str, query: &HistoryQuery) -> TaskResult<Vec<HistoryRecord>> {
        let conn = self.conn()?;
        let run = || -> Result<Vec<HistoryRecord>> {
            let mut stmt = conn.prepare(
                r#"SELECT * FROM measurements
                   WHERE owner_id = ?1
                     AND (?2 IS NULL OR timestamp >= ?2)
                     AND (?3 IS NULL OR timestamp <= ?3)
                   ORDER BY timestamp DESC, record_id DESC
                   LIMIT ?4"#,
            )?;
            let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
            let records = stmt
                .query_map(
                    params![
                        owner_id,
                        query.from.as_ref().map(to_millis),
                        query.to.as_ref().map(to_millis),
                        limit,
                    ],
                    Self::row_to_record,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        };
        run().map_err(TaskError::backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn base_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn count_rows(store: &SqliteHistoryStore) -> i64 {
        let conn = store.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM measurements", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_out_of_range_percentage_writes_nothing() {
        let store = SqliteHistoryStore::in_memory().unwrap();

        let err = store.append("agent-1", &Measurement::new(150.0)).unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
        assert!(store.append("agent-1", &Measurement::new(-0.5)).is_err());
        assert!(store.append("agent-1", &Measurement::new(f64::NAN)).is_err());
        assert_eq!(count_rows(&store), 0);

        store.append("agent-1", &Measurement::new(100.0)).unwrap();
        store.append("agent-1", &Measurement::new(0.0)).unwrap();
        assert_eq!(count_rows(&store), 2);
    }

    #[test]
    fn test_empty_owner_rejected() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        assert!(matches!(
            store.append("  ", &Measurement::new(50.0)),
            Err(TaskError::Validation(_))
        ));
    }

    #[test]
    fn test_query_returns_newest_first() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        let t0 = base_time();
        for (offset, pct) in [(0, 10.0), (2, 30.0), (1, 20.0)] {
            store
                .append(
                    "agent-1",
                    &Measurement::new(pct).at(t0 + Duration::minutes(offset)),
                )
                .unwrap();
        }
        store
            .append("agent-2", &Measurement::new(99.0).at(t0))
            .unwrap();

        let records = store.query("agent-1", &HistoryQuery::default()).unwrap();
        let pcts: Vec<f64> = records.iter().map(|r| r.percentage).collect();
        assert_eq!(pcts, vec![30.0, 20.0, 10.0]);
        assert!(records.iter().all(|r| r.owner_id == "agent-1"));
    }

    #[test]
    fn test_query_bounds_and_limit() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        let t0 = base_time();
        for minute in 0..5 {
            store
                .append(
                    "agent-1",
                    &Measurement::new(minute as f64).at(t0 + Duration::minutes(minute)),
                )
                .unwrap();
        }

        let window = HistoryQuery {
            from: Some(t0 + Duration::minutes(1)),
            to: Some(t0 + Duration::minutes(3)),
            limit: None,
        };
        let pcts: Vec<f64> = store
            .query("agent-1", &window)
            .unwrap()
            .iter()
            .map(|r| r.percentage)
            .collect();
        assert_eq!(pcts, vec![3.0, 2.0, 1.0]);

        let limited = HistoryQuery {
            limit: Some(2),
            ..Default::default()
        };
        let pcts: Vec<f64> = store
            .query("agent-1", &limited)
            .unwrap()
            .iter()
            .map(|r| r.percentage)
            .collect();
        assert_eq!(pcts, vec![4.0, 3.0]);
    }

    #[test]
    fn test_details_round_trip() {
        let store = SqliteHistoryStore::in_memory().unwrap();
        let mut measurement = Measurement::new(42.5).at(base_time());
        measurement.sample_count = 7;
        measurement.details = Some(json!({"source": "meter-3"}));
        let id = store.append("agent-1", &measurement).unwrap();

        let record = &store.query("agent-1", &HistoryQuery::default()).unwrap()[0];
        assert_eq!(record.record_id, id);
        assert_eq!(record.timestamp, base_time());
        assert_eq!(record.sample_count, 7);
        assert_eq!(record.details, Some(json!({"source": "meter-3"})));
    }
}
