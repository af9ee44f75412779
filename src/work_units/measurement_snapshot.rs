//! Aggregates a batch of readings into one history measurement.
//!
//! Params: `{"readings": [f64, ...], "label"?: string, "delay_ms"?: u64}`.
//! `delay_ms` simulates a slow collection phase and is spent in short,
//! cancellation-aware sleeps.

use crate::history::Measurement;
use crate::worker::{TaskContext, WorkOutcome, WorkUnit};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::time::Duration;
use tracing::debug;

pub const TASK_TYPE: &str = "measurement_snapshot";

const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
struct SnapshotParams {
    readings: Vec<f64>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    delay_ms: u64,
}

impl SnapshotParams {
    fn parse(params: &JsonValue) -> Result<Self, String> {
        let parsed: SnapshotParams =
            serde_json::from_value(params.clone()).map_err(|e| format!("invalid params: {}", e))?;
        if parsed.readings.is_empty() {
            return Err("readings must not be empty".to_string());
        }
        if parsed.readings.iter().any(|r| !r.is_finite()) {
            return Err("readings must be finite numbers".to_string());
        }
        Ok(parsed)
    }

    fn mean(&self) -> f64 {
        self.readings.iter().sum::<f64>() / self.readings.len() as f64
    }
}

pub struct MeasurementSnapshot;

#[async_trait]
impl WorkUnit for MeasurementSnapshot {
    fn task_type(&self) -> &'static str {
        TASK_TYPE
    }

    fn validate_params(&self, params: &JsonValue) -> Result<(), String> {
        SnapshotParams::parse(params).map(|_| ())
    }

    async fn execute(&self, ctx: &TaskContext, params: JsonValue) -> WorkOutcome {
        let params = match SnapshotParams::parse(&params) {
            Ok(params) => params,
            Err(e) => return WorkOutcome::Failed(e),
        };
        if ctx.cancellation_requested() {
            return WorkOutcome::Cancelled;
        }
        if let Err(e) = ctx.report_progress(10) {
            return WorkOutcome::failed(e);
        }

        let mut remaining = Duration::from_millis(params.delay_ms);
        while !remaining.is_zero() {
            let step = remaining.min(CANCEL_POLL);
            tokio::time::sleep(step).await;
            remaining -= step;
            if ctx.cancellation_requested() {
                return WorkOutcome::Cancelled;
            }
        }
        if let Err(e) = ctx.report_progress(50) {
            return WorkOutcome::failed(e);
        }

        let percentage = params.mean();
        // Last point at which cancelling leaves no trace
        if ctx.cancellation_requested() {
            return WorkOutcome::Cancelled;
        }

        let measurement = Measurement {
            timestamp: None,
            percentage,
            sample_count: params.readings.len() as u32,
            details: params.label.as_ref().map(|label| json!({ "label": label })),
        };
        let record_id = match ctx.history().append(ctx.owner_id(), &measurement) {
            Ok(id) => id,
            Err(e) => return WorkOutcome::failed(e),
        };
        debug!(task_id = ctx.task_id(), record_id, "Measurement appended");

        if let Err(e) = ctx.report_progress(100) {
            return WorkOutcome::failed(e);
        }
        WorkOutcome::Completed(json!({
            "record_id": record_id,
            "percentage": percentage,
            "sample_count": measurement.sample_count,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryStore, SqliteHistoryStore};
    use crate::task_store::{SqliteTaskStore, TaskPriority, TaskRecord, TaskStore};
    use chrono::Utc;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn running_context(params: JsonValue) -> (TaskContext, Arc<SqliteTaskStore>, Arc<SqliteHistoryStore>) {
        let store = Arc::new(SqliteTaskStore::in_memory().unwrap());
        let history = Arc::new(SqliteHistoryStore::in_memory().unwrap());
        store
            .insert(&TaskRecord::new_pending(
                "t1".into(),
                "agent-1".into(),
                TASK_TYPE.into(),
                params,
                TaskPriority::Normal,
                None,
            ))
            .unwrap();
        store.claim("t1", "worker-0", Utc::now()).unwrap();
        let ctx = TaskContext::new(
            "t1",
            "agent-1",
            store.clone(),
            history.clone(),
            CancellationToken::new(),
        );
        (ctx, store, history)
    }

    #[test]
    fn test_validate_params() {
        let unit = MeasurementSnapshot;
        assert!(unit.validate_params(&json!({"readings": [1.0, 2.5]})).is_ok());
        assert!(unit.validate_params(&json!({"readings": []})).is_err());
        assert!(unit.validate_params(&json!({"readings": "x"})).is_err());
        assert!(unit.validate_params(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_snapshot_appends_mean() {
        let params = json!({"readings": [40.0, 60.0, 80.0], "label": "cpu"});
        let (ctx, store, history) = running_context(params.clone());

        let outcome = MeasurementSnapshot.execute(&ctx, params).await;

        let WorkOutcome::Completed(result) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(result["percentage"], json!(60.0));
        assert_eq!(result["sample_count"], json!(3));

        let records = history.query("agent-1", &Default::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].percentage, 60.0);
        assert_eq!(records[0].details, Some(json!({"label": "cpu"})));
        assert_eq!(store.get("t1").unwrap().unwrap().progress_percentage, 100);
    }

    #[tokio::test]
    async fn test_out_of_range_reading_fails_without_write() {
        let params = json!({"readings": [150.0]});
        let (ctx, store, history) = running_context(params.clone());

        let outcome = MeasurementSnapshot.execute(&ctx, params).await;

        assert!(matches!(outcome, WorkOutcome::Failed(ref e) if e.contains("percentage")));
        assert!(history.query("agent-1", &Default::default()).unwrap().is_empty());
        assert_eq!(store.get("t1").unwrap().unwrap().progress_percentage, 50);
    }

    #[tokio::test]
    async fn test_cancel_during_delay_skips_side_effect() {
        let params = json!({"readings": [10.0], "delay_ms": 5000});
        let (ctx, store, history) = running_context(params.clone());
        store.request_cancellation("t1").unwrap();

        let outcome = MeasurementSnapshot.execute(&ctx, params).await;

        assert_eq!(outcome, WorkOutcome::Cancelled);
        assert!(history.query("agent-1", &Default::default()).unwrap().is_empty());
    }
}
