//! Task record storage.
//!
//! Every mutating statement is guarded by a `status` predicate, so a row that
//! reached a terminal status is never written again.

use super::models::*;
use super::schema::TASKS_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::{from_millis, open_in_memory, open_versioned, to_millis};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

fn invalid_column(row: &rusqlite::Row, column: &str, cause: anyhow::Error) -> rusqlite::Error {
    let index = row.as_ref().column_index(column).unwrap_or_default();
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, cause.into())
}

/// Storage operations for task records.
pub trait TaskStore: Send + Sync {
    // === Records ===

    /// Insert a freshly submitted record. Fails if the id already exists.
    fn insert(&self, record: &TaskRecord) -> Result<()>;

    fn get(&self, task_id: &str) -> Result<Option<TaskRecord>>;

    /// Number of records per status, statuses with no records omitted.
    fn count_by_status(&self) -> Result<Vec<(TaskStatus, usize)>>;

    // === State Transitions (atomic) ===

    /// pending -> running, unless cancellation was already requested.
    /// Returns false if the record was not eligible.
    fn claim(&self, task_id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// pending -> cancelled.
    fn cancel_pending(&self, task_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// running -> any terminal status.
    fn finish(&self, task_id: &str, completion: &Completion, now: DateTime<Utc>) -> Result<bool>;

    // === Running task updates ===

    /// Raises progress to `percentage`; lower values leave it unchanged.
    fn update_progress(&self, task_id: &str, percentage: u8) -> Result<bool>;

    /// Renews the lease held by `worker_id`.
    fn heartbeat(&self, task_id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Finalizes as failed every running task whose last heartbeat is older
    /// than `stale_before`. Returns the finalized records.
    fn fail_expired_leases(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<Vec<TaskRecord>>;

    // === Cancellation ===

    /// Sets the cancellation flag on a non-terminal record.
    /// Returns false if the record is missing or already terminal.
    fn request_cancellation(&self, task_id: &str) -> Result<bool>;

    fn is_cancellation_requested(&self, task_id: &str) -> Result<bool>;
}

/// SQLite-backed implementation of TaskStore.
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path, TASKS_VERSIONED_SCHEMAS, "tasks")?;
        Ok(SqliteTaskStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = open_in_memory(TASKS_VERSIONED_SCHEMAS)?;
        Ok(SqliteTaskStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("task store connection mutex poisoned"))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<TaskRecord> {
        let status_text: String = row.get("status")?;
        let status = TaskStatus::from_str(&status_text)
            .ok_or_else(|| invalid_column(row, "status", anyhow!("unknown status '{}'", status_text)))?;
        let priority_text: String = row.get("priority")?;
        let priority = TaskPriority::from_str(&priority_text).ok_or_else(|| {
            invalid_column(row, "priority", anyhow!("unknown priority '{}'", priority_text))
        })?;
        let params_text: String = row.get("params")?;
        let params = serde_json::from_str(&params_text)
            .map_err(|e| invalid_column(row, "params", e.into()))?;
        let result = row
            .get::<_, Option<String>>("result")?
            .map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(|e| invalid_column(row, "result", e.into()))?;
        Ok(TaskRecord {
            task_id: row.get("task_id")?,
            owner_id: row.get("owner_id")?,
            task_type: row.get("task_type")?,
            status,
            priority,
            params,
            created_at: from_millis(row.get("created_at")?),
            started_at: row.get::<_, Option<i64>>("started_at")?.map(from_millis),
            completed_at: row.get::<_, Option<i64>>("completed_at")?.map(from_millis),
            progress_percentage: row.get::<_, i64>("progress_percentage")?.clamp(0, 100)
                as u8,
            cancellation_requested: row.get::<_, i64>("cancellation_requested")? != 0,
            result,
            error: row.get("error")?,
            webhook_url: row.get("webhook_url")?,
            worker_id: row.get("worker_id")?,
            heartbeat_at: row.get::<_, Option<i64>>("heartbeat_at")?.map(from_millis),
        })
    }

    fn get_with(conn: &Connection, task_id: &str) -> Result<Option<TaskRecord>> {
        let record = conn
            .query_row(
                "SELECT * FROM tasks WHERE task_id = ?1",
                params![task_id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }
}

impl TaskStore for SqliteTaskStore {
    fn insert(&self, record: &TaskRecord) -> Result<()> {
        let conn = self.conn()?;
        let params_text = serde_json::to_string(&record.params)?;
        let result_text = record
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            r#"INSERT INTO tasks (
                task_id, owner_id, task_type, status, priority, params, created_at,
                started_at, completed_at, progress_percentage, cancellation_requested,
                result, error, webhook_url, worker_id, heartbeat_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"#,
            params![
                record.task_id,
                record.owner_id,
                record.task_type,
                record.status.as_str(),
                record.priority.as_str(),
                params_text,
                to_millis(&record.created_at),
                record.started_at.as_ref().map(to_millis),
                record.completed_at.as_ref().map(to_millis),
                record.progress_percentage as i64,
                record.cancellation_requested as i64,
                result_text,
                record.error,
                record.webhook_url,
                record.worker_id,
                record.heartbeat_at.as_ref().map(to_millis),
            ],
        )
        .with_context(|| format!("Failed to insert task {}", record.task_id))?;
        Ok(())
    }

    fn get(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let conn = self.conn()?;
        Self::get_with(&conn, task_id)
    }

    fn count_by_status(&self) -> Result<Vec<(TaskStatus, usize)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts: Vec<(TaskStatus, usize)> = rows
            .into_iter()
            .filter_map(|(status, count)| match TaskStatus::from_str(&status) {
                Some(s) => Some((s, count as usize)),
                None => {
                    warn!("Skipping {} task rows with unknown status '{}'", count, status);
                    None
                }
            })
            .collect();
        counts.sort_by_key(|(status, _)| TaskStatus::ALL.iter().position(|s| s == status));
        Ok(counts)
    }

    fn claim(&self, task_id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let now = to_millis(&now);
        let changed = conn.execute(
            r#"UPDATE tasks
               SET status = 'running', started_at = ?2, progress_percentage = 0,
                   worker_id = ?3, heartbeat_at = ?2
               WHERE task_id = ?1 AND status = 'pending' AND cancellation_requested = 0"#,
            params![task_id, now, worker_id],
        )?;
        Ok(changed > 0)
    }

    fn cancel_pending(&self, task_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"UPDATE tasks
               SET status = 'cancelled', completed_at = ?2, cancellation_requested = 1
               WHERE task_id = ?1 AND status = 'pending'"#,
            params![task_id, to_millis(&now)],
        )?;
        Ok(changed > 0)
    }

    fn finish(&self, task_id: &str, completion: &Completion, now: DateTime<Utc>) -> Result<bool> {
        if !TaskStatus::Running.can_transition_to(completion.status) {
            return Err(anyhow!(
                "{} is not a terminal status for a running task",
                completion.status
            ));
        }
        let conn = self.conn()?;
        let result_text = completion
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        // A completed task always reports full progress.
        let changed = conn.execute(
            r#"UPDATE tasks
               SET status = ?2, result = ?3, error = ?4, completed_at = ?5,
                   progress_percentage = CASE WHEN ?2 = 'completed' THEN 100
                                              ELSE progress_percentage END
               WHERE task_id = ?1 AND status = 'running'"#,
            params![
                task_id,
                completion.status.as_str(),
                result_text,
                completion.error,
                to_millis(&now),
            ],
        )?;
        Ok(changed > 0)
    }

    fn update_progress(&self, task_id: &str, percentage: u8) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"UPDATE tasks
               SET progress_percentage = MAX(progress_percentage, ?2)
               WHERE task_id = ?1 AND status = 'running'"#,
            params![task_id, percentage.min(100) as i64],
        )?;
        Ok(changed > 0)
    }

    fn heartbeat(&self, task_id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"UPDATE tasks SET heartbeat_at = ?3
               WHERE task_id = ?1 AND worker_id = ?2 AND status = 'running'"#,
            params![task_id, worker_id, to_millis(&now)],
        )?;
        Ok(changed > 0)
    }

    fn fail_expired_leases(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
        error: &str,
    ) -> Result<Vec<TaskRecord>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let stale_ids: Vec<String> = {
            let mut stmt = tx.prepare(
                r#"SELECT task_id FROM tasks
                   WHERE status = 'running' AND COALESCE(heartbeat_at, started_at, 0) < ?1"#,
            )?;
            let ids = stmt
                .query_map(params![to_millis(&stale_before)], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            ids
        };

        let mut expired = Vec::with_capacity(stale_ids.len());
        for task_id in stale_ids {
            let changed = tx.execute(
                r#"UPDATE tasks SET status = 'failed', error = ?2, completed_at = ?3
                   WHERE task_id = ?1 AND status = 'running'"#,
                params![task_id, error, to_millis(&now)],
            )?;
            if changed > 0 {
                if let Some(record) = Self::get_with(&tx, &task_id)? {
                    expired.push(record);
                }
            }
        }
        tx.commit()?;
        Ok(expired)
    }

    fn request_cancellation(&self, task_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            r#"UPDATE tasks SET cancellation_requested = 1
               WHERE task_id = ?1 AND status IN ('pending', 'running')"#,
            params![task_id],
        )?;
        Ok(changed > 0)
    }

    fn is_cancellation_requested(&self, task_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let flag: Option<i64> = conn
            .query_row(
                "SELECT cancellation_requested FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(0) != 0)
    }
}
