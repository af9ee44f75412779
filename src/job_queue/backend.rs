//! Named FIFO lists backing the job queue.

use super::schema::QUEUE_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::{open_in_memory, open_versioned};
use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// A store of named FIFO lists of opaque strings.
///
/// `pop_front` must be atomic: one entry is handed to exactly one caller.
pub trait QueueBackend: Send + Sync {
    fn push_back(&self, key: &str, value: &str) -> Result<()>;

    fn pop_front(&self, key: &str) -> Result<Option<String>>;

    fn len(&self, key: &str) -> Result<usize>;

    /// Snapshot of the list as (entry id, value), head first.
    fn entries(&self, key: &str) -> Result<Vec<(i64, String)>>;

    /// Deletes one entry by id. Returns false if it is no longer there.
    fn delete_entry(&self, key: &str, entry_id: i64) -> Result<bool>;
}

#[derive(Clone)]
pub struct SqliteQueueBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQueueBackend {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path, QUEUE_VERSIONED_SCHEMAS, "queue")?;
        Ok(SqliteQueueBackend {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(SqliteQueueBackend {
            conn: Arc::new(Mutex::new(open_in_memory(QUEUE_VERSIONED_SCHEMAS)?)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("queue connection mutex poisoned"))
    }
}

impl QueueBackend for SqliteQueueBackend {
    fn push_back(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO queue_entries (list_key, value, pushed_at) VALUES (?1, ?2, ?3)",
            params![key, value, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn pop_front(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                r#"DELETE FROM queue_entries
                   WHERE entry_id = (
                       SELECT entry_id FROM queue_entries
                       WHERE list_key = ?1 ORDER BY entry_id LIMIT 1
                   )
                   RETURNING value"#,
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn len(&self, key: &str) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_entries WHERE list_key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn entries(&self, key: &str) -> Result<Vec<(i64, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT entry_id, value FROM queue_entries WHERE list_key = ?1 ORDER BY entry_id",
        )?;
        let entries = stmt
            .query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn delete_entry(&self, key: &str, entry_id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "DELETE FROM queue_entries WHERE list_key = ?1 AND entry_id = ?2",
            params![key, entry_id],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fifo_per_key() {
        let backend = SqliteQueueBackend::in_memory().unwrap();
        backend.push_back("a", "1").unwrap();
        backend.push_back("b", "x").unwrap();
        backend.push_back("a", "2").unwrap();

        assert_eq!(backend.len("a").unwrap(), 2);
        assert_eq!(backend.pop_front("a").unwrap().as_deref(), Some("1"));
        assert_eq!(backend.pop_front("a").unwrap().as_deref(), Some("2"));
        assert_eq!(backend.pop_front("a").unwrap(), None);
        assert_eq!(backend.len("b").unwrap(), 1);
    }

    #[test]
    fn test_delete_entry_loses_to_pop() {
        let backend = SqliteQueueBackend::in_memory().unwrap();
        backend.push_back("a", "only").unwrap();
        let (entry_id, _) = backend.entries("a").unwrap()[0].clone();

        backend.pop_front("a").unwrap();
        assert!(!backend.delete_entry("a", entry_id).unwrap());
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.db");
        SqliteQueueBackend::new(&path)
            .unwrap()
            .push_back("a", "kept")
            .unwrap();

        let backend = SqliteQueueBackend::new(&path).unwrap();
        assert_eq!(backend.pop_front("a").unwrap().as_deref(), Some("kept"));
    }

    #[test]
    fn test_concurrent_pops_hand_out_each_entry_once() {
        let backend = Arc::new(SqliteQueueBackend::in_memory().unwrap());
        for i in 0..200 {
            backend.push_back("a", &i.to_string()).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let backend = backend.clone();
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    while let Some(v) = backend.pop_front("a").unwrap() {
                        got.push(v);
                    }
                    got
                })
            })
            .collect();

        let mut all: Vec<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(all.len(), 200);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 200);
    }
}
