//! Database schema for queue.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

/// One row per queued entry. `entry_id` order is FIFO order within a key.
const QUEUE_ENTRIES_TABLE_V0: Table = Table {
    name: "queue_entries",
    columns: &[
        sqlite_column!("entry_id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("list_key", &SqlType::Text, non_null = true),
        sqlite_column!("value", &SqlType::Text, non_null = true),
        sqlite_column!("pushed_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_queue_entries_key", "list_key, entry_id")],
};

pub const QUEUE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[QUEUE_ENTRIES_TABLE_V0],
    migration: None,
}];
