//! Database schema for tasks.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const TASKS_TABLE_V0: Table = Table {
    name: "tasks",
    columns: &[
        sqlite_column!("task_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("owner_id", &SqlType::Text, non_null = true),
        sqlite_column!("task_type", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("priority", &SqlType::Text, non_null = true),
        sqlite_column!("params", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("completed_at", &SqlType::Integer),
        sqlite_column!(
            "progress_percentage",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "cancellation_requested",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("result", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
        sqlite_column!("webhook_url", &SqlType::Text),
    ],
    indices: &[
        ("idx_tasks_owner", "owner_id, created_at"),
        ("idx_tasks_status", "status"),
    ],
};

/// Version 1 adds the worker lease columns.
const TASKS_TABLE_V1: Table = Table {
    name: "tasks",
    columns: &[
        sqlite_column!("task_id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("owner_id", &SqlType::Text, non_null = true),
        sqlite_column!("task_type", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("priority", &SqlType::Text, non_null = true),
        sqlite_column!("params", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("completed_at", &SqlType::Integer),
        sqlite_column!(
            "progress_percentage",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "cancellation_requested",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("result", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
        sqlite_column!("webhook_url", &SqlType::Text),
        sqlite_column!("worker_id", &SqlType::Text),
        sqlite_column!("heartbeat_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_tasks_owner", "owner_id, created_at"),
        ("idx_tasks_status", "status"),
        ("idx_tasks_heartbeat", "status, heartbeat_at"),
    ],
};

fn migrate_v0_to_v1(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    conn.execute("ALTER TABLE tasks ADD COLUMN worker_id TEXT", [])?;
    conn.execute("ALTER TABLE tasks ADD COLUMN heartbeat_at INTEGER", [])?;
    conn.execute(
        "CREATE INDEX idx_tasks_heartbeat ON tasks(status, heartbeat_at)",
        [],
    )?;
    Ok(())
}

pub const TASKS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[TASKS_TABLE_V0],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[TASKS_TABLE_V1],
        migration: Some(migrate_v0_to_v1),
    },
];
