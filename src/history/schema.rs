//! Database schema for history.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const MEASUREMENTS_TABLE_V0: Table = Table {
    name: "measurements",
    columns: &[
        sqlite_column!("record_id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("owner_id", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Integer, non_null = true),
        sqlite_column!("percentage", &SqlType::Real, non_null = true),
        sqlite_column!(
            "sample_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("details", &SqlType::Text),
    ],
    indices: &[("idx_measurements_owner_time", "owner_id, timestamp")],
};

pub const HISTORY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[MEASUREMENTS_TABLE_V0],
    migration: None,
}];
