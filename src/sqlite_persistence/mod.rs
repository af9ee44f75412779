mod versioned_schema;

pub use versioned_schema::{
    open_in_memory, open_versioned, Column, SqlType, Table, VersionedSchema,
};

/// Offset added to every schema version stored in `PRAGMA user_version`, so a
/// database created by an unrelated tool is never mistaken for one of ours.
pub const BASE_DB_VERSION: usize = 700;

/// Milliseconds since the Unix epoch, the on-disk timestamp representation.
pub fn to_millis(ts: &chrono::DateTime<chrono::Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
