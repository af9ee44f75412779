//! Per-owner time series of measurements written by work units.

mod models;
mod schema;
mod store;

pub use models::{HistoryQuery, HistoryRecord, Measurement};
pub use schema::HISTORY_VERSIONED_SCHEMAS;
pub use store::{validate_measurement, HistoryStore, SqliteHistoryStore};
