//! Built-in work units.

pub mod measurement_snapshot;

pub use measurement_snapshot::MeasurementSnapshot;

use crate::error::TaskResult;
use crate::worker::WorkUnitRegistry;
use std::sync::Arc;

/// Registry with every built-in unit.
pub fn default_registry() -> TaskResult<WorkUnitRegistry> {
    let mut registry = WorkUnitRegistry::new();
    registry.register(Arc::new(MeasurementSnapshot))?;
    Ok(registry)
}
