//! Export and import of the complete device state: every register bank plus
//! the variable table.

use crate::activity::WriteSource;
use crate::registry::{RegistryError, Variable, VariableRegistry};
use crate::store::{StoreError, StoreSnapshot};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("register data rejected: {0}")]
    Store(#[from] StoreError),
    #[error("variable table rejected: {0}")]
    Registry(#[from] RegistryError),
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(default)]
    pub exported_at_ms: u64,
    pub registers: StoreSnapshot,
    pub variables: Vec<Variable>,
}

impl DeviceSnapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(json)?)
    }
}

pub fn export(registry: &VariableRegistry) -> DeviceSnapshot {
    DeviceSnapshot {
        exported_at_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
        registers: registry.store().snapshot(),
        variables: registry.list(),
    }
}

/// Replace registers and variables with the snapshot contents. Both halves
/// are validated before either is applied.
pub fn import(registry: &VariableRegistry, snapshot: &DeviceSnapshot) -> Result<(), SnapshotError> {
    let store = registry.store();
    store.validate_snapshot(&snapshot.registers)?;
    validate_variables(registry, &snapshot.variables)?;

    store.restore(&snapshot.registers, WriteSource::ExternalApi)?;
    registry.replace_all(snapshot.variables.clone())?;
    info!(
        "📥 Imported snapshot: {} registers per bank, {} variables",
        snapshot.registers.register_count,
        snapshot.variables.len()
    );
    Ok(())
}

fn validate_variables(registry: &VariableRegistry, variables: &[Variable]) -> Result<(), RegistryError> {
    // A scratch registry over the same store runs the exact define() checks.
    let scratch = VariableRegistry::new(registry.store().clone());
    for variable in variables {
        scratch.define(variable.clone())?;
    }
    Ok(())
}
