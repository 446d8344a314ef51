//! Operator command set.
//!
//! Commands are JSON objects tagged by `"command"`, one per line, e.g.
//! `{"command":"write_variable","name":"SP_V_TARGET","value":121.5}`.
//! Every command yields exactly one [`OperatorResponse`]; failures are
//! reported in the response rather than as errors.

use crate::activity::WriteSource;
use crate::device::FieldDevice;
use crate::registry::Variable;
use crate::simulation::{Generator, GeneratorKind, ScenarioPreset};
use crate::snapshot::DeviceSnapshot;
use crate::store::RegisterBank;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_RECENT_COUNT: usize = 20;

fn default_count() -> u16 {
    1
}

fn default_recent() -> usize {
    DEFAULT_RECENT_COUNT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OperatorCommand {
    GetRegister {
        bank: RegisterBank,
        address: u16,
        #[serde(default = "default_count")]
        count: u16,
    },
    SetRegister {
        bank: RegisterBank,
        address: u16,
        value: u16,
    },
    ReadVariable {
        name: String,
    },
    WriteVariable {
        name: String,
        value: f64,
    },
    DefineVariable {
        variable: Variable,
    },
    RemoveVariable {
        name: String,
    },
    ListVariables {
        #[serde(default)]
        bank: Option<RegisterBank>,
    },
    RecentActivity {
        #[serde(default = "default_recent")]
        count: usize,
    },
    ListGenerators,
    AddGenerator {
        generator: Generator,
    },
    RemoveGenerator {
        name: String,
    },
    SetGeneratorEnabled {
        name: String,
        enabled: bool,
    },
    UpdateGenerator {
        name: String,
        kind: GeneratorKind,
    },
    ApplyScenario {
        scenario: ScenarioPreset,
    },
    Export,
    Import {
        snapshot: DeviceSnapshot,
    },
    ResetDefaults,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    Error,
    InvalidCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorResponse {
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl OperatorResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: Some(message.into()),
            data: None,
        }
    }

    fn with_data(data: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: None,
            data: Some(data),
        }
    }

    fn error(message: impl core::fmt::Display) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: Some(message.to_string()),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Runs operator commands against a device. Writes are tagged external-api.
#[derive(Debug, Clone)]
pub struct Console {
    device: Arc<FieldDevice>,
}

impl Console {
    pub fn new(device: Arc<FieldDevice>) -> Self {
        Self { device }
    }

    /// Parse and execute one JSON line.
    pub fn execute_line(&self, line: &str) -> OperatorResponse {
        match serde_json::from_str::<OperatorCommand>(line) {
            Ok(command) => self.execute(command),
            Err(e) => {
                warn!("Failed to parse operator command: {}", e);
                OperatorResponse {
                    status: ResponseStatus::InvalidCommand,
                    message: Some(format!("Invalid command format: {e}")),
                    data: None,
                }
            }
        }
    }

    pub fn execute(&self, command: OperatorCommand) -> OperatorResponse {
        debug!("📨 Operator command: {:?}", command);
        let device = &self.device;
        let registry = device.registry();
        let engine = device.engine();

        match command {
            OperatorCommand::GetRegister { bank, address, count } => {
                match device.store().read(bank, address, count) {
                    Ok(values) => OperatorResponse::with_data(json!({
                        "bank": bank,
                        "address": address,
                        "values": values,
                    })),
                    Err(e) => OperatorResponse::error(e),
                }
            }

            OperatorCommand::SetRegister { bank, address, value } => {
                match device
                    .store()
                    .write_one(bank, address, value, WriteSource::ExternalApi)
                {
                    Ok(previous) => OperatorResponse {
                        status: ResponseStatus::Success,
                        message: Some(format!("{bank} {address} set to {value}")),
                        data: Some(json!({ "previous": previous })),
                    },
                    Err(e) => OperatorResponse::error(e),
                }
            }

            OperatorCommand::ReadVariable { name } => {
                let Some(variable) = registry.get(&name) else {
                    return OperatorResponse::error(format!("unknown variable '{name}'"));
                };
                match (registry.read_engineering(&name), registry.read_raw(&name)) {
                    (Ok(value), Ok(raw)) => OperatorResponse::with_data(json!({
                        "name": name,
                        "value": value,
                        "raw": raw,
                        "unit": variable.unit,
                    })),
                    (Err(e), _) | (_, Err(e)) => OperatorResponse::error(e),
                }
            }

            OperatorCommand::WriteVariable { name, value } => {
                match registry.write_engineering(&name, value, WriteSource::ExternalApi) {
                    Ok(raw) => OperatorResponse {
                        status: ResponseStatus::Success,
                        message: Some(format!("{name} set to {value}")),
                        data: Some(json!({ "raw": raw })),
                    },
                    Err(e) => OperatorResponse::error(e),
                }
            }

            OperatorCommand::DefineVariable { variable } => {
                let name = variable.name.clone();
                match registry.define(variable) {
                    Ok(()) => OperatorResponse::ok(format!("variable '{name}' defined")),
                    Err(e) => OperatorResponse::error(e),
                }
            }

            OperatorCommand::RemoveVariable { name } => match registry.remove(&name) {
                Ok(_) => OperatorResponse::ok(format!("variable '{name}' removed")),
                Err(e) => OperatorResponse::error(e),
            },

            OperatorCommand::ListVariables { bank } => {
                let mut rows = Vec::new();
                for variable in registry.list() {
                    if bank.is_some_and(|b| b != variable.bank) {
                        continue;
                    }
                    match (registry.read_engineering(&variable.name), registry.read_raw(&variable.name)) {
                        (Ok(value), Ok(raw)) => rows.push(json!({
                            "name": variable.name,
                            "bank": variable.bank,
                            "address": variable.address,
                            "count": variable.count,
                            "scale": variable.scale,
                            "unit": variable.unit,
                            "description": variable.description,
                            "writable": variable.writable,
                            "raw": raw,
                            "value": value,
                        })),
                        (Err(e), _) | (_, Err(e)) => return OperatorResponse::error(e),
                    }
                }
                OperatorResponse::with_data(Value::Array(rows))
            }

            OperatorCommand::RecentActivity { count } => to_data(&device.activity().recent(count)),

            OperatorCommand::ListGenerators => to_data(&engine.list()),

            OperatorCommand::AddGenerator { generator } => {
                let name = generator.name.clone();
                match engine.add_generator(generator) {
                    Ok(()) => OperatorResponse::ok(format!("generator '{name}' added")),
                    Err(e) => OperatorResponse::error(e),
                }
            }

            OperatorCommand::RemoveGenerator { name } => match engine.remove_generator(&name) {
                Ok(_) => OperatorResponse::ok(format!("generator '{name}' removed")),
                Err(e) => OperatorResponse::error(e),
            },

            OperatorCommand::SetGeneratorEnabled { name, enabled } => {
                match engine.set_enabled(&name, enabled) {
                    Ok(()) => OperatorResponse::ok(format!(
                        "generator '{name}' {}",
                        if enabled { "enabled" } else { "disabled" }
                    )),
                    Err(e) => OperatorResponse::error(e),
                }
            }

            OperatorCommand::UpdateGenerator { name, kind } => {
                match engine.update_parameters(&name, kind) {
                    Ok(()) => OperatorResponse::ok(format!("generator '{name}' updated")),
                    Err(e) => OperatorResponse::error(e),
                }
            }

            OperatorCommand::ApplyScenario { scenario } => match engine.apply_scenario(&scenario) {
                Ok(changes) => OperatorResponse::ok(format!(
                    "scenario '{}' applied ({changes} changes)",
                    scenario.name
                )),
                Err(e) => OperatorResponse::error(e),
            },

            OperatorCommand::Export => to_data(&device.export_snapshot()),

            OperatorCommand::Import { snapshot } => match device.import_snapshot(&snapshot) {
                Ok(()) => OperatorResponse::ok("snapshot imported"),
                Err(e) => OperatorResponse::error(e),
            },

            OperatorCommand::ResetDefaults => match device.reset_defaults() {
                Ok(_) => OperatorResponse::ok("all registers reset to defaults"),
                Err(e) => OperatorResponse::error(e),
            },

            OperatorCommand::Status => to_data(&device.status()),
        }
    }
}

fn to_data<T: Serialize>(value: &T) -> OperatorResponse {
    match serde_json::to_value(value) {
        Ok(data) => OperatorResponse::with_data(data),
        Err(e) => OperatorResponse::error(e),
    }
}
