//! # IED Simulator
//!
//! A Modbus TCP field device simulator: a shared register memory served over
//! the wire, animated by signal generators and adjustable through an
//! operator command set.
//!
//! ## Features
//!
//! - **Register memory**: coils, discrete inputs, holding and input registers with bounds-checked, atomic access
//! - **Modbus TCP server**: function codes 01-06, 15 and 16 with exact exception semantics
//! - **Engineering units**: named variables with scale factors, signed and 32-bit values
//! - **Simulation**: sine, ramp, random walk and square generators on a fixed tick
//! - **Activity log**: bounded history of every register change and who made it
//! - **Power profile**: a ready-made substation register map with default generators
//!
//! ## Quick Start
//!
//! ```no_run
//! use iedsim::{FieldDevice, SimulatorConfig};
//! use tokio::sync::watch;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let device = FieldDevice::new(SimulatorConfig::default())?;
//! let listener = device.bind().await?;
//!
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//! device.run(listener, shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`store`] - Register banks shared by every writer
//! - [`registry`] - Named variables and engineering-unit conversion
//! - [`protocol`] - MBAP framing and PDU codec
//! - [`server`] - TCP accept loop and request dispatch
//! - [`simulation`] - Signal generators and the tick scheduler
//! - [`activity`] - Bounded mutation history
//! - [`device`] - Orchestrator owning all of the above
//! - [`console`] - Operator commands executed against a device

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod activity;
pub mod client;
pub mod config;
pub mod console;
pub mod device;
pub mod profile;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod simulation;
pub mod snapshot;
pub mod store;

// Re-export main public types for convenience
pub use activity::{ActivityLog, ActivityLogEntry, WriteSource};
pub use client::ModbusClient;
pub use config::SimulatorConfig;
pub use console::{Console, OperatorCommand, OperatorResponse};
pub use device::FieldDevice;
pub use registry::{Variable, VariableRegistry};
pub use server::{ModbusServer, ServerConfig, UnitIdMode};
pub use simulation::{Generator, GeneratorKind, SimulationEngine};
pub use store::{RegisterBank, RegisterStore};
