use crate::activity::{ActivityLog, WriteSource};
use crate::config::{ConfigError, SimulatorConfig};
use crate::profile;
use crate::registry::{RegistryError, VariableRegistry};
use crate::server::{ModbusServer, ServerStatsSnapshot, UnitIdMode};
use crate::simulation::{SimulationEngine, SimulationError, SimulationStats};
use crate::snapshot::{self, DeviceSnapshot, SnapshotError};
use crate::store::{RegisterStore, StoreError, StoreSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("register error: {0}")]
    Store(#[from] StoreError),
    #[error("variable error: {0}")]
    Registry(#[from] RegistryError),
    #[error("simulation error: {0}")]
    Simulation(#[from] SimulationError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub uptime_seconds: u64,
    pub unit_id: u8,
    pub unit_id_mode: UnitIdMode,
    pub register_count: u16,
    pub variables: usize,
    pub simulation_enabled: bool,
    pub simulation: SimulationStats,
    pub server: ServerStatsSnapshot,
    pub activity_entries: usize,
    pub activity_total: u64,
}

/// One simulated field device: register memory, variables, generators and
/// the protocol server, all sharing the same store.
#[derive(Debug)]
pub struct FieldDevice {
    config: SimulatorConfig,
    activity: Arc<ActivityLog>,
    store: Arc<RegisterStore>,
    registry: Arc<VariableRegistry>,
    engine: Arc<SimulationEngine>,
    server: Arc<ModbusServer>,
    started: Instant,
}

impl FieldDevice {
    pub fn new(config: SimulatorConfig) -> Result<Self, DeviceError> {
        config.validate()?;

        let activity = Arc::new(ActivityLog::new());
        let store = Arc::new(RegisterStore::new(config.register_count, Arc::clone(&activity)));
        let registry = Arc::new(VariableRegistry::new(Arc::clone(&store)));
        let engine = Arc::new(SimulationEngine::new(Arc::clone(&registry), config.tick_interval()));
        let server = Arc::new(ModbusServer::new(Arc::clone(&store), config.server_config()));

        if config.load_power_profile {
            profile::install(&registry)?;
            for generator in profile::default_generators() {
                engine.add_generator(generator)?;
            }
        }

        info!(
            "🏭 Field device ready: unit {} ({:?}), {} registers per bank, {} variables",
            config.unit_id,
            config.unit_id_mode,
            config.register_count,
            registry.len()
        );

        Ok(Self {
            config,
            activity,
            store,
            registry,
            engine,
            server,
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    pub fn store(&self) -> &Arc<RegisterStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<VariableRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<SimulationEngine> {
        &self.engine
    }

    pub fn server(&self) -> &Arc<ModbusServer> {
        &self.server
    }

    /// Put every register back to its startup value.
    pub fn reset_defaults(&self) -> Result<usize, DeviceError> {
        if self.config.load_power_profile {
            return Ok(profile::reset_defaults(&self.registry)?);
        }
        let size = usize::from(self.store.size());
        let blank = StoreSnapshot {
            register_count: self.store.size(),
            coils: vec![0; size],
            discrete_inputs: vec![0; size],
            holding_registers: vec![0; size],
            input_registers: vec![0; size],
        };
        self.store.restore(&blank, WriteSource::ExternalApi)?;
        Ok(0)
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            uptime_seconds: self.started.elapsed().as_secs(),
            unit_id: self.config.unit_id,
            unit_id_mode: self.config.unit_id_mode,
            register_count: self.store.size(),
            variables: self.registry.len(),
            simulation_enabled: self.config.simulation_enabled,
            simulation: self.engine.stats(),
            server: self.server.stats(),
            activity_entries: self.activity.len(),
            activity_total: self.activity.total_recorded(),
        }
    }

    pub fn export_snapshot(&self) -> DeviceSnapshot {
        snapshot::export(&self.registry)
    }

    pub fn import_snapshot(&self, snapshot: &DeviceSnapshot) -> Result<(), DeviceError> {
        snapshot::import(&self.registry, snapshot)?;
        Ok(())
    }

    pub async fn bind(&self) -> Result<TcpListener, DeviceError> {
        Ok(TcpListener::bind(self.config.socket_addr()?).await?)
    }

    /// Serve Modbus TCP and run the simulation loop until `shutdown` flips.
    pub async fn run(&self, listener: TcpListener, shutdown: watch::Receiver<bool>) -> Result<(), DeviceError> {
        let simulation = if self.config.simulation_enabled {
            let engine = Arc::clone(&self.engine);
            let rx = shutdown.clone();
            Some(tokio::spawn(async move { engine.run(rx).await }))
        } else {
            info!("Simulation disabled, registers change only on request");
            None
        };

        let served = Arc::clone(&self.server).serve(listener, shutdown).await;

        if let Some(handle) = simulation {
            if let Err(e) = handle.await {
                error!("Simulation task failed: {}", e);
            }
        }
        served?;
        Ok(())
    }
}
