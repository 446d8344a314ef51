//! Modbus TCP server: accept loop, per-connection sessions and request
//! dispatch onto the register store.

use crate::activity::WriteSource;
use crate::protocol::{
    encode_frame, exception_pdu, read_frame, ExceptionCode, FrameError, Pdu, Request, Response,
};
use crate::store::{RegisterBank, RegisterStore, StoreError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitIdMode {
    /// Serve every unit id.
    #[default]
    Permissive,
    /// Drop requests addressed to any other unit id.
    Strict,
}

impl core::str::FromStr for UnitIdMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permissive" => Ok(UnitIdMode::Permissive),
            "strict" => Ok(UnitIdMode::Strict),
            other => Err(format!("unknown unit id mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub unit_id: u8,
    pub unit_id_mode: UnitIdMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            unit_id: 254,
            unit_id_mode: UnitIdMode::Permissive,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for ExceptionCode {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::OutOfRange { .. } | StoreError::SizeMismatch { .. } => {
                ExceptionCode::IllegalDataAddress
            }
            StoreError::ReadOnlyViolation { .. } | StoreError::UnknownBank(_) => {
                ExceptionCode::IllegalFunction
            }
            StoreError::InvalidValue { .. } => ExceptionCode::IllegalDataValue,
        }
    }
}

#[derive(Debug, Default)]
pub struct ServerStats {
    total_connections: AtomicU64,
    active_sessions: AtomicU64,
    requests_served: AtomicU64,
    exceptions_sent: AtomicU64,
    frames_rejected: AtomicU64,
    requests_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerStatsSnapshot {
    pub total_connections: u64,
    pub active_sessions: u64,
    pub requests_served: u64,
    pub exceptions_sent: u64,
    pub frames_rejected: u64,
    pub requests_dropped: u64,
}

impl ServerStats {
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            requests_served: self.requests_served.load(Ordering::Relaxed),
            exceptions_sent: self.exceptions_sent.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            requests_dropped: self.requests_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the active session count when a session ends, however it ends.
struct SessionGuard<'a>(&'a ServerStats);

impl<'a> SessionGuard<'a> {
    fn enter(stats: &'a ServerStats) -> Self {
        stats.total_connections.fetch_add(1, Ordering::Relaxed);
        stats.active_sessions.fetch_add(1, Ordering::Relaxed);
        Self(stats)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct ModbusServer {
    store: Arc<RegisterStore>,
    config: ServerConfig,
    stats: ServerStats,
}

impl ModbusServer {
    pub fn new(store: Arc<RegisterStore>, config: ServerConfig) -> Self {
        Self {
            store,
            config,
            stats: ServerStats::default(),
        }
    }

    pub fn config(&self) -> ServerConfig {
        self.config
    }

    pub fn stats(&self) -> ServerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether a request for `unit_id` should be answered.
    pub fn accepts_unit(&self, unit_id: u8) -> bool {
        match self.config.unit_id_mode {
            UnitIdMode::Permissive => true,
            UnitIdMode::Strict => unit_id == self.config.unit_id,
        }
    }

    /// Turn a request PDU into a response PDU. Never fails: every problem
    /// becomes an exception response.
    pub fn handle_pdu(&self, pdu: &[u8]) -> Pdu {
        let function = pdu.first().copied().unwrap_or(0);
        let outcome = Request::decode(pdu).and_then(|request| self.execute(&request));

        self.stats.requests_served.fetch_add(1, Ordering::Relaxed);
        let response = match outcome {
            Ok(response) => response,
            Err(code) => {
                debug!("exception {} for function 0x{:02X}", code, function);
                Response::Exception { function, code }
            }
        };
        if matches!(response, Response::Exception { .. }) {
            self.stats.exceptions_sent.fetch_add(1, Ordering::Relaxed);
        }

        response.encode().unwrap_or_else(|e| {
            error!("Failed to encode response: {}", e);
            self.stats.exceptions_sent.fetch_add(1, Ordering::Relaxed);
            exception_pdu(function, ExceptionCode::ServerDeviceFailure)
        })
    }

    pub fn execute(&self, request: &Request) -> Result<Response, ExceptionCode> {
        let source = WriteSource::ProtocolWrite;
        let response = match request {
            Request::ReadCoils { address, quantity } => {
                Response::ReadCoils(self.store.read_bits(RegisterBank::Coil, *address, *quantity)?)
            }
            Request::ReadDiscreteInputs { address, quantity } => Response::ReadDiscreteInputs(
                self.store
                    .read_bits(RegisterBank::DiscreteInput, *address, *quantity)?,
            ),
            Request::ReadHoldingRegisters { address, quantity } => Response::ReadHoldingRegisters(
                self.store
                    .read(RegisterBank::HoldingRegister, *address, *quantity)?,
            ),
            Request::ReadInputRegisters { address, quantity } => Response::ReadInputRegisters(
                self.store
                    .read(RegisterBank::InputRegister, *address, *quantity)?,
            ),
            Request::WriteSingleCoil { address, value } => {
                self.store
                    .write_one(RegisterBank::Coil, *address, u16::from(*value), source)?;
                Response::WriteSingleCoil {
                    address: *address,
                    value: *value,
                }
            }
            Request::WriteSingleRegister { address, value } => {
                self.store
                    .write_one(RegisterBank::HoldingRegister, *address, *value, source)?;
                Response::WriteSingleRegister {
                    address: *address,
                    value: *value,
                }
            }
            Request::WriteMultipleCoils { address, values } => {
                let cells: Vec<u16> = values.iter().map(|&bit| u16::from(bit)).collect();
                self.store
                    .write_many(RegisterBank::Coil, *address, &cells, source)?;
                Response::WriteMultipleCoils {
                    address: *address,
                    quantity: values.len() as u16,
                }
            }
            Request::WriteMultipleRegisters { address, values } => {
                self.store
                    .write_many(RegisterBank::HoldingRegister, *address, values, source)?;
                Response::WriteMultipleRegisters {
                    address: *address,
                    quantity: values.len() as u16,
                }
            }
        };
        Ok(response)
    }

    /// Accept connections until `shutdown` flips to true.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let local = listener.local_addr()?;
        info!("🌐 Modbus TCP server listening on {}", local);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("🔗 Client connected: {}", peer);
                        let server = Arc::clone(&self);
                        let session_shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_session(stream, peer, session_shutdown).await {
                                warn!("Client {} session closed: {}", peer, e);
                            }
                            info!("🔌 Client {} disconnected", peer);
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Modbus TCP server on {} stopping", local);
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_session(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), SessionError> {
        let _guard = SessionGuard::enter(&self.stats);
        stream.set_nodelay(true)?;

        loop {
            // The read future outlives shutdown notifications that are not a
            // stop request, so a partially received frame is never dropped.
            let frame = {
                let read = read_frame(&mut stream);
                tokio::pin!(read);
                loop {
                    tokio::select! {
                        frame = &mut read => break frame,
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                return Ok(());
                            }
                        }
                    }
                }
            };

            let frame = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(FrameError::Io(e)) => return Err(SessionError::Io(e)),
                Err(e) => {
                    self.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(SessionError::Frame(e));
                }
            };

            let header = frame.header;
            if !self.accepts_unit(header.unit_id) {
                self.stats.requests_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Dropping request from {} for unit {} (serving unit {})",
                    peer, header.unit_id, self.config.unit_id
                );
                continue;
            }

            let response = self.handle_pdu(&frame.pdu);
            let adu = encode_frame(header.transaction_id, header.unit_id, &response)?;
            stream.write_all(&adu).await?;
        }
    }
}
