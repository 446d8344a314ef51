//! Minimal async Modbus TCP client.

use crate::protocol::{
    encode_frame, read_frame, ExceptionCode, FrameError, Request, Response, MAX_READ_BITS,
    MAX_READ_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::timeout;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("device answered with exception: {0}")]
    Exception(ExceptionCode),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by device")]
    Closed,
    #[error("request timed out")]
    Timeout,
    #[error("transaction id mismatch: sent {sent}, got {received}")]
    TransactionMismatch { sent: u16, received: u16 },
    #[error("quantity {quantity} outside 1..={max}")]
    InvalidQuantity { quantity: usize, max: u16 },
    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(Response),
}

#[derive(Debug)]
pub struct ModbusClient {
    stream: TcpStream,
    unit_id: u8,
    next_transaction: u16,
    timeout: Duration,
}

impl ModbusClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A, unit_id: u8) -> Result<Self, ClientError> {
        let stream = match timeout(DEFAULT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(ClientError::Timeout),
        };
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            unit_id,
            next_transaction: 1,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    /// Send one request and wait for the matching response.
    pub async fn call(&mut self, request: Request) -> Result<Response, ClientError> {
        let transaction_id = self.next_transaction;
        self.next_transaction = self.next_transaction.wrapping_add(1);

        let pdu = request.encode()?;
        let adu = encode_frame(transaction_id, self.unit_id, &pdu)?;
        self.stream.write_all(&adu).await?;

        let frame = match timeout(self.timeout, read_frame(&mut self.stream)).await {
            Ok(frame) => frame?.ok_or(ClientError::Closed)?,
            Err(_) => return Err(ClientError::Timeout),
        };
        if frame.header.transaction_id != transaction_id {
            return Err(ClientError::TransactionMismatch {
                sent: transaction_id,
                received: frame.header.transaction_id,
            });
        }

        match Response::decode(&frame.pdu, &request)? {
            Response::Exception { code, .. } => Err(ClientError::Exception(code)),
            response => Ok(response),
        }
    }

    pub async fn read_coils(&mut self, address: u16, quantity: u16) -> Result<Vec<bool>, ClientError> {
        check_quantity(usize::from(quantity), MAX_READ_BITS)?;
        match self.call(Request::ReadCoils { address, quantity }).await? {
            Response::ReadCoils(bits) => Ok(bits),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    pub async fn read_discrete_inputs(&mut self, address: u16, quantity: u16) -> Result<Vec<bool>, ClientError> {
        check_quantity(usize::from(quantity), MAX_READ_BITS)?;
        match self.call(Request::ReadDiscreteInputs { address, quantity }).await? {
            Response::ReadDiscreteInputs(bits) => Ok(bits),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    pub async fn read_holding_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>, ClientError> {
        check_quantity(usize::from(quantity), MAX_READ_REGISTERS)?;
        match self.call(Request::ReadHoldingRegisters { address, quantity }).await? {
            Response::ReadHoldingRegisters(words) => Ok(words),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    pub async fn read_input_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>, ClientError> {
        check_quantity(usize::from(quantity), MAX_READ_REGISTERS)?;
        match self.call(Request::ReadInputRegisters { address, quantity }).await? {
            Response::ReadInputRegisters(words) => Ok(words),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    pub async fn write_single_coil(&mut self, address: u16, value: bool) -> Result<(), ClientError> {
        match self.call(Request::WriteSingleCoil { address, value }).await? {
            Response::WriteSingleCoil { .. } => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    pub async fn write_single_register(&mut self, address: u16, value: u16) -> Result<(), ClientError> {
        match self.call(Request::WriteSingleRegister { address, value }).await? {
            Response::WriteSingleRegister { .. } => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    pub async fn write_multiple_coils(&mut self, address: u16, values: &[bool]) -> Result<(), ClientError> {
        check_quantity(values.len(), MAX_WRITE_COILS)?;
        let request = Request::WriteMultipleCoils {
            address,
            values: values.to_vec(),
        };
        match self.call(request).await? {
            Response::WriteMultipleCoils { .. } => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    pub async fn write_multiple_registers(&mut self, address: u16, values: &[u16]) -> Result<(), ClientError> {
        check_quantity(values.len(), MAX_WRITE_REGISTERS)?;
        let request = Request::WriteMultipleRegisters {
            address,
            values: values.to_vec(),
        };
        match self.call(request).await? {
            Response::WriteMultipleRegisters { .. } => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }
}

fn check_quantity(quantity: usize, max: u16) -> Result<(), ClientError> {
    if quantity == 0 || quantity > usize::from(max) {
        return Err(ClientError::InvalidQuantity { quantity, max });
    }
    Ok(())
}
