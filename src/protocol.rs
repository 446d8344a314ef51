//! Modbus TCP framing and PDU codec.
//!
//! Frames are a 7-byte MBAP header followed by a PDU of at most 253 bytes.
//! Decoding is split in two layers: [`read_frame`] rejects frames that are
//! malformed at the transport level (the session is closed), while
//! [`Request::decode`] turns a well-framed PDU into a request or an
//! [`ExceptionCode`] that is answered on the wire.

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const MBAP_HEADER_SIZE: usize = 7;
pub const MAX_PDU_SIZE: usize = 253;
pub const MAX_ADU_SIZE: usize = MBAP_HEADER_SIZE + MAX_PDU_SIZE;

/// Smallest and largest legal MBAP length field (unit id + PDU).
pub const MIN_LENGTH_FIELD: u16 = 2;
pub const MAX_LENGTH_FIELD: u16 = 1 + MAX_PDU_SIZE as u16;

pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_COILS: u16 = 1968;
pub const MAX_WRITE_REGISTERS: u16 = 123;

pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

const EXCEPTION_FLAG: u8 = 0x80;

const_assert!(MAX_ADU_SIZE == 260);
// Largest responses and write requests must fit a single PDU.
const_assert!(2 + (MAX_READ_BITS as usize + 7) / 8 <= MAX_PDU_SIZE);
const_assert!(2 + 2 * MAX_READ_REGISTERS as usize <= MAX_PDU_SIZE);
const_assert!(6 + (MAX_WRITE_COILS as usize + 7) / 8 <= MAX_PDU_SIZE);
const_assert!(6 + 2 * MAX_WRITE_REGISTERS as usize <= MAX_PDU_SIZE);

pub type Pdu = ArrayVec<u8, MAX_PDU_SIZE>;
pub type Adu = ArrayVec<u8, MAX_ADU_SIZE>;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("protocol id {0} is not Modbus")]
    InvalidProtocolId(u16),
    #[error("length field {0} outside 2..=254")]
    InvalidLength(u16),
    #[error("frame truncated")]
    Truncated,
    #[error("pdu of {0} bytes exceeds 253")]
    PduTooLarge(usize),
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),
    #[error("unknown exception code {0}")]
    UnknownException(u8),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(FunctionCode::ReadCoils),
            0x02 => Some(FunctionCode::ReadDiscreteInputs),
            0x03 => Some(FunctionCode::ReadHoldingRegisters),
            0x04 => Some(FunctionCode::ReadInputRegisters),
            0x05 => Some(FunctionCode::WriteSingleCoil),
            0x06 => Some(FunctionCode::WriteSingleRegister),
            0x0F => Some(FunctionCode::WriteMultipleCoils),
            0x10 => Some(FunctionCode::WriteMultipleRegisters),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(ExceptionCode::IllegalFunction),
            0x02 => Some(ExceptionCode::IllegalDataAddress),
            0x03 => Some(ExceptionCode::IllegalDataValue),
            0x04 => Some(ExceptionCode::ServerDeviceFailure),
            _ => None,
        }
    }
}

impl core::fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ExceptionCode::IllegalFunction => write!(f, "illegal function"),
            ExceptionCode::IllegalDataAddress => write!(f, "illegal data address"),
            ExceptionCode::IllegalDataValue => write!(f, "illegal data value"),
            ExceptionCode::ServerDeviceFailure => write!(f, "server device failure"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn new(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: pdu_len as u16 + 1,
            unit_id,
        }
    }

    pub fn decode(bytes: &[u8; MBAP_HEADER_SIZE]) -> Result<Self, FrameError> {
        let header = Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        };
        if header.protocol_id != 0 {
            return Err(FrameError::InvalidProtocolId(header.protocol_id));
        }
        if !(MIN_LENGTH_FIELD..=MAX_LENGTH_FIELD).contains(&header.length) {
            return Err(FrameError::InvalidLength(header.length));
        }
        Ok(header)
    }

    pub fn encode(&self) -> [u8; MBAP_HEADER_SIZE] {
        let tid = self.transaction_id.to_be_bytes();
        let pid = self.protocol_id.to_be_bytes();
        let len = self.length.to_be_bytes();
        [tid[0], tid[1], pid[0], pid[1], len[0], len[1], self.unit_id]
    }

    /// Bytes of PDU that follow the header.
    pub fn pdu_len(&self) -> usize {
        usize::from(self.length) - 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: MbapHeader,
    pub pdu: Pdu,
}

impl Frame {
    pub fn encode(&self) -> Result<Adu, FrameError> {
        encode_frame(self.header.transaction_id, self.header.unit_id, &self.pdu)
    }
}

pub fn encode_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Result<Adu, FrameError> {
    if pdu.len() > MAX_PDU_SIZE {
        return Err(FrameError::PduTooLarge(pdu.len()));
    }
    let header = MbapHeader::new(transaction_id, unit_id, pdu.len());
    let mut adu = Adu::new();
    adu.try_extend_from_slice(&header.encode())
        .and_then(|()| adu.try_extend_from_slice(pdu))
        .map_err(|_| FrameError::PduTooLarge(pdu.len()))?;
    Ok(adu)
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; MBAP_HEADER_SIZE];
    if reader.read(&mut header[..1]).await? == 0 {
        return Ok(None);
    }
    fill(reader, &mut header[1..]).await?;
    let header = MbapHeader::decode(&header)?;

    let mut body = [0u8; MAX_PDU_SIZE];
    let len = header.pdu_len();
    fill(reader, &mut body[..len]).await?;

    let mut pdu = Pdu::new();
    pdu.try_extend_from_slice(&body[..len])
        .map_err(|_| FrameError::PduTooLarge(len))?;
    Ok(Some(Frame { header, pdu }))
}

async fn fill<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FrameError::Truncated),
        Err(e) => Err(FrameError::Io(e)),
    }
}

pub fn exception_pdu(function: u8, code: ExceptionCode) -> Pdu {
    let mut pdu = Pdu::new();
    pdu.push(function | EXCEPTION_FLAG);
    pdu.push(code as u8);
    pdu
}

/// Pack booleans LSB-first into bytes.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

pub fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count)
        .map(|i| bytes.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0))
        .collect()
}

fn be_u16(pdu: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([pdu[offset], pdu[offset + 1]])
}

fn push_u16(pdu: &mut Pdu, value: u16) -> Result<(), FrameError> {
    pdu.try_extend_from_slice(&value.to_be_bytes())
        .map_err(|_| FrameError::PduTooLarge(pdu.len() + 2))
}

fn push_bytes(pdu: &mut Pdu, bytes: &[u8]) -> Result<(), FrameError> {
    pdu.try_extend_from_slice(bytes)
        .map_err(|_| FrameError::PduTooLarge(pdu.len() + bytes.len()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl Request {
    pub fn function_code(&self) -> FunctionCode {
        match self {
            Request::ReadCoils { .. } => FunctionCode::ReadCoils,
            Request::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            Request::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Request::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            Request::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Request::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Request::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            Request::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
        }
    }

    /// Parse a request PDU. Quantities and payload shape are checked here,
    /// address ranges are left to the register store.
    pub fn decode(pdu: &[u8]) -> Result<Self, ExceptionCode> {
        let function = pdu
            .first()
            .copied()
            .and_then(FunctionCode::from_u8)
            .ok_or(ExceptionCode::IllegalFunction)?;

        if pdu.len() < 5 {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let address = be_u16(pdu, 1);
        let word = be_u16(pdu, 3);

        let read_quantity = |max: u16| {
            if word == 0 || word > max {
                Err(ExceptionCode::IllegalDataValue)
            } else {
                Ok(word)
            }
        };

        match function {
            FunctionCode::ReadCoils => Ok(Request::ReadCoils {
                address,
                quantity: read_quantity(MAX_READ_BITS)?,
            }),
            FunctionCode::ReadDiscreteInputs => Ok(Request::ReadDiscreteInputs {
                address,
                quantity: read_quantity(MAX_READ_BITS)?,
            }),
            FunctionCode::ReadHoldingRegisters => Ok(Request::ReadHoldingRegisters {
                address,
                quantity: read_quantity(MAX_READ_REGISTERS)?,
            }),
            FunctionCode::ReadInputRegisters => Ok(Request::ReadInputRegisters {
                address,
                quantity: read_quantity(MAX_READ_REGISTERS)?,
            }),
            FunctionCode::WriteSingleCoil => match word {
                COIL_ON => Ok(Request::WriteSingleCoil { address, value: true }),
                COIL_OFF => Ok(Request::WriteSingleCoil { address, value: false }),
                _ => Err(ExceptionCode::IllegalDataValue),
            },
            FunctionCode::WriteSingleRegister => Ok(Request::WriteSingleRegister { address, value: word }),
            FunctionCode::WriteMultipleCoils => {
                let quantity = read_quantity(MAX_WRITE_COILS)?;
                let data = write_payload(pdu, usize::from(quantity).div_ceil(8))?;
                Ok(Request::WriteMultipleCoils {
                    address,
                    values: unpack_bits(data, usize::from(quantity)),
                })
            }
            FunctionCode::WriteMultipleRegisters => {
                let quantity = read_quantity(MAX_WRITE_REGISTERS)?;
                let data = write_payload(pdu, usize::from(quantity) * 2)?;
                Ok(Request::WriteMultipleRegisters {
                    address,
                    values: data.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect(),
                })
            }
        }
    }

    pub fn encode(&self) -> Result<Pdu, FrameError> {
        let mut pdu = Pdu::new();
        pdu.push(self.function_code().as_u8());
        match self {
            Request::ReadCoils { address, quantity }
            | Request::ReadDiscreteInputs { address, quantity }
            | Request::ReadHoldingRegisters { address, quantity }
            | Request::ReadInputRegisters { address, quantity } => {
                push_u16(&mut pdu, *address)?;
                push_u16(&mut pdu, *quantity)?;
            }
            Request::WriteSingleCoil { address, value } => {
                push_u16(&mut pdu, *address)?;
                push_u16(&mut pdu, if *value { COIL_ON } else { COIL_OFF })?;
            }
            Request::WriteSingleRegister { address, value } => {
                push_u16(&mut pdu, *address)?;
                push_u16(&mut pdu, *value)?;
            }
            Request::WriteMultipleCoils { address, values } => {
                let packed = pack_bits(values);
                push_u16(&mut pdu, *address)?;
                push_u16(&mut pdu, values.len() as u16)?;
                push_bytes(&mut pdu, &[packed.len() as u8])?;
                push_bytes(&mut pdu, &packed)?;
            }
            Request::WriteMultipleRegisters { address, values } => {
                push_u16(&mut pdu, *address)?;
                push_u16(&mut pdu, values.len() as u16)?;
                push_bytes(&mut pdu, &[(values.len() * 2) as u8])?;
                for value in values {
                    push_u16(&mut pdu, *value)?;
                }
            }
        }
        Ok(pdu)
    }
}

/// Byte-count field and data of a multiple-write request.
fn write_payload(pdu: &[u8], expected: usize) -> Result<&[u8], ExceptionCode> {
    let byte_count = pdu.get(5).copied().ok_or(ExceptionCode::IllegalDataValue)?;
    if usize::from(byte_count) != expected || pdu.len() < 6 + expected {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok(&pdu[6..6 + expected])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<bool>),
    ReadDiscreteInputs(Vec<bool>),
    ReadHoldingRegisters(Vec<u16>),
    ReadInputRegisters(Vec<u16>),
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, quantity: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
    Exception { function: u8, code: ExceptionCode },
}

impl Response {
    pub fn encode(&self) -> Result<Pdu, FrameError> {
        let mut pdu = Pdu::new();
        match self {
            Response::ReadCoils(bits) | Response::ReadDiscreteInputs(bits) => {
                let code = if matches!(self, Response::ReadCoils(_)) {
                    FunctionCode::ReadCoils
                } else {
                    FunctionCode::ReadDiscreteInputs
                };
                let packed = pack_bits(bits);
                push_bytes(&mut pdu, &[code.as_u8(), packed.len() as u8])?;
                push_bytes(&mut pdu, &packed)?;
            }
            Response::ReadHoldingRegisters(words) | Response::ReadInputRegisters(words) => {
                let code = if matches!(self, Response::ReadHoldingRegisters(_)) {
                    FunctionCode::ReadHoldingRegisters
                } else {
                    FunctionCode::ReadInputRegisters
                };
                push_bytes(&mut pdu, &[code.as_u8(), (words.len() * 2) as u8])?;
                for word in words {
                    push_u16(&mut pdu, *word)?;
                }
            }
            Response::WriteSingleCoil { address, value } => {
                push_bytes(&mut pdu, &[FunctionCode::WriteSingleCoil.as_u8()])?;
                push_u16(&mut pdu, *address)?;
                push_u16(&mut pdu, if *value { COIL_ON } else { COIL_OFF })?;
            }
            Response::WriteSingleRegister { address, value } => {
                push_bytes(&mut pdu, &[FunctionCode::WriteSingleRegister.as_u8()])?;
                push_u16(&mut pdu, *address)?;
                push_u16(&mut pdu, *value)?;
            }
            Response::WriteMultipleCoils { address, quantity } => {
                push_bytes(&mut pdu, &[FunctionCode::WriteMultipleCoils.as_u8()])?;
                push_u16(&mut pdu, *address)?;
                push_u16(&mut pdu, *quantity)?;
            }
            Response::WriteMultipleRegisters { address, quantity } => {
                push_bytes(&mut pdu, &[FunctionCode::WriteMultipleRegisters.as_u8()])?;
                push_u16(&mut pdu, *address)?;
                push_u16(&mut pdu, *quantity)?;
            }
            Response::Exception { function, code } => return Ok(exception_pdu(*function, *code)),
        }
        Ok(pdu)
    }

    /// Parse a response PDU for the request that produced it.
    pub fn decode(pdu: &[u8], request: &Request) -> Result<Self, FrameError> {
        let function = *pdu.first().ok_or(FrameError::MalformedResponse("empty pdu"))?;
        if function & EXCEPTION_FLAG != 0 {
            let raw = *pdu.get(1).ok_or(FrameError::MalformedResponse("missing exception code"))?;
            let code = ExceptionCode::from_u8(raw).ok_or(FrameError::UnknownException(raw))?;
            return Ok(Response::Exception {
                function: function & !EXCEPTION_FLAG,
                code,
            });
        }
        if function != request.function_code().as_u8() {
            return Err(FrameError::MalformedResponse("function code mismatch"));
        }

        let words = |bytes: &[u8]| -> Vec<u16> {
            bytes.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect()
        };

        match request {
            Request::ReadCoils { quantity, .. } => {
                Ok(Response::ReadCoils(unpack_bits(response_data(pdu)?, usize::from(*quantity))))
            }
            Request::ReadDiscreteInputs { quantity, .. } => {
                Ok(Response::ReadDiscreteInputs(unpack_bits(response_data(pdu)?, usize::from(*quantity))))
            }
            Request::ReadHoldingRegisters { .. } => Ok(Response::ReadHoldingRegisters(words(response_data(pdu)?))),
            Request::ReadInputRegisters { .. } => Ok(Response::ReadInputRegisters(words(response_data(pdu)?))),
            Request::WriteSingleCoil { .. } => {
                let (address, value) = response_echo(pdu)?;
                Ok(Response::WriteSingleCoil {
                    address,
                    value: value == COIL_ON,
                })
            }
            Request::WriteSingleRegister { .. } => {
                let (address, value) = response_echo(pdu)?;
                Ok(Response::WriteSingleRegister { address, value })
            }
            Request::WriteMultipleCoils { .. } => {
                let (address, quantity) = response_echo(pdu)?;
                Ok(Response::WriteMultipleCoils { address, quantity })
            }
            Request::WriteMultipleRegisters { .. } => {
                let (address, quantity) = response_echo(pdu)?;
                Ok(Response::WriteMultipleRegisters { address, quantity })
            }
        }
    }
}

fn response_data(pdu: &[u8]) -> Result<&[u8], FrameError> {
    let count = usize::from(*pdu.get(1).ok_or(FrameError::MalformedResponse("missing byte count"))?);
    pdu.get(2..2 + count)
        .ok_or(FrameError::MalformedResponse("short data"))
}

/// Address and value/quantity echoed by write responses.
fn response_echo(pdu: &[u8]) -> Result<(u16, u16), FrameError> {
    if pdu.len() < 5 {
        return Err(FrameError::MalformedResponse("short echo"));
    }
    Ok((be_u16(pdu, 1), be_u16(pdu, 3)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mbap_header_validation() {
        let header = MbapHeader::decode(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0xFE]).unwrap();
        assert_eq!(header.transaction_id, 1);
        assert_eq!(header.unit_id, 0xFE);
        assert_eq!(header.pdu_len(), 5);

        assert!(matches!(
            MbapHeader::decode(&[0, 1, 0, 1, 0, 6, 1]),
            Err(FrameError::InvalidProtocolId(1))
        ));
        assert!(matches!(
            MbapHeader::decode(&[0, 1, 0, 0, 0, 1, 1]),
            Err(FrameError::InvalidLength(1))
        ));
        assert!(matches!(
            MbapHeader::decode(&[0, 1, 0, 0, 0, 255, 1]),
            Err(FrameError::InvalidLength(255))
        ));
    }

    #[test]
    fn test_bit_packing_lsb_first() {
        let bits = [true, false, true, true, false, false, false, false, true];
        assert_eq!(pack_bits(&bits), vec![0b0000_1101, 0b0000_0001]);
        assert_eq!(unpack_bits(&[0b0000_1101, 0b0000_0001], 9), bits.to_vec());
    }

    #[test]
    fn test_decode_read_quantity_limits() {
        assert_eq!(
            Request::decode(&[0x03, 0x00, 0x00, 0x00, 0x7D]),
            Ok(Request::ReadHoldingRegisters { address: 0, quantity: 125 })
        );
        assert_eq!(
            Request::decode(&[0x03, 0x00, 0x00, 0x00, 0x7E]),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            Request::decode(&[0x01, 0x00, 0x00, 0x00, 0x00]),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            Request::decode(&[0x02, 0x00, 0x00, 0x07, 0xD1]),
            Err(ExceptionCode::IllegalDataValue)
        );
    }

    #[test]
    fn test_decode_unknown_and_short() {
        assert_eq!(Request::decode(&[0x2B, 0x0E]), Err(ExceptionCode::IllegalFunction));
        assert_eq!(Request::decode(&[0x03, 0x00]), Err(ExceptionCode::IllegalDataValue));
    }

    #[test]
    fn test_decode_single_coil_values() {
        assert_eq!(
            Request::decode(&[0x05, 0x00, 0x02, 0xFF, 0x00]),
            Ok(Request::WriteSingleCoil { address: 2, value: true })
        );
        assert_eq!(
            Request::decode(&[0x05, 0x00, 0x02, 0x00, 0x01]),
            Err(ExceptionCode::IllegalDataValue)
        );
    }

    #[test]
    fn test_decode_multiple_writes_byte_count() {
        // 10 coils need 2 bytes
        assert_eq!(
            Request::decode(&[0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]),
            Ok(Request::WriteMultipleCoils {
                address: 0x13,
                values: vec![true, false, true, true, false, false, true, true, true, false],
            })
        );
        assert_eq!(
            Request::decode(&[0x0F, 0x00, 0x13, 0x00, 0x0A, 0x01, 0xCD]),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            Request::decode(&[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A]),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            Request::decode(&[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]),
            Ok(Request::WriteMultipleRegisters {
                address: 1,
                values: vec![0x000A, 0x0102],
            })
        );
    }

    #[test]
    fn test_response_encoding() {
        let pdu = Response::ReadCoils(vec![true, false, true]).encode().unwrap();
        assert_eq!(pdu.as_slice(), &[0x01, 0x01, 0b101]);

        let pdu = Response::ReadInputRegisters(vec![0x1234, 0x0001]).encode().unwrap();
        assert_eq!(pdu.as_slice(), &[0x04, 0x04, 0x12, 0x34, 0x00, 0x01]);

        let pdu = Response::Exception {
            function: 0x03,
            code: ExceptionCode::IllegalDataAddress,
        }
        .encode()
        .unwrap();
        assert_eq!(pdu.as_slice(), &[0x83, 0x02]);
    }

    #[test]
    fn test_encode_frame_header() {
        let adu = encode_frame(0x1234, 7, &[0x03, 0x00, 0x00, 0x00, 0x01]).unwrap();
        assert_eq!(
            adu.as_slice(),
            &[0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x07, 0x03, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn test_response_decode_matches_request() {
        let request = Request::ReadCoils { address: 0, quantity: 3 };
        assert_eq!(
            Response::decode(&[0x01, 0x01, 0b110], &request).unwrap(),
            Response::ReadCoils(vec![false, true, true])
        );
        assert_eq!(
            Response::decode(&[0x81, 0x02], &request).unwrap(),
            Response::Exception {
                function: 0x01,
                code: ExceptionCode::IllegalDataAddress
            }
        );
        assert!(Response::decode(&[0x03, 0x02, 0, 0], &request).is_err());
    }

    #[tokio::test]
    async fn test_read_frame_eof_and_truncation() {
        let mut empty: &[u8] = &[];
        assert!(read_frame(&mut empty).await.unwrap().is_none());

        let mut short: &[u8] = &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00];
        assert!(matches!(read_frame(&mut short).await, Err(FrameError::Truncated)));

        let mut whole: &[u8] = &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        let frame = read_frame(&mut whole).await.unwrap().unwrap();
        assert_eq!(frame.pdu.as_slice(), &[0x03, 0x00, 0x00, 0x00, 0x01]);
    }
}
