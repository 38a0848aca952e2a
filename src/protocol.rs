//! Modbus request/response types for the supported subset
//!
//! Responses are decoded by fixed offset, which is all a single trusted PLC
//! needs. Offsets past the end of what was received become
//! [`ModbusError::Protocol`] instead of panicking.

use std::fmt;

use bytes::Bytes;

use crate::constants::{
    COIL_OFF, COIL_ON, EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_STATUS,
    FC_WRITE_SINGLE_COIL, PROTOCOL_ID, REQUEST_PDU_LENGTH, RESPONSE_BUFFER_SIZE,
    RESPONSE_EXCEPTION_OFFSET, RESPONSE_FUNCTION_OFFSET, RESPONSE_REGISTER_OFFSET,
    RESPONSE_STATUS_OFFSET,
};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{FrameBuilder, RequestFrame, TransactionIdOrder};

/// Modbus unit identifier
pub type UnitId = u8;

/// Supported Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusFunction {
    /// 0x02
    ReadInputStatus,
    /// 0x03
    ReadHoldingRegisters,
    /// 0x05
    WriteSingleCoil,
}

impl ModbusFunction {
    pub fn to_u8(self) -> u8 {
        match self {
            ModbusFunction::ReadInputStatus => FC_READ_INPUT_STATUS,
            ModbusFunction::ReadHoldingRegisters => FC_READ_HOLDING_REGISTERS,
            ModbusFunction::WriteSingleCoil => FC_WRITE_SINGLE_COIL,
        }
    }

    pub fn from_u8(code: u8) -> ModbusResult<Self> {
        match code {
            FC_READ_INPUT_STATUS => Ok(ModbusFunction::ReadInputStatus),
            FC_READ_HOLDING_REGISTERS => Ok(ModbusFunction::ReadHoldingRegisters),
            FC_WRITE_SINGLE_COIL => Ok(ModbusFunction::WriteSingleCoil),
            _ => Err(ModbusError::invalid_function(code)),
        }
    }

    pub fn is_read(self) -> bool {
        !matches!(self, ModbusFunction::WriteSingleCoil)
    }
}

/// Immutable request value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModbusRequest {
    pub transaction_id: u16,
    pub unit_id: UnitId,
    pub function: ModbusFunction,
    pub address: u16,
    /// Quantity for reads, coil payload (`0xFF00`/`0x0000`) for FC05
    pub count_or_value: u16,
}

impl ModbusRequest {
    pub fn new_read(unit_id: UnitId, function: ModbusFunction, address: u16, count: u16) -> Self {
        Self {
            transaction_id: 0,
            unit_id,
            function,
            address,
            count_or_value: count,
        }
    }

    pub fn new_write_coil(unit_id: UnitId, address: u16, on: bool) -> Self {
        Self {
            transaction_id: 0,
            unit_id,
            function: ModbusFunction::WriteSingleCoil,
            address,
            count_or_value: if on { COIL_ON } else { COIL_OFF },
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: u16) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    #[inline]
    pub const fn protocol_id(&self) -> u16 {
        PROTOCOL_ID
    }

    #[inline]
    pub const fn length(&self) -> u16 {
        REQUEST_PDU_LENGTH
    }

    /// Serialise to the 12-byte wire frame.
    ///
    /// `write_id_order` only affects FC05 requests; read requests always carry
    /// the transaction id in network order.
    pub fn to_frame(&self, write_id_order: TransactionIdOrder) -> ModbusResult<RequestFrame> {
        let order = if self.function.is_read() {
            TransactionIdOrder::Network
        } else {
            write_id_order
        };
        FrameBuilder::new(self.function.to_u8())
            .transaction_id(self.transaction_id, order)
            .unit_id(self.unit_id)
            .address(self.address)
            .count_or_value(self.count_or_value)
            .build()
    }
}

/// PLC run state as reported by the status input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlcStatus {
    #[default]
    Unknown,
    Running,
    Stopped,
}

impl PlcStatus {
    /// `0` is STOP, `1` is RUN; anything else carries no information.
    pub fn from_status_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(PlcStatus::Stopped),
            1 => Some(PlcStatus::Running),
            _ => None,
        }
    }

    pub fn is_running(self) -> bool {
        self == PlcStatus::Running
    }
}

impl fmt::Display for PlcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlcStatus::Unknown => write!(f, "UNKNOWN"),
            PlcStatus::Running => write!(f, "RUN"),
            PlcStatus::Stopped => write!(f, "STOP"),
        }
    }
}

/// Raw response bytes as read off the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponse {
    raw: Bytes,
}

impl ModbusResponse {
    /// Wrap a received buffer. Anything beyond [`RESPONSE_BUFFER_SIZE`] is dropped.
    pub fn from_slice(data: &[u8]) -> Self {
        let len = data.len().min(RESPONSE_BUFFER_SIZE);
        Self {
            raw: Bytes::copy_from_slice(&data[..len]),
        }
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    fn byte_at(&self, offset: usize, what: &str) -> ModbusResult<u8> {
        self.raw.get(offset).copied().ok_or_else(|| {
            ModbusError::protocol(format!(
                "Response too short for {}: need {} bytes, got {}",
                what,
                offset + 1,
                self.raw.len()
            ))
        })
    }

    pub fn transaction_id(&self) -> Option<u16> {
        match (self.raw.first(), self.raw.get(1)) {
            (Some(&hi), Some(&lo)) => Some(u16::from_be_bytes([hi, lo])),
            _ => None,
        }
    }

    pub fn function_code(&self) -> Option<u8> {
        self.raw.get(RESPONSE_FUNCTION_OFFSET).copied()
    }

    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() {
            self.raw.get(RESPONSE_EXCEPTION_OFFSET).copied()
        } else {
            None
        }
    }

    /// Confirm this is the answer to `request`.
    ///
    /// The transaction id must echo the request's bytes and the function code
    /// must match, with or without the exception flag. Anything else is a
    /// stale or foreign frame and fails with [`ModbusError::Protocol`].
    pub fn check_reply_to(&self, request: &RequestFrame) -> ModbusResult<()> {
        let (Some(tid), Some(fc)) = (self.transaction_id(), self.function_code()) else {
            return Err(ModbusError::protocol(format!(
                "Response header truncated: {} bytes",
                self.raw.len()
            )));
        };
        if tid != request.transaction_id() {
            return Err(ModbusError::protocol(format!(
                "Transaction id mismatch: sent {}, received {}",
                request.transaction_id(),
                tid
            )));
        }
        if fc & !EXCEPTION_FLAG != request.function_code() {
            return Err(ModbusError::protocol(format!(
                "Function code mismatch: sent {:02X}, received {:02X}",
                request.function_code(),
                fc
            )));
        }
        Ok(())
    }

    /// Turn an exception PDU into [`ModbusError::Exception`].
    pub fn check_exception(&self) -> ModbusResult<()> {
        if let Some(fc) = self.function_code() {
            if fc & EXCEPTION_FLAG != 0 {
                return Err(ModbusError::Exception {
                    function: fc & !EXCEPTION_FLAG,
                    code: self.exception_code().unwrap_or(0),
                });
            }
        }
        Ok(())
    }

    /// Decode the status byte of an FC02 response.
    ///
    /// `Ok(None)` means the byte was neither 0 nor 1 and the caller should keep
    /// its previous status.
    pub fn status(&self) -> ModbusResult<Option<PlcStatus>> {
        self.check_exception()?;
        let byte = self.byte_at(RESPONSE_STATUS_OFFSET, "status byte")?;
        Ok(PlcStatus::from_status_byte(byte))
    }

    /// Decode the 16-bit big-endian register of an FC03 response.
    pub fn register_value(&self) -> ModbusResult<u16> {
        self.check_exception()?;
        let hi = self.byte_at(RESPONSE_REGISTER_OFFSET, "register value")?;
        let lo = self.byte_at(RESPONSE_REGISTER_OFFSET + 1, "register value")?;
        Ok(u16::from_be_bytes([hi, lo]))
    }
}
