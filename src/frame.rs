//! Fixed-size Modbus TCP request frame
//!
//! Every request this client sends is exactly [`REQUEST_FRAME_LEN`] bytes, so frames
//! are built in a stack array and never touch the heap.
//!
//! ```text
//! 0..2  transaction id      6   unit id
//! 2..4  protocol id (0)     7   function code
//! 4..6  length (6)          8..10  start address
//!                           10..12 count / coil value
//! ```

use tracing::debug;

use crate::constants::{
    COIL_OFF, COIL_ON, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_STATUS, FC_WRITE_SINGLE_COIL,
    PROTOCOL_ID, REQUEST_FRAME_LEN, REQUEST_PDU_LENGTH,
};
use crate::error::{ModbusError, ModbusResult};

/// Byte order of the transaction id field.
///
/// Modbus TCP mandates network order. `Host` reproduces older write-coil
/// encoders that took the id's native bytes and wrote them back to front.
/// On little-endian hosts that is identical to network order; on big-endian
/// hosts the id goes out byte-swapped. PLCs that ignore the id accept either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionIdOrder {
    #[default]
    Network,
    Host,
}

/// Encoded 12-byte request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame {
    data: [u8; REQUEST_FRAME_LEN],
    len: usize,
}

impl RequestFrame {
    #[inline]
    fn empty() -> Self {
        Self {
            data: [0; REQUEST_FRAME_LEN],
            len: 0,
        }
    }

    #[inline]
    fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= REQUEST_FRAME_LEN {
            return Err(ModbusError::protocol("Request frame full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)
    }

    /// Push the native bytes of a u16 in reverse
    #[inline]
    fn push_u16_ne_reversed(&mut self, value: u16) -> ModbusResult<()> {
        let [a, b] = value.to_ne_bytes();
        self.push(b)?;
        self.push(a)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn u16_at(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }

    /// Transaction id, read big-endian
    pub fn transaction_id(&self) -> u16 {
        self.u16_at(0)
    }

    pub fn protocol_id(&self) -> u16 {
        self.u16_at(2)
    }

    pub fn length(&self) -> u16 {
        self.u16_at(4)
    }

    pub fn unit_id(&self) -> u8 {
        self.data[6]
    }

    pub fn function_code(&self) -> u8 {
        self.data[7]
    }

    pub fn address(&self) -> u16 {
        self.u16_at(8)
    }

    /// Quantity for reads, coil payload for FC05
    pub fn count_or_value(&self) -> u16 {
        self.u16_at(10)
    }

    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & 0x7F {
            FC_READ_INPUT_STATUS => "Read Input Status",
            FC_READ_HOLDING_REGISTERS => "Read Holding Registers",
            FC_WRITE_SINGLE_COIL => "Write Single Coil",
            _ => "Unsupported Function",
        }
    }
}

impl AsRef<[u8]> for RequestFrame {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Frame builder - fluent API
#[derive(Debug, Clone, Copy)]
pub struct FrameBuilder {
    transaction_id: u16,
    id_order: TransactionIdOrder,
    unit_id: u8,
    function: u8,
    address: u16,
    count_or_value: u16,
}

impl FrameBuilder {
    pub fn new(function: u8) -> Self {
        Self {
            transaction_id: 0,
            id_order: TransactionIdOrder::Network,
            unit_id: 0,
            function,
            address: 0,
            count_or_value: 0,
        }
    }

    pub fn transaction_id(mut self, id: u16, order: TransactionIdOrder) -> Self {
        self.transaction_id = id;
        self.id_order = order;
        self
    }

    pub fn unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn address(mut self, address: u16) -> Self {
        self.address = address;
        self
    }

    pub fn count_or_value(mut self, value: u16) -> Self {
        self.count_or_value = value;
        self
    }

    pub fn build(self) -> ModbusResult<RequestFrame> {
        let mut frame = RequestFrame::empty();
        match self.id_order {
            TransactionIdOrder::Network => frame.push_u16(self.transaction_id)?,
            TransactionIdOrder::Host => frame.push_u16_ne_reversed(self.transaction_id)?,
        }
        frame.push_u16(PROTOCOL_ID)?;
        frame.push_u16(REQUEST_PDU_LENGTH)?;
        frame.push(self.unit_id)?;
        frame.push(self.function)?;
        frame.push_u16(self.address)?;
        frame.push_u16(self.count_or_value)?;

        debug!(
            "Frame built: tid={} unit={} FC={:02X} ({}) addr={} value={:#06X}",
            self.transaction_id,
            self.unit_id,
            self.function,
            RequestFrame::function_code_description(self.function),
            self.address,
            self.count_or_value
        );

        Ok(frame)
    }
}

/// Encode a read request (FC02 or FC03).
///
/// All fields are written big-endian with transaction id 0.
pub fn encode_read_request(
    unit_id: u8,
    function: u8,
    start_address: u16,
    count: u16,
) -> ModbusResult<RequestFrame> {
    if !matches!(function, FC_READ_INPUT_STATUS | FC_READ_HOLDING_REGISTERS) {
        return Err(ModbusError::invalid_function(function));
    }
    FrameBuilder::new(function)
        .unit_id(unit_id)
        .address(start_address)
        .count_or_value(count)
        .build()
}

/// Encode a write single coil request (FC05) with transaction id 0.
pub fn encode_write_coil_request(
    unit_id: u8,
    start_address: u16,
    on: bool,
) -> ModbusResult<RequestFrame> {
    FrameBuilder::new(FC_WRITE_SINGLE_COIL)
        .unit_id(unit_id)
        .address(start_address)
        .count_or_value(if on { COIL_ON } else { COIL_OFF })
        .build()
}
