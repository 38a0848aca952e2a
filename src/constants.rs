//! Protocol constants and session defaults
//!
//! Only the Modbus TCP subset needed to supervise a single PLC is covered:
//! read input status (FC02), read holding registers (FC03) and write single coil (FC05).

use std::time::Duration;

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Request frame length: MBAP header (7) + function code (1) + address (2) + count/value (2)
pub const REQUEST_FRAME_LEN: usize = 12;

/// Value of the MBAP length field for every supported request:
/// Unit ID (1) + Function Code (1) + Address (2) + Count/Value (2)
pub const REQUEST_PDU_LENGTH: u16 = 6;

/// Modbus protocol identifier, always zero
pub const PROTOCOL_ID: u16 = 0;

/// Receive buffer size for a single response read
///
/// The largest response this client can provoke is far below this; the
/// buffer just has to hold one MBAP frame.
pub const RESPONSE_BUFFER_SIZE: usize = 256;

// ============================================================================
// Fixed Response Offsets
// ============================================================================

/// Offset of the function code in a response frame
pub const RESPONSE_FUNCTION_OFFSET: usize = 7;

/// Offset of the exception code in an exception response
pub const RESPONSE_EXCEPTION_OFFSET: usize = 8;

/// Offset of the status byte in an FC02 response (first data byte)
pub const RESPONSE_STATUS_OFFSET: usize = 9;

/// Offset of the register high byte in an FC03 response (low byte follows)
pub const RESPONSE_REGISTER_OFFSET: usize = 9;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Input Status / Discrete Inputs (FC02)
pub const FC_READ_INPUT_STATUS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Exception flag OR-ed into the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// FC05 payload for ON
pub const COIL_ON: u16 = 0xFF00;

/// FC05 payload for OFF
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Session Defaults
// ============================================================================

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Unit identifier the PLC answers to
pub const DEFAULT_UNIT_ID: u8 = 0x00;

/// Bound on the TCP handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Hard session length enforced by the watchdog
pub const DEFAULT_SESSION_LENGTH: Duration = Duration::from_secs(15);

/// Watchdog tick granularity
pub const DEFAULT_WATCHDOG_TICK: Duration = Duration::from_secs(1);

/// Pause between poll cycles
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Input polled for the RUN/STOP flag
pub const DEFAULT_STATUS_ADDRESS: u16 = 0x0000;

/// Holding register carrying the analog input value
pub const DEFAULT_VALUE_ADDRESS: u16 = 0x0000;

/// Coil wired to the green lamp
pub const DEFAULT_GREEN_LAMP_COIL: u16 = 0x0000;

/// Coil wired to the red lamp
pub const DEFAULT_RED_LAMP_COIL: u16 = 0x0001;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        // MBAP (7) + PDU (5)
        assert_eq!(REQUEST_FRAME_LEN, 7 + 5);
        // Length counts everything after the length field itself
        assert_eq!(REQUEST_PDU_LENGTH as usize, REQUEST_FRAME_LEN - 6);
        assert!(RESPONSE_REGISTER_OFFSET + 1 < RESPONSE_BUFFER_SIZE);
    }

    #[test]
    fn test_session_defaults() {
        assert!(DEFAULT_WATCHDOG_TICK <= DEFAULT_SESSION_LENGTH);
        assert_eq!(
            DEFAULT_SESSION_LENGTH.as_secs() / DEFAULT_WATCHDOG_TICK.as_secs(),
            15
        );
        assert_ne!(DEFAULT_GREEN_LAMP_COIL, DEFAULT_RED_LAMP_COIL);
    }
}
