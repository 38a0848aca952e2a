//! Error types for the PLC session core
//!
//! Every failure surfaced by the crate is a [`ModbusError`]. Connect-time failures
//! are split into [`ModbusError::Timeout`] and [`ModbusError::Connection`]; faults on an
//! established socket are [`ModbusError::Io`] and carry an [`IoFaultKind`] so callers
//! can tell a transient hiccup from a dead connection without inspecting message text.

use std::io;

use thiserror::Error;

/// Result alias used across the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Classification of an I/O fault on an established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFaultKind {
    /// The socket is still usable; the next poll cycle may succeed.
    Transient,
    /// The peer aborted, reset or closed the connection.
    ConnectionLost,
}

impl IoFaultKind {
    /// Classify a std I/O error kind.
    pub fn from_io_kind(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof => IoFaultKind::ConnectionLost,
            _ => IoFaultKind::Transient,
        }
    }
}

/// Errors raised by the frame codec, transport, poller and session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModbusError {
    /// Connect attempt exceeded its time bound
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Socket-level failure while connecting
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Send/receive failure on an established connection
    #[error("I/O error: {message}")]
    Io { kind: IoFaultKind, message: String },

    /// Response too short or otherwise undecodable
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Device answered with a Modbus exception PDU
    #[error("Modbus exception: function={function:#04x}, code={code:#04x}")]
    Exception { function: u8, code: u8 },

    /// Function code outside the supported subset
    #[error("Invalid function code: {code:#04x}")]
    InvalidFunction { code: u8 },

    /// Operation requires an open connection
    #[error("Not connected")]
    NotConnected,

    /// Output writes are refused while the PLC reports STOP
    #[error("PLC is stopped, outputs cannot be driven")]
    PlcStopped,

    /// Operation is not valid in the current session state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Invalid argument
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        ModbusError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        ModbusError::Connection {
            message: message.into(),
        }
    }

    pub fn io(kind: IoFaultKind, message: impl Into<String>) -> Self {
        ModbusError::Io {
            kind,
            message: message.into(),
        }
    }

    /// Peer closed or reset the connection
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::io(IoFaultKind::ConnectionLost, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        ModbusError::Protocol {
            message: message.into(),
        }
    }

    pub fn invalid_function(code: u8) -> Self {
        ModbusError::InvalidFunction { code }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        ModbusError::InvalidState {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        ModbusError::InvalidData {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ModbusError::Configuration {
            message: message.into(),
        }
    }

    /// True when the error means the socket is gone and the session must be torn down.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            ModbusError::Io {
                kind: IoFaultKind::ConnectionLost,
                ..
            } | ModbusError::NotConnected
        )
    }

    /// True for errors produced by a connect attempt.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            ModbusError::Timeout { .. } | ModbusError::Connection { .. }
        )
    }
}

impl From<io::Error> for ModbusError {
    fn from(err: io::Error) -> Self {
        ModbusError::Io {
            kind: IoFaultKind::from_io_kind(err.kind()),
            message: err.to_string(),
        }
    }
}
