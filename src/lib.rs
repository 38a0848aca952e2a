//! # Voltage PLC - Single-PLC Modbus-TCP Session Core
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **Version:** 0.1.0
//! **License:** MIT
//!
//! Talks Modbus-TCP to one PLC: connects with a bounded handshake, polls a
//! RUN/STOP flag and an analog register on a fixed cadence, drives coils for
//! indicator lamps and force-disconnects when the session watchdog runs out.
//! Everything a front end needs arrives as [`PlcEvent`] notifications.
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Used for |
//! |------|----------|----------|
//! | 0x02 | Read Discrete Inputs | RUN/STOP flag |
//! | 0x03 | Read Holding Registers | analog value |
//! | 0x05 | Write Single Coil | lamps and outputs |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_plc::{ChannelSink, Lamp, PlcEvent, PlcSession, SessionConfig, ModbusResult};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let (sink, mut events) = ChannelSink::new();
//!     let session = PlcSession::new(SessionConfig::default(), Arc::new(sink))?;
//!
//!     // Connect, arm the 15 s watchdog and start polling
//!     session.connect("192.168.0.2", voltage_plc::DEFAULT_TCP_PORT).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         match event {
//!             PlcEvent::ValueChanged(value) if value > 500 => {
//!                 session.set_lamp(Lamp::Red).await?;
//!             }
//!             PlcEvent::Disconnected(_) => break,
//!             other => println!("{:?}", other),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Error types and result handling
pub mod error;

/// Frame layout, function codes and session defaults
pub mod constants;

/// Stack-allocated 12-byte request frames
pub mod frame;

/// Requests, responses and PLC status decoding
pub mod protocol;

/// TCP transport with bounded connect
pub mod transport;

/// PLC client over any transport
pub mod client;

// ============================================================================
// Session modules
// ============================================================================

/// Session configuration
pub mod config;

/// Notification sink and events
pub mod events;

/// Background poll loop
pub mod poller;

/// Session watchdog countdown
pub mod watchdog;

/// Session facade and state machine
pub mod session;

/// Console logging setup for binaries
pub mod logging;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_plc::tokio) ===
pub use tokio;

// === Session API ===
pub use config::SessionConfig;
pub use events::{ChannelSink, DisconnectReason, PlcEvent, PlcEventSink, SharedSink};
pub use poller::{PendingStop, PollSnapshot, PollTransition, PollerState};
pub use session::{Connector, Lamp, PlcSession, SessionState, TcpConnector};

// === Client and transport ===
pub use client::{ClientOptions, PlcClient, SharedClient};
pub use transport::{DisconnectOutcome, ModbusTransport, TcpTransport, TransportStats};

// === Error handling ===
pub use error::{IoFaultKind, ModbusError, ModbusResult};

// === Core types ===
pub use frame::{FrameBuilder, RequestFrame, TransactionIdOrder};
pub use protocol::{ModbusFunction, ModbusRequest, ModbusResponse, PlcStatus, UnitId};

pub use constants::DEFAULT_TCP_PORT;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Voltage PLC v{} - Modbus-TCP session core by Evan Liu",
        VERSION
    )
}
