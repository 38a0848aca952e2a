//! # Session Configuration
//!
//! Timing and addressing for a [`PlcSession`](crate::session::PlcSession).
//! Defaults match a small trainer PLC: 2 s connect bound, 15 s hard session,
//! 1 s watchdog tick, 100 ms poll cadence, unit 0, green lamp on coil 0 and
//! red lamp on coil 1.
//!
//! ```rust
//! use voltage_plc::SessionConfig;
//! use std::time::Duration;
//!
//! let config = SessionConfig::new()
//!     .with_session_length(Duration::from_secs(30))
//!     .with_poll_interval(Duration::from_millis(250));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.watchdog_ticks(), 30);
//! ```

use std::time::Duration;

use crate::client::ClientOptions;
use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_GREEN_LAMP_COIL, DEFAULT_POLL_INTERVAL,
    DEFAULT_RED_LAMP_COIL, DEFAULT_SESSION_LENGTH, DEFAULT_STATUS_ADDRESS, DEFAULT_UNIT_ID,
    DEFAULT_VALUE_ADDRESS, DEFAULT_WATCHDOG_TICK,
};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::TransactionIdOrder;
use crate::protocol::UnitId;

/// Session settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bound on the TCP handshake.
    pub connect_timeout: Duration,
    /// Hard session length; the watchdog disconnects when it runs out.
    pub session_length: Duration,
    /// Watchdog tick granularity.
    pub watchdog_tick: Duration,
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// Start the poller as soon as the connection is up.
    pub auto_start_polling: bool,
    pub unit_id: UnitId,
    pub status_address: u16,
    pub value_address: u16,
    pub green_lamp_coil: u16,
    pub red_lamp_coil: u16,
    /// Transaction id byte order for FC05 requests.
    pub write_id_order: TransactionIdOrder,
    /// Hex-dump every frame at INFO level.
    pub packet_logging: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session_length: DEFAULT_SESSION_LENGTH,
            watchdog_tick: DEFAULT_WATCHDOG_TICK,
            poll_interval: DEFAULT_POLL_INTERVAL,
            auto_start_polling: true,
            unit_id: DEFAULT_UNIT_ID,
            status_address: DEFAULT_STATUS_ADDRESS,
            value_address: DEFAULT_VALUE_ADDRESS,
            green_lamp_coil: DEFAULT_GREEN_LAMP_COIL,
            red_lamp_coil: DEFAULT_RED_LAMP_COIL,
            write_id_order: TransactionIdOrder::Network,
            packet_logging: false,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_session_length(mut self, length: Duration) -> Self {
        self.session_length = length;
        self
    }

    pub fn with_watchdog_tick(mut self, tick: Duration) -> Self {
        self.watchdog_tick = tick;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_auto_start_polling(mut self, enabled: bool) -> Self {
        self.auto_start_polling = enabled;
        self
    }

    pub fn with_unit_id(mut self, unit_id: UnitId) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_status_address(mut self, address: u16) -> Self {
        self.status_address = address;
        self
    }

    pub fn with_value_address(mut self, address: u16) -> Self {
        self.value_address = address;
        self
    }

    pub fn with_lamp_coils(mut self, green: u16, red: u16) -> Self {
        self.green_lamp_coil = green;
        self.red_lamp_coil = red;
        self
    }

    pub fn with_write_id_order(mut self, order: TransactionIdOrder) -> Self {
        self.write_id_order = order;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Number of watchdog ticks in one session, rounded up.
    pub fn watchdog_ticks(&self) -> u32 {
        let tick = self.watchdog_tick.as_nanos();
        if tick == 0 {
            return 0;
        }
        self.session_length.as_nanos().div_ceil(tick) as u32
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            unit_id: self.unit_id,
            status_address: self.status_address,
            value_address: self.value_address,
            write_id_order: self.write_id_order,
        }
    }

    /// Reject settings the session cannot run with.
    pub fn validate(&self) -> ModbusResult<()> {
        if self.connect_timeout.is_zero() {
            return Err(ModbusError::configuration("connect_timeout must be non-zero"));
        }
        if self.session_length.is_zero() {
            return Err(ModbusError::configuration("session_length must be non-zero"));
        }
        if self.watchdog_tick.is_zero() {
            return Err(ModbusError::configuration("watchdog_tick must be non-zero"));
        }
        if self.watchdog_tick > self.session_length {
            return Err(ModbusError::configuration(format!(
                "watchdog_tick {:?} exceeds session_length {:?}",
                self.watchdog_tick, self.session_length
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ModbusError::configuration("poll_interval must be non-zero"));
        }
        if self.green_lamp_coil == self.red_lamp_coil {
            return Err(ModbusError::configuration(
                "green and red lamps must use different coils",
            ));
        }
        Ok(())
    }
}
