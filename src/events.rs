//! Notifications emitted by the session core
//!
//! Events are raised on the core's own tasks (poller, watchdog, caller). A UI
//! that needs them on its own thread marshals them itself; [`ChannelSink`]
//! forwards them into a tokio channel for exactly that purpose.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::ModbusError;
use crate::protocol::PlcStatus;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Requested,
    WatchdogExpired,
    ConnectionLost,
}

/// Owned form of every notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlcEvent {
    Connected(SocketAddr),
    StatusChanged(PlcStatus),
    ValueChanged(u16),
    Error(ModbusError),
    WatchdogTick(Duration),
    WatchdogExpired,
    Disconnected(DisconnectReason),
}

/// Receiver of session notifications.
///
/// Every method has an empty default so sinks implement only what they render.
/// Methods are called from background tasks and must not block.
pub trait PlcEventSink: Send + Sync + 'static {
    /// A status read decoded to RUN or STOP
    fn on_status_changed(&self, _status: PlcStatus) {}

    /// A value read completed
    fn on_value_changed(&self, _value: u16) {}

    /// A poll cycle or background operation failed
    fn on_error(&self, _error: &ModbusError) {}

    fn on_watchdog_tick(&self, _remaining: Duration) {}

    fn on_watchdog_expired(&self) {}

    fn on_connected(&self, _address: SocketAddr) {}

    fn on_disconnected(&self, _reason: DisconnectReason) {}
}

/// Shared sink handle passed to background tasks
pub type SharedSink = Arc<dyn PlcEventSink>;

/// Forwards every notification as a [`PlcEvent`] into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PlcEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlcEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: PlcEvent) {
        // Receiver gone means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl PlcEventSink for ChannelSink {
    fn on_status_changed(&self, status: PlcStatus) {
        self.send(PlcEvent::StatusChanged(status));
    }

    fn on_value_changed(&self, value: u16) {
        self.send(PlcEvent::ValueChanged(value));
    }

    fn on_error(&self, error: &ModbusError) {
        self.send(PlcEvent::Error(error.clone()));
    }

    fn on_watchdog_tick(&self, remaining: Duration) {
        self.send(PlcEvent::WatchdogTick(remaining));
    }

    fn on_watchdog_expired(&self) {
        self.send(PlcEvent::WatchdogExpired);
    }

    fn on_connected(&self, address: SocketAddr) {
        self.send(PlcEvent::Connected(address));
    }

    fn on_disconnected(&self, reason: DisconnectReason) {
        self.send(PlcEvent::Disconnected(reason));
    }
}
