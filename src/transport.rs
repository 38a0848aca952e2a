//! # Transport Layer
//!
//! A single TCP connection to the PLC. [`TcpTransport::connect`] races the
//! handshake against a timer; [`ModbusTransport::send_receive`] writes one
//! 12-byte request and performs one read into a fixed buffer.
//!
//! There is no per-request timeout and no internal locking: the caller keeps
//! socket use single-writer (see [`crate::client::SharedClient`]) and relies on
//! the session watchdog for liveness.
//!
//! ```rust,no_run
//! use voltage_plc::frame::encode_read_request;
//! use voltage_plc::transport::{ModbusTransport, TcpTransport};
//! use std::time::Duration;
//!
//! # async fn example() -> voltage_plc::ModbusResult<()> {
//! let mut transport =
//!     TcpTransport::connect("192.168.0.2:502".parse().unwrap(), Duration::from_secs(2)).await?;
//! let frame = encode_read_request(0, 0x02, 0, 1)?;
//! let response = transport.send_receive(&frame).await?;
//! println!("status: {:?}", response.status()?);
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::constants::RESPONSE_BUFFER_SIZE;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::RequestFrame;
use crate::protocol::ModbusResponse;

fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn log_packet(direction: &str, data: &[u8], peer: SocketAddr) {
    info!("[MODBUS-TCP] {} {} {}", direction, peer, format_hex_packet(data));
}

/// Result of a disconnect request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// An open connection was shut down and closed
    Closed,
    /// Nothing to close
    AlreadyDisconnected,
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Request/response channel to one Modbus device.
///
/// Implemented by [`TcpTransport`]; tests substitute scripted transports.
pub trait ModbusTransport: Send + Sync {
    /// Write `frame` and read one response.
    ///
    /// Fails with [`ModbusError::NotConnected`] after close and with
    /// [`ModbusError::Io`] on any socket fault.
    fn send_receive(
        &mut self,
        frame: &RequestFrame,
    ) -> impl Future<Output = ModbusResult<ModbusResponse>> + Send;

    fn is_connected(&self) -> bool;

    /// Orderly close. Idempotent.
    fn close(&mut self) -> impl Future<Output = ModbusResult<DisconnectOutcome>> + Send;

    fn get_stats(&self) -> TransportStats;
}

/// Race a connect future against `limit`.
///
/// Dropping the losing future releases whatever socket it was setting up.
pub(crate) async fn connect_within<S, F>(
    address: SocketAddr,
    limit: Duration,
    connecting: F,
) -> ModbusResult<S>
where
    F: Future<Output = io::Result<S>>,
{
    match tokio::time::timeout(limit, connecting).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ModbusError::connection(format!(
            "Failed to connect to {}: {}",
            address, e
        ))),
        Err(_) => Err(ModbusError::timeout(
            format!("connect to {}", address),
            limit.as_millis() as u64,
        )),
    }
}

/// Modbus TCP transport
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    pub address: SocketAddr,
    stats: TransportStats,
    packet_logging: bool,
}

impl TcpTransport {
    /// Open a connection, giving up after `timeout`.
    pub async fn connect(address: SocketAddr, timeout: Duration) -> ModbusResult<Self> {
        Self::connect_with_logging(address, timeout, false).await
    }

    /// Open a connection with hex packet logging switched on or off.
    pub async fn connect_with_logging(
        address: SocketAddr,
        timeout: Duration,
        packet_logging: bool,
    ) -> ModbusResult<Self> {
        debug!("Connecting to {} (timeout {:?})", address, timeout);
        let stream = connect_within(address, timeout, TcpStream::connect(address)).await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed on {}: {}", address, e);
        }
        info!("Connected to {}", address);

        Ok(Self {
            stream: Some(stream),
            address,
            stats: TransportStats::default(),
            packet_logging,
        })
    }

    /// Shut down both directions and close the socket.
    ///
    /// Calling this on a closed transport is a no-op reported as
    /// [`DisconnectOutcome::AlreadyDisconnected`].
    pub fn disconnect(&mut self) -> DisconnectOutcome {
        let Some(stream) = self.stream.take() else {
            info!("{} already disconnected", self.address);
            return DisconnectOutcome::AlreadyDisconnected;
        };

        match stream.into_std() {
            Ok(std_stream) => {
                // Peer may already be gone; the handle is closed on drop either way.
                if let Err(e) = std_stream.shutdown(Shutdown::Both) {
                    debug!("shutdown on {}: {}", self.address, e);
                }
            }
            Err(e) => debug!("Deregistering {} failed: {}", self.address, e),
        }
        info!("Disconnected from {}", self.address);
        DisconnectOutcome::Closed
    }
}

impl ModbusTransport for TcpTransport {
    async fn send_receive(&mut self, frame: &RequestFrame) -> ModbusResult<ModbusResponse> {
        let stream = self.stream.as_mut().ok_or(ModbusError::NotConnected)?;

        if self.packet_logging {
            log_packet("send", frame.as_bytes(), self.address);
        }
        if let Err(e) = stream.write_all(frame.as_bytes()).await {
            self.stats.errors += 1;
            warn!("Send to {} failed: {}", self.address, e);
            return Err(e.into());
        }
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame.len() as u64;

        let mut buf = [0u8; RESPONSE_BUFFER_SIZE];
        let n = match stream.read(&mut buf).await {
            Ok(0) => {
                self.stats.errors += 1;
                warn!("{} closed the connection", self.address);
                return Err(ModbusError::connection_lost(format!(
                    "Connection closed by {}",
                    self.address
                )));
            }
            Ok(n) => n,
            Err(e) => {
                self.stats.errors += 1;
                warn!("Receive from {} failed: {}", self.address, e);
                return Err(e.into());
            }
        };
        self.stats.responses_received += 1;
        self.stats.bytes_received += n as u64;

        if self.packet_logging {
            log_packet("receive", &buf[..n], self.address);
        }

        Ok(ModbusResponse::from_slice(&buf[..n]))
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> ModbusResult<DisconnectOutcome> {
        Ok(self.disconnect())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}
