//! # PLC Session
//!
//! [`PlcSession`] is the facade a UI or console drives. It owns one connection
//! at a time, the poll loop and the session watchdog, and guards all of them
//! behind a single async mutex:
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected <--toggle--> Polling
//!      ^                        |                  |                     |
//!      +------- error ----------+                  +--- disconnect ------+
//!      +------------- watchdog expiry / connection lost -----------------+
//! ```
//!
//! Teardown is idempotent: whichever of disconnect, watchdog expiry or a lost
//! connection gets there first stops the poller, cancels the watchdog, closes
//! the socket and emits exactly one `disconnected` notification.
//!
//! ```rust,no_run
//! use voltage_plc::{ChannelSink, Lamp, PlcSession, SessionConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> voltage_plc::ModbusResult<()> {
//! let (sink, mut events) = ChannelSink::new();
//! let session = PlcSession::new(SessionConfig::default(), Arc::new(sink))?;
//!
//! session.connect("192.168.0.2", 502).await?;
//! session.set_lamp(Lamp::Green).await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{PlcClient, SharedClient};
use crate::config::SessionConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::events::{DisconnectReason, SharedSink};
use crate::poller::{ConnectionLostHook, PollSnapshot, PollTransition, Poller};
use crate::protocol::PlcStatus;
use crate::transport::{DisconnectOutcome, ModbusTransport, TcpTransport, TransportStats};
use crate::watchdog::Watchdog;

/// Opens transports for a session.
pub trait Connector: Send + Sync + 'static {
    type Transport: ModbusTransport + 'static;

    fn connect(
        &self,
        address: SocketAddr,
        config: &SessionConfig,
    ) -> impl Future<Output = ModbusResult<Self::Transport>> + Send;
}

/// Plain Modbus-TCP connector
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(
        &self,
        address: SocketAddr,
        config: &SessionConfig,
    ) -> ModbusResult<TcpTransport> {
        TcpTransport::connect_with_logging(address, config.connect_timeout, config.packet_logging)
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Polling,
}

/// Indicator lamps wired to two coils
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lamp {
    Green,
    Red,
}

impl Lamp {
    /// Coil states as (green, red)
    fn coil_states(self) -> (bool, bool) {
        match self {
            Lamp::Green => (true, false),
            Lamp::Red => (false, true),
        }
    }
}

impl fmt::Display for Lamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lamp::Green => write!(f, "green"),
            Lamp::Red => write!(f, "red"),
        }
    }
}

struct Link<T: ModbusTransport> {
    client: SharedClient<T>,
    address: SocketAddr,
    /// Cancelled on teardown so pending writes and polls give up the socket.
    token: CancellationToken,
}

struct SessionCore<T: ModbusTransport> {
    connecting: Option<CancellationToken>,
    link: Option<Link<T>>,
    /// Bumped per connection; stale expiry and loss callbacks compare against it.
    generation: u64,
    poller: Poller,
    watchdog: Watchdog,
}

struct SessionInner<C: Connector> {
    config: SessionConfig,
    connector: C,
    sink: SharedSink,
    core: Mutex<SessionCore<C::Transport>>,
}

/// Single-PLC session. Cheap to clone; clones share the same connection.
pub struct PlcSession<C: Connector = TcpConnector> {
    inner: Arc<SessionInner<C>>,
}

impl<C: Connector> Clone for PlcSession<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for PlcSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlcSession")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl PlcSession<TcpConnector> {
    /// Session over plain TCP
    pub fn new(config: SessionConfig, sink: SharedSink) -> ModbusResult<Self> {
        Self::with_connector(config, TcpConnector, sink)
    }
}

impl<C: Connector> PlcSession<C> {
    pub fn with_connector(
        config: SessionConfig,
        connector: C,
        sink: SharedSink,
    ) -> ModbusResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                connector,
                sink,
                core: Mutex::new(SessionCore {
                    connecting: None,
                    link: None,
                    generation: 0,
                    poller: Poller::new(config.poll_interval),
                    watchdog: Watchdog::new(config.watchdog_tick),
                }),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Resolve `host` and connect to it on `port`.
    pub async fn connect(&self, host: &str, port: u16) -> ModbusResult<()> {
        let address = match host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, port),
            Err(_) => tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| ModbusError::configuration(format!("Cannot resolve {}: {}", host, e)))?
                .next()
                .ok_or_else(|| ModbusError::configuration(format!("No address for {}", host)))?,
        };
        self.connect_to(address).await
    }

    /// Connect, arm the watchdog and (unless disabled) start polling.
    ///
    /// An existing connection is torn down first. Fails with
    /// [`ModbusError::InvalidState`] while another connect is in progress.
    pub async fn connect_to(&self, address: SocketAddr) -> ModbusResult<()> {
        let abort = {
            let mut core = self.inner.core.lock().await;
            if core.connecting.is_some() {
                return Err(ModbusError::invalid_state("Connect already in progress"));
            }
            if core.link.is_some() {
                info!("Reconnecting to {}, closing current session", address);
                self.inner
                    .teardown(&mut core, DisconnectReason::Requested)
                    .await;
            }
            let abort = CancellationToken::new();
            core.connecting = Some(abort.clone());
            abort
        };

        let connected = tokio::select! {
            biased;
            _ = abort.cancelled() => Err(ModbusError::connection(format!(
                "Connect to {} cancelled",
                address
            ))),
            result = self.inner.connector.connect(address, &self.inner.config) => result,
        };

        let mut core = self.inner.core.lock().await;
        if abort.is_cancelled() {
            // disconnect() already cleared the connecting slot
            return Err(ModbusError::connection(format!(
                "Connect to {} cancelled",
                address
            )));
        }
        core.connecting = None;

        let transport =
            connected.inspect_err(|e| warn!("Connect to {} failed: {}", address, e))?;
        self.inner.install(&mut core, address, transport).await;
        Ok(())
    }

    /// Start polling when idle, stop it when running.
    ///
    /// Stopping waits for the exchange in flight, like [`Self::stop_polling`].
    pub async fn toggle_polling(&self) -> ModbusResult<PollTransition> {
        let pending = {
            let mut core = self.inner.core.lock().await;
            if core.link.is_none() {
                return Err(ModbusError::NotConnected);
            }
            if !core.poller.is_running() {
                self.inner.start_poller(&mut core).await;
                return Ok(PollTransition::Started);
            }
            core.poller.begin_stop()
        };
        pending.wait().await;
        Ok(PollTransition::Stopped)
    }

    /// Start polling. Returns `false` if it was already running.
    pub async fn start_polling(&self) -> ModbusResult<bool> {
        let mut core = self.inner.core.lock().await;
        if core.link.is_none() {
            return Err(ModbusError::NotConnected);
        }
        if core.poller.is_running() {
            return Ok(false);
        }
        self.inner.start_poller(&mut core).await;
        Ok(true)
    }

    /// Stop polling and wait for the loop to exit. Returns `false` if idle.
    ///
    /// A request already sent to the PLC is allowed to complete, so the
    /// connection stays usable for later writes. The session lock is not held
    /// while waiting; a disconnect or watchdog expiry in the meantime aborts
    /// the request.
    pub async fn stop_polling(&self) -> bool {
        let pending = self.inner.core.lock().await.poller.begin_stop();
        pending.wait().await
    }

    /// Drive one coil. Waits for any in-flight poll cycle to finish first.
    pub async fn write_coil(&self, address: u16, on: bool) -> ModbusResult<()> {
        let (client, token, generation) = {
            let core = self.inner.core.lock().await;
            let link = core.link.as_ref().ok_or(ModbusError::NotConnected)?;
            (Arc::clone(&link.client), link.token.clone(), core.generation)
        };

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ModbusError::NotConnected),
            result = async { client.lock().await.write_coil(address, on).await } => result,
        };

        match &result {
            Ok(()) => debug!("Coil {} set {}", address, if on { "ON" } else { "OFF" }),
            Err(e) if e.is_connection_lost() && !token.is_cancelled() => {
                warn!("Connection lost writing coil {}: {}", address, e);
                self.inner
                    .end_generation(generation, DisconnectReason::ConnectionLost)
                    .await;
            }
            Err(e) => warn!("Write coil {} failed: {}", address, e),
        }
        result
    }

    /// Light one lamp and switch off the other.
    ///
    /// Refused with [`ModbusError::PlcStopped`] while the last polled status is
    /// STOP. The second coil is not written if the first write fails.
    pub async fn set_lamp(&self, lamp: Lamp) -> ModbusResult<()> {
        if self.poll_snapshot().await.plc_status == PlcStatus::Stopped {
            warn!("PLC is stopped, {} lamp refused", lamp);
            return Err(ModbusError::PlcStopped);
        }
        let (green, red) = lamp.coil_states();
        self.write_coil(self.inner.config.green_lamp_coil, green).await?;
        self.write_coil(self.inner.config.red_lamp_coil, red).await?;
        info!("{} lamp on", lamp);
        Ok(())
    }

    /// Tear the session down. Idempotent.
    pub async fn disconnect(&self) -> DisconnectOutcome {
        let mut core = self.inner.core.lock().await;
        self.inner
            .teardown(&mut core, DisconnectReason::Requested)
            .await
    }

    pub async fn state(&self) -> SessionState {
        let core = self.inner.core.lock().await;
        if core.connecting.is_some() {
            SessionState::Connecting
        } else if core.link.is_none() {
            SessionState::Disconnected
        } else if core.poller.is_running() {
            SessionState::Polling
        } else {
            SessionState::Connected
        }
    }

    pub async fn poll_snapshot(&self) -> PollSnapshot {
        self.inner.core.lock().await.poller.snapshot()
    }

    pub async fn watchdog_remaining(&self) -> std::time::Duration {
        self.inner.core.lock().await.watchdog.remaining()
    }

    pub async fn peer_address(&self) -> Option<SocketAddr> {
        self.inner
            .core
            .lock()
            .await
            .link
            .as_ref()
            .map(|link| link.address)
    }

    /// Transport counters of the current connection
    pub async fn transport_stats(&self) -> Option<TransportStats> {
        let client = {
            let core = self.inner.core.lock().await;
            Arc::clone(&core.link.as_ref()?.client)
        };
        let stats = client.lock().await.get_stats();
        Some(stats)
    }
}

impl<C: Connector> SessionInner<C> {
    async fn install(
        self: &Arc<Self>,
        core: &mut SessionCore<C::Transport>,
        address: SocketAddr,
        transport: C::Transport,
    ) {
        core.generation = core.generation.wrapping_add(1);
        let generation = core.generation;

        let client = PlcClient::new(transport, self.config.client_options()).into_shared();
        core.link = Some(Link {
            client,
            address,
            token: CancellationToken::new(),
        });
        core.poller.reset();
        self.sink.on_connected(address);

        let tick_sink = Arc::clone(&self.sink);
        let weak = Arc::downgrade(self);
        core.watchdog.start(
            self.config.session_length,
            move |remaining| tick_sink.on_watchdog_tick(remaining),
            move || {
                if let Some(inner) = weak.upgrade() {
                    tokio::spawn(async move {
                        inner
                            .end_generation(generation, DisconnectReason::WatchdogExpired)
                            .await;
                    });
                }
            },
        );

        if self.config.auto_start_polling {
            self.start_poller(core).await;
        }
    }

    /// Start the poll loop on the current link. No-op without one.
    async fn start_poller(self: &Arc<Self>, core: &mut SessionCore<C::Transport>) {
        let Some(link) = core.link.as_ref() else {
            return;
        };
        let client = Arc::clone(&link.client);
        let abort = link.token.clone();
        let hook = self.connection_lost_hook(core.generation);
        core.poller
            .start(client, Arc::clone(&self.sink), &abort, Some(hook))
            .await;
    }

    /// Hook handed to the poller. Teardown runs on its own task because it
    /// waits for the poll task to exit.
    fn connection_lost_hook(self: &Arc<Self>, generation: u64) -> ConnectionLostHook {
        let weak = Arc::downgrade(self);
        Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                tokio::spawn(async move {
                    inner
                        .end_generation(generation, DisconnectReason::ConnectionLost)
                        .await;
                });
            }
        })
    }

    /// Tear down connection `generation` unless it is already gone.
    async fn end_generation(&self, generation: u64, reason: DisconnectReason) {
        let mut core = self.core.lock().await;
        if core.generation != generation || core.link.is_none() {
            debug!("Ignoring {:?} for a finished connection", reason);
            return;
        }
        if reason == DisconnectReason::WatchdogExpired {
            warn!("Session length reached, disconnecting");
            self.sink.on_watchdog_expired();
        }
        self.teardown(&mut core, reason).await;
    }

    async fn teardown(
        &self,
        core: &mut SessionCore<C::Transport>,
        reason: DisconnectReason,
    ) -> DisconnectOutcome {
        if let Some(abort) = core.connecting.take() {
            abort.cancel();
        }
        let Some(link) = core.link.take() else {
            core.watchdog.stop();
            debug!("Disconnect requested while not connected");
            return DisconnectOutcome::AlreadyDisconnected;
        };

        // Aborts the in-flight poll too; the socket is closed right after.
        link.token.cancel();
        core.poller.stop().await;
        core.watchdog.stop();
        if let Err(e) = link.client.lock().await.close().await {
            debug!("Close of {} failed: {}", link.address, e);
        }
        core.poller.reset();

        info!("Session with {} ended ({:?})", link.address, reason);
        self.sink.on_disconnected(reason);
        DisconnectOutcome::Closed
    }
}
