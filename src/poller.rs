//! # Poll Loop
//!
//! Background task that reads the RUN/STOP flag and, while the PLC runs, the
//! analog value, then sleeps for the poll interval. One cycle holds the
//! client lock for both reads so a concurrent coil write lands between cycles,
//! never between the two reads.
//!
//! Two tokens end the loop. A stop request is observed at the top of every
//! cycle, before the value read and during the sleep, so an exchange already
//! on the wire always completes and the socket stays in step with the PLC.
//! The abort token belongs to the connection: cancelling it drops the
//! in-flight request as well and is only used when the socket is about to be
//! closed anyway.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::SharedClient;
use crate::error::ModbusResult;
use crate::events::SharedSink;
use crate::protocol::PlcStatus;
use crate::transport::ModbusTransport;

/// Called once when the loop ends because the connection dropped.
pub type ConnectionLostHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
}

/// What a call to [`Poller::start`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTransition {
    Started,
    Stopped,
}

/// Latest readings observed by the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSnapshot {
    pub state: PollerState,
    pub plc_status: PlcStatus,
    pub last_value: Option<u16>,
    pub last_update: Option<DateTime<Utc>>,
    pub cycles: u64,
}

#[derive(Debug, Default)]
struct Readings {
    plc_status: PlcStatus,
    last_value: Option<u16>,
    last_update: Option<DateTime<Utc>>,
    cycles: u64,
}

struct RunningLoop {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// A stop request whose loop may still be finishing its current exchange
#[must_use = "the loop is only known to have exited once `wait` returns"]
#[derive(Debug)]
pub struct PendingStop {
    handle: Option<JoinHandle<()>>,
    was_running: bool,
}

impl PendingStop {
    /// Wait for the loop to exit. Returns `true` when a loop was running.
    pub async fn wait(self) -> bool {
        if let Some(handle) = self.handle {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!("Poll task panicked: {}", e);
                }
            }
        }
        self.was_running
    }
}

/// Owner of at most one poll task
pub struct Poller {
    interval: Duration,
    readings: Arc<Mutex<Readings>>,
    running: Option<RunningLoop>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("interval", &self.interval)
            .field("state", &self.state())
            .finish()
    }
}

impl Poller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            readings: Arc::new(Mutex::new(Readings::default())),
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.stop.is_cancelled() && !r.handle.is_finished())
    }

    pub fn state(&self) -> PollerState {
        if self.is_running() {
            PollerState::Running
        } else {
            PollerState::Idle
        }
    }

    pub fn snapshot(&self) -> PollSnapshot {
        let readings = self.readings.lock().unwrap_or_else(|e| e.into_inner());
        PollSnapshot {
            state: self.state(),
            plc_status: readings.plc_status,
            last_value: readings.last_value,
            last_update: readings.last_update,
            cycles: readings.cycles,
        }
    }

    /// Forget the readings of a previous connection.
    pub fn reset(&self) {
        let mut readings = self.readings.lock().unwrap_or_else(|e| e.into_inner());
        *readings = Readings::default();
    }

    /// Toggle polling.
    ///
    /// Starts a loop when idle. When a loop is already running it is stopped
    /// instead and [`PollTransition::Stopped`] is returned. Cancelling `abort`
    /// ends the loop mid-request.
    pub async fn start<T>(
        &mut self,
        client: SharedClient<T>,
        sink: SharedSink,
        abort: &CancellationToken,
        on_connection_lost: Option<ConnectionLostHook>,
    ) -> PollTransition
    where
        T: ModbusTransport + 'static,
    {
        if self.is_running() {
            self.stop().await;
            return PollTransition::Stopped;
        }
        // A loop that ended on its own still needs its handle reaped.
        self.stop().await;

        let stop = abort.child_token();
        let handle = tokio::spawn(poll_loop(
            client,
            sink,
            Arc::clone(&self.readings),
            self.interval,
            stop.clone(),
            abort.clone(),
            on_connection_lost,
        ));
        self.running = Some(RunningLoop { stop, handle });
        PollTransition::Started
    }

    /// Ask the loop to stop without waiting for it.
    ///
    /// The poller reports idle at once; the returned [`PendingStop`] resolves
    /// after the exchange in flight, if any, has completed.
    pub fn begin_stop(&mut self) -> PendingStop {
        let Some(running) = self.running.take() else {
            return PendingStop {
                handle: None,
                was_running: false,
            };
        };
        let was_running = !running.stop.is_cancelled() && !running.handle.is_finished();
        running.stop.cancel();
        PendingStop {
            handle: Some(running.handle),
            was_running,
        }
    }

    /// Stop the loop and wait for it to exit. Idempotent.
    ///
    /// Returns `true` when a loop was actually running.
    pub async fn stop(&mut self) -> bool {
        self.begin_stop().wait().await
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.stop.cancel();
        }
    }
}

async fn poll_loop<T>(
    client: SharedClient<T>,
    sink: SharedSink,
    readings: Arc<Mutex<Readings>>,
    interval: Duration,
    stop: CancellationToken,
    abort: CancellationToken,
    on_connection_lost: Option<ConnectionLostHook>,
) where
    T: ModbusTransport + 'static,
{
    info!("Polling started ({:?} interval)", interval);

    loop {
        if stop.is_cancelled() {
            break;
        }

        let cycle = tokio::select! {
            biased;
            _ = abort.cancelled() => break,
            result = poll_cycle(&client, &sink, &readings, &stop) => result,
        };

        if let Err(e) = cycle {
            sink.on_error(&e);
            if e.is_connection_lost() {
                warn!("Connection lost while polling: {}", e);
                tokio::select! {
                    biased;
                    _ = abort.cancelled() => {}
                    _ = async {
                        if let Err(e) = client.lock().await.close().await {
                            debug!("Close after connection loss failed: {}", e);
                        }
                    } => {}
                }
                if let Some(hook) = &on_connection_lost {
                    hook();
                }
                break;
            }
            debug!("Poll cycle failed: {}", e);
        }

        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Polling stopped");
}

async fn poll_cycle<T>(
    client: &SharedClient<T>,
    sink: &SharedSink,
    readings: &Mutex<Readings>,
    stop: &CancellationToken,
) -> ModbusResult<()>
where
    T: ModbusTransport + 'static,
{
    let mut client = client.lock().await;

    let status = client.read_status().await?;
    {
        let mut readings = readings.lock().unwrap_or_else(|e| e.into_inner());
        readings.cycles += 1;
        if let Some(status) = status {
            readings.plc_status = status;
            readings.last_update = Some(Utc::now());
        }
    }

    let Some(status) = status else {
        debug!("Status byte outside 0/1, skipping cycle");
        return Ok(());
    };
    sink.on_status_changed(status);

    if status.is_running() && !stop.is_cancelled() {
        let value = client.read_value().await?;
        {
            let mut readings = readings.lock().unwrap_or_else(|e| e.into_inner());
            readings.last_value = Some(value);
            readings.last_update = Some(Utc::now());
        }
        sink.on_value_changed(value);
    }
    Ok(())
}
