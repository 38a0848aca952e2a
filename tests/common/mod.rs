//! In-process Modbus-TCP PLC for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use voltage_plc::PlcEvent;

#[derive(Debug, Default)]
struct PlcState {
    running: bool,
    value: u16,
    coil_writes: Vec<(u16, bool)>,
    requests: Vec<[u8; 12]>,
    open_connections: usize,
    /// Held back before the next FC02 reply, then cleared
    status_delay: Option<Duration>,
    /// Exception code returned for every FC05
    reject_writes: Option<u8>,
}

/// Answers FC02, FC03 and FC05 the way a small PLC does.
pub struct MockPlc {
    pub addr: SocketAddr,
    state: Arc<Mutex<PlcState>>,
    /// Cancelled to drop the connections accepted so far.
    kill: Arc<Mutex<CancellationToken>>,
    accept: JoinHandle<()>,
}

impl MockPlc {
    pub async fn start(running: bool, value: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(PlcState {
            running,
            value,
            ..PlcState::default()
        }));
        let kill = Arc::new(Mutex::new(CancellationToken::new()));
        let accept = tokio::spawn(accept_loop(listener, Arc::clone(&state), Arc::clone(&kill)));

        Self {
            addr,
            state,
            kill,
            accept,
        }
    }

    pub fn set_running(&self, running: bool) {
        self.state.lock().unwrap().running = running;
    }

    pub fn set_value(&self, value: u16) {
        self.state.lock().unwrap().value = value;
    }

    pub fn coil_writes(&self) -> Vec<(u16, bool)> {
        self.state.lock().unwrap().coil_writes.clone()
    }

    pub fn requests(&self) -> Vec<[u8; 12]> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Answer the next status read only after `delay`.
    pub fn delay_next_status(&self, delay: Duration) {
        self.state.lock().unwrap().status_delay = Some(delay);
    }

    /// Refuse every coil write with exception `code`.
    pub fn reject_writes(&self, code: u8) {
        self.state.lock().unwrap().reject_writes = Some(code);
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().unwrap().open_connections
    }

    /// Drop every open connection without answering. Later connections
    /// are served normally.
    pub fn kill_connections(&self) {
        let mut kill = self.kill.lock().unwrap();
        kill.cancel();
        *kill = CancellationToken::new();
    }

    pub async fn wait_until_closed(&self, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.open_connections() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for MockPlc {
    fn drop(&mut self) {
        self.accept.abort();
        self.kill.lock().unwrap().cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<Mutex<PlcState>>,
    kill: Arc<Mutex<CancellationToken>>,
) {
    loop {
        let Ok((socket, _)) = listener.accept().await else {
            return;
        };
        let token = kill.lock().unwrap().clone();
        tokio::spawn(serve(socket, Arc::clone(&state), token));
    }
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<PlcState>>, kill: CancellationToken) {
    state.lock().unwrap().open_connections += 1;
    let mut request = [0u8; 12];

    loop {
        let read = tokio::select! {
            _ = kill.cancelled() => break,
            read = socket.read_exact(&mut request) => read,
        };
        if read.is_err() {
            break;
        }
        let (response, delay) = answer(&request, &state);
        if !delay.is_zero() {
            tokio::select! {
                _ = kill.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if socket.write_all(&response).await.is_err() {
            break;
        }
    }

    state.lock().unwrap().open_connections -= 1;
}

fn answer(request: &[u8; 12], state: &Mutex<PlcState>) -> (Vec<u8>, Duration) {
    let mut state = state.lock().unwrap();
    state.requests.push(*request);

    let (tid_hi, tid_lo, unit, fc) = (request[0], request[1], request[6], request[7]);
    let address = u16::from_be_bytes([request[8], request[9]]);
    let exception = |code: u8| vec![tid_hi, tid_lo, 0, 0, 0, 3, unit, fc | 0x80, code];
    match fc {
        0x02 => {
            let delay = state.status_delay.take().unwrap_or_default();
            let reply = vec![tid_hi, tid_lo, 0, 0, 0, 4, unit, fc, 1, state.running as u8];
            (reply, delay)
        }
        0x03 => {
            let [hi, lo] = state.value.to_be_bytes();
            (vec![tid_hi, tid_lo, 0, 0, 0, 5, unit, fc, 2, hi, lo], Duration::ZERO)
        }
        0x05 => {
            if let Some(code) = state.reject_writes {
                return (exception(code), Duration::ZERO);
            }
            let on = u16::from_be_bytes([request[10], request[11]]) == 0xFF00;
            state.coil_writes.push((address, on));
            (request.to_vec(), Duration::ZERO)
        }
        _ => (exception(0x01), Duration::ZERO),
    }
}

/// Next event that is not a watchdog tick.
pub async fn next_event(rx: &mut UnboundedReceiver<PlcEvent>) -> PlcEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed");
        if !matches!(event, PlcEvent::WatchdogTick(_)) {
            return event;
        }
    }
}

/// Collect every event up to and including the first `Disconnected`.
pub async fn events_until_disconnect(rx: &mut UnboundedReceiver<PlcEvent>) -> Vec<PlcEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for disconnect")
            .expect("event channel closed");
        let done = matches!(event, PlcEvent::Disconnected(_));
        events.push(event);
        if done {
            return events;
        }
    }
}
