//! Scripted transport for unit tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ModbusError, ModbusResult};
use crate::frame::RequestFrame;
use crate::protocol::ModbusResponse;
use crate::transport::{DisconnectOutcome, ModbusTransport, TransportStats};

/// What to do once the scripted responses run out
#[derive(Debug, Clone)]
pub enum Fallback {
    Fail(ModbusError),
    /// Never answer, like a PLC that stopped responding mid-request
    Hang,
}

#[derive(Debug)]
struct Scripted {
    response: ModbusResult<ModbusResponse>,
    /// Overwrite the transaction id with the request's, as a real device does
    echo_id: bool,
}

#[derive(Debug)]
struct MockState {
    requests: Vec<RequestFrame>,
    responses: VecDeque<Scripted>,
    fallback: Fallback,
    latency: Duration,
    connected: bool,
    closes: usize,
}

/// Cloneable handle; all clones share the same script and request log.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_fallback(Fallback::Fail(ModbusError::protocol(
            "No response prepared in mock",
        )))
    }

    pub fn with_fallback(fallback: Fallback) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                requests: Vec::new(),
                responses: VecDeque::new(),
                fallback,
                latency: Duration::ZERO,
                connected: true,
                closes: 0,
            })),
        }
    }

    /// Queue a reply. Its transaction id is replaced by the request's.
    pub fn add_response(&self, response: ModbusResult<ModbusResponse>) {
        self.push(response, true);
    }

    /// Queue a reply that is delivered byte for byte.
    pub fn add_raw_response(&self, response: ModbusResult<ModbusResponse>) {
        self.push(response, false);
    }

    fn push(&self, response: ModbusResult<ModbusResponse>, echo_id: bool) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push_back(Scripted { response, echo_id });
    }

    /// Delay every scripted reply, like a PLC that is slow to answer.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    pub fn get_requests(&self) -> Vec<RequestFrame> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

impl ModbusTransport for MockTransport {
    async fn send_receive(&mut self, frame: &RequestFrame) -> ModbusResult<ModbusResponse> {
        let (next, latency) = {
            let mut state = self.state.lock().unwrap();
            if !state.connected {
                return Err(ModbusError::NotConnected);
            }
            state.requests.push(*frame);
            let next = match state.responses.pop_front() {
                Some(scripted) => Ok(scripted),
                None => Err(state.fallback.clone()),
            };
            (next, state.latency)
        };

        match next {
            Ok(scripted) => {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                let response = scripted.response?;
                if !scripted.echo_id {
                    return Ok(response);
                }
                let mut raw = response.as_bytes().to_vec();
                if raw.len() >= 2 {
                    raw[..2].copy_from_slice(&frame.as_bytes()[..2]);
                }
                Ok(ModbusResponse::from_slice(&raw))
            }
            Err(Fallback::Fail(e)) => Err(e),
            Err(Fallback::Hang) => std::future::pending().await,
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn close(&mut self) -> ModbusResult<DisconnectOutcome> {
        let mut state = self.state.lock().unwrap();
        state.closes += 1;
        if std::mem::replace(&mut state.connected, false) {
            Ok(DisconnectOutcome::Closed)
        } else {
            Ok(DisconnectOutcome::AlreadyDisconnected)
        }
    }

    fn get_stats(&self) -> TransportStats {
        let state = self.state.lock().unwrap();
        TransportStats {
            requests_sent: state.requests.len() as u64,
            ..TransportStats::default()
        }
    }
}

/// FC02 response carrying `byte` at the status offset
pub fn status_response(byte: u8) -> ModbusResponse {
    ModbusResponse::from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x02, 0x01, byte])
}

/// FC03 response carrying one register
pub fn register_response(value: u16) -> ModbusResponse {
    let [hi, lo] = value.to_be_bytes();
    ModbusResponse::from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x05, 0x00, 0x03, 0x02, hi, lo])
}

/// FC05 echo response
pub fn write_coil_response(address: u16, on: bool) -> ModbusResponse {
    let [ah, al] = address.to_be_bytes();
    let value: u8 = if on { 0xFF } else { 0x00 };
    ModbusResponse::from_slice(&[
        0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x00, 0x05, ah, al, value, 0x00,
    ])
}
