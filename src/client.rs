//! PLC client over any [`ModbusTransport`]
//!
//! [`PlcClient`] turns the three supported operations into frames, stamps
//! transaction ids and decodes the fixed-offset responses. The transport only
//! moves bytes, so the poller and session can be exercised against a scripted
//! transport in tests and against [`TcpTransport`](crate::transport::TcpTransport)
//! in production.
//!
//! ```rust,no_run
//! use voltage_plc::client::{ClientOptions, PlcClient};
//! use voltage_plc::transport::TcpTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> voltage_plc::ModbusResult<()> {
//! let transport =
//!     TcpTransport::connect("192.168.0.2:502".parse().unwrap(), Duration::from_secs(2)).await?;
//! let mut client = PlcClient::new(transport, ClientOptions::default());
//!
//! if let Some(status) = client.read_status().await? {
//!     println!("PLC is {}", status);
//! }
//! client.write_coil(0, true).await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::constants::{DEFAULT_STATUS_ADDRESS, DEFAULT_UNIT_ID, DEFAULT_VALUE_ADDRESS};
use crate::error::ModbusResult;
use crate::frame::TransactionIdOrder;
use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse, PlcStatus, UnitId};
use crate::transport::{DisconnectOutcome, ModbusTransport, TransportStats};

/// Client shared between the poll task and one-off writers.
///
/// The mutex is the single-writer guard for the socket: whoever holds it owns
/// the connection for one request/response exchange.
pub type SharedClient<T> = Arc<Mutex<PlcClient<T>>>;

/// Addressing used by [`PlcClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub unit_id: UnitId,
    /// Input read with FC02 for the RUN/STOP flag
    pub status_address: u16,
    /// Holding register read with FC03 for the analog value
    pub value_address: u16,
    /// Transaction id byte order used by FC05 requests
    pub write_id_order: TransactionIdOrder,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            unit_id: DEFAULT_UNIT_ID,
            status_address: DEFAULT_STATUS_ADDRESS,
            value_address: DEFAULT_VALUE_ADDRESS,
            write_id_order: TransactionIdOrder::Network,
        }
    }
}

/// Modbus client for a single PLC
#[derive(Debug)]
pub struct PlcClient<T: ModbusTransport> {
    transport: T,
    options: ClientOptions,
    transaction_id: u16,
}

impl<T: ModbusTransport> PlcClient<T> {
    pub fn new(transport: T, options: ClientOptions) -> Self {
        Self {
            transport,
            options,
            transaction_id: 0,
        }
    }

    /// Wrap into the shared, mutex-guarded form used by the poller
    pub fn into_shared(self) -> SharedClient<T> {
        Arc::new(Mutex::new(self))
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    /// Send a request and return its response.
    ///
    /// A reply whose transaction id or function code does not match the
    /// request is rejected with [`ModbusError::Protocol`](crate::ModbusError::Protocol).
    pub async fn execute(&mut self, request: ModbusRequest) -> ModbusResult<ModbusResponse> {
        let request = request.with_transaction_id(self.next_transaction_id());
        let frame = request.to_frame(self.options.write_id_order)?;
        let response = self.transport.send_receive(&frame).await?;
        if let Err(e) = response.check_reply_to(&frame) {
            warn!("Discarding reply to tid={}: {}", request.transaction_id, e);
            return Err(e);
        }
        debug!(
            "tid={} FC={:02X} -> {} bytes",
            request.transaction_id,
            request.function.to_u8(),
            response.len()
        );
        Ok(response)
    }

    /// Read the RUN/STOP flag (FC02, count 1).
    ///
    /// `Ok(None)` when the device reports a value other than 0 or 1.
    pub async fn read_status(&mut self) -> ModbusResult<Option<PlcStatus>> {
        let request = ModbusRequest::new_read(
            self.options.unit_id,
            ModbusFunction::ReadInputStatus,
            self.options.status_address,
            1,
        );
        self.execute(request).await?.status()
    }

    /// Read the analog value register (FC03, count 1)
    pub async fn read_value(&mut self) -> ModbusResult<u16> {
        let request = ModbusRequest::new_read(
            self.options.unit_id,
            ModbusFunction::ReadHoldingRegisters,
            self.options.value_address,
            1,
        );
        self.execute(request).await?.register_value()
    }

    /// Drive one coil ON or OFF (FC05)
    pub async fn write_coil(&mut self, address: u16, on: bool) -> ModbusResult<()> {
        let request = ModbusRequest::new_write_coil(self.options.unit_id, address, on);
        self.execute(request).await?.check_exception()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn close(&mut self) -> ModbusResult<DisconnectOutcome> {
        self.transport.close().await
    }

    pub fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{COIL_OFF, COIL_ON};
    use crate::error::ModbusError;
    use crate::mock::{register_response, status_response, write_coil_response, MockTransport};

    #[tokio::test]
    async fn test_read_status_request_and_decode() {
        let mock = MockTransport::new();
        mock.add_response(Ok(status_response(1)));
        mock.add_response(Ok(status_response(0)));
        mock.add_response(Ok(status_response(9)));

        let mut client = PlcClient::new(mock.clone(), ClientOptions::default());
        assert_eq!(client.read_status().await.unwrap(), Some(PlcStatus::Running));
        assert_eq!(client.read_status().await.unwrap(), Some(PlcStatus::Stopped));
        assert_eq!(client.read_status().await.unwrap(), None);

        let requests = mock.get_requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].function_code(), 0x02);
        assert_eq!(requests[0].address(), 0);
        assert_eq!(requests[0].count_or_value(), 1);
        assert_eq!(requests[0].unit_id(), 0);
    }

    #[tokio::test]
    async fn test_transaction_ids_increment() {
        let mock = MockTransport::new();
        mock.add_response(Ok(register_response(300)));
        mock.add_response(Ok(register_response(301)));

        let mut client = PlcClient::new(mock.clone(), ClientOptions::default());
        assert_eq!(client.read_value().await.unwrap(), 300);
        assert_eq!(client.read_value().await.unwrap(), 301);

        let ids: Vec<u16> = mock.get_requests().iter().map(|f| f.transaction_id()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_custom_addressing() {
        let mock = MockTransport::new();
        mock.add_response(Ok(register_response(7)));

        let options = ClientOptions {
            unit_id: 3,
            value_address: 0x0010,
            ..ClientOptions::default()
        };
        let mut client = PlcClient::new(mock.clone(), options);
        client.read_value().await.unwrap();

        let frame = mock.get_requests()[0];
        assert_eq!(frame.unit_id(), 3);
        assert_eq!(frame.function_code(), 0x03);
        assert_eq!(frame.address(), 0x0010);
    }

    #[tokio::test]
    async fn test_write_coil_payload() {
        let mock = MockTransport::new();
        mock.add_response(Ok(write_coil_response(0, true)));
        mock.add_response(Ok(write_coil_response(1, false)));

        let mut client = PlcClient::new(mock.clone(), ClientOptions::default());
        client.write_coil(0, true).await.unwrap();
        client.write_coil(1, false).await.unwrap();

        let requests = mock.get_requests();
        assert_eq!(requests[0].function_code(), 0x05);
        assert_eq!(requests[0].count_or_value(), COIL_ON);
        assert_eq!(requests[1].address(), 1);
        assert_eq!(requests[1].count_or_value(), COIL_OFF);
    }

    #[tokio::test]
    async fn test_errors_propagate() {
        let mock = MockTransport::new();
        mock.add_response(Err(ModbusError::connection_lost("reset")));
        mock.add_response(Ok(ModbusResponse::from_slice(&[0, 0, 0, 0, 0, 3, 0, 0x85, 0x04])));

        let mut client = PlcClient::new(mock, ClientOptions::default());
        assert!(client.read_value().await.unwrap_err().is_connection_lost());
        assert_eq!(
            client.write_coil(0, true).await.unwrap_err(),
            ModbusError::Exception {
                function: 0x05,
                code: 0x04
            }
        );
    }

    #[tokio::test]
    async fn test_reply_for_another_request_is_rejected() {
        let mock = MockTransport::new();
        // Late status reply still carrying the id of an earlier poll
        mock.add_raw_response(Ok(ModbusResponse::from_slice(&[
            0x00, 0x01, 0x00, 0x00, 0x00, 0x04, 0x00, 0x02, 0x01, 0x01,
        ])));
        mock.add_response(Ok(status_response(1)));

        let mut client = PlcClient::new(mock.clone(), ClientOptions::default());
        client.transaction_id = 1;
        assert!(matches!(
            client.write_coil(5, true).await,
            Err(ModbusError::Protocol { .. })
        ));
        // Right id, wrong function
        assert!(matches!(
            client.write_coil(5, true).await,
            Err(ModbusError::Protocol { .. })
        ));

        let ids: Vec<u16> = mock.get_requests().iter().map(|f| f.transaction_id()).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mock = MockTransport::new();
        let mut client = PlcClient::new(mock, ClientOptions::default());
        assert!(client.is_connected());
        assert_eq!(client.close().await.unwrap(), DisconnectOutcome::Closed);
        assert_eq!(
            client.close().await.unwrap(),
            DisconnectOutcome::AlreadyDisconnected
        );
        assert_eq!(
            client.read_status().await.unwrap_err(),
            ModbusError::NotConnected
        );
    }
}
