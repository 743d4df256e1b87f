//! Modbus master API
//!
//! Modbus TCP and RTU share the same application layer (PDU), differing only
//! in how a transport frames it:
//! - **TCP**: MBAP Header + PDU
//! - **RTU**: Slave ID + PDU + CRC
//!
//! [`GenericModbusClient`] implements the request/response logic once over
//! any [`ModbusTransport`].
//!
//! # API Naming Convention
//!
//! Every function code has a descriptive method taking an explicit timeout
//! and a short alias using the client's default timeout:
//!
//! | Function Code | With timeout | Default timeout |
//! |---------------|--------------|-----------------|
//! | 0x01 | `read_coils()` | `read_01()` |
//! | 0x02 | `read_discrete_inputs()` | `read_02()` |
//! | 0x03 | `read_holding_registers()` | `read_03()` |
//! | 0x04 | `read_input_registers()` | `read_04()` |
//! | 0x05 | `write_single_coil()` | `write_05()` |
//! | 0x06 | `write_single_register()` | `write_06()` |
//! | 0x0F | `write_multiple_coils()` | `write_0f()` |
//! | 0x10 | `write_multiple_registers()` | `write_10()` |
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use modbus_stack::{ModbusClient, ModbusResult, ModbusTcpClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let mut client = ModbusTcpClient::from_address("127.0.0.1:502", Duration::from_secs(1)).await?;
//!
//!     let registers = client.read_holding_registers(1, 0, 10, Duration::from_millis(500)).await?;
//!     println!("Registers: {:?}", registers);
//!
//!     client.write_06(1, 100, 0x1234).await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::{MasterConfig, RetryPolicy};
use crate::constants::DEFAULT_TIMEOUT_MS;
use crate::error::{ModbusError, ModbusResult};
use crate::logging::CallbackLogger;
use crate::protocol::{ModbusRequest, ModbusResponse, SlaveId};
use crate::transport::{ModbusTransport, RtuTransport, TcpTransport, TransportStats};

fn unexpected(response: ModbusResponse) -> ModbusError {
    ModbusError::protocol(format!("unexpected response {:?}", response.function()))
}

/// Modbus master operations.
///
/// Implementors provide [`execute`](ModbusClient::execute); every typed
/// operation is built on it.
///
/// # Protocol Limits
///
/// | Operation | Limit |
/// |-----------|-------|
/// | Read Coils (0x01) | 2000 coils |
/// | Read Discrete Inputs (0x02) | 2000 bits |
/// | Read Holding Registers (0x03) | 125 registers |
/// | Read Input Registers (0x04) | 125 registers |
/// | Write Multiple Coils (0x0F) | 1968 coils |
/// | Write Multiple Registers (0x10) | 123 registers |
///
/// Requests outside these limits fail with `InvalidData` before anything is sent.
pub trait ModbusClient: Send + Sync {
    /// Run one transaction: send, wait for the matching reply or the deadline
    fn execute(
        &mut self,
        slave_id: SlaveId,
        request: ModbusRequest,
        timeout: Duration,
    ) -> impl Future<Output = ModbusResult<ModbusResponse>> + Send;

    /// Timeout used by the `read_01` .. `write_10` shorthands
    fn default_timeout(&self) -> Duration;

    fn is_connected(&self) -> bool;

    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    fn get_stats(&self) -> TransportStats;

    /// Read coils (0x01)
    fn read_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
        timeout: Duration,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send {
        async move {
            match self
                .execute(slave_id, ModbusRequest::ReadCoils { address, quantity }, timeout)
                .await?
            {
                ModbusResponse::ReadCoils(bits) => Ok(bits),
                other => Err(unexpected(other)),
            }
        }
    }

    /// Read discrete inputs (0x02)
    fn read_discrete_inputs(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
        timeout: Duration,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send {
        async move {
            match self
                .execute(
                    slave_id,
                    ModbusRequest::ReadDiscreteInputs { address, quantity },
                    timeout,
                )
                .await?
            {
                ModbusResponse::ReadDiscreteInputs(bits) => Ok(bits),
                other => Err(unexpected(other)),
            }
        }
    }

    /// Read holding registers (0x03)
    fn read_holding_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
        timeout: Duration,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        async move {
            match self
                .execute(
                    slave_id,
                    ModbusRequest::ReadHoldingRegisters { address, quantity },
                    timeout,
                )
                .await?
            {
                ModbusResponse::ReadHoldingRegisters(values) => Ok(values),
                other => Err(unexpected(other)),
            }
        }
    }

    /// Read input registers (0x04)
    fn read_input_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
        timeout: Duration,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        async move {
            match self
                .execute(
                    slave_id,
                    ModbusRequest::ReadInputRegisters { address, quantity },
                    timeout,
                )
                .await?
            {
                ModbusResponse::ReadInputRegisters(values) => Ok(values),
                other => Err(unexpected(other)),
            }
        }
    }

    /// Write a single coil (0x05); returns the echoed value
    fn write_single_coil(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
        timeout: Duration,
    ) -> impl Future<Output = ModbusResult<bool>> + Send {
        async move {
            match self
                .execute(slave_id, ModbusRequest::WriteSingleCoil { address, value }, timeout)
                .await?
            {
                ModbusResponse::WriteSingleCoil { value, .. } => Ok(value),
                other => Err(unexpected(other)),
            }
        }
    }

    /// Write a single register (0x06); returns the echoed value
    fn write_single_register(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
        timeout: Duration,
    ) -> impl Future<Output = ModbusResult<u16>> + Send {
        async move {
            match self
                .execute(
                    slave_id,
                    ModbusRequest::WriteSingleRegister { address, value },
                    timeout,
                )
                .await?
            {
                ModbusResponse::WriteSingleRegister { value, .. } => Ok(value),
                other => Err(unexpected(other)),
            }
        }
    }

    /// Write multiple coils (0x0F); returns the number of coils written
    fn write_multiple_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
        timeout: Duration,
    ) -> impl Future<Output = ModbusResult<u16>> + Send {
        let request = ModbusRequest::WriteMultipleCoils {
            address,
            values: values.to_vec(),
        };
        async move {
            match self.execute(slave_id, request, timeout).await? {
                ModbusResponse::WriteMultipleCoils { quantity, .. } => Ok(quantity),
                other => Err(unexpected(other)),
            }
        }
    }

    /// Write multiple registers (0x10); returns the number of registers written
    fn write_multiple_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
        timeout: Duration,
    ) -> impl Future<Output = ModbusResult<u16>> + Send {
        let request = ModbusRequest::WriteMultipleRegisters {
            address,
            values: values.to_vec(),
        };
        async move {
            match self.execute(slave_id, request, timeout).await? {
                ModbusResponse::WriteMultipleRegisters { quantity, .. } => Ok(quantity),
                other => Err(unexpected(other)),
            }
        }
    }

    fn read_01(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send {
        let timeout = self.default_timeout();
        self.read_coils(slave_id, address, quantity, timeout)
    }

    fn read_02(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<bool>>> + Send {
        let timeout = self.default_timeout();
        self.read_discrete_inputs(slave_id, address, quantity, timeout)
    }

    fn read_03(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        let timeout = self.default_timeout();
        self.read_holding_registers(slave_id, address, quantity, timeout)
    }

    fn read_04(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = ModbusResult<Vec<u16>>> + Send {
        let timeout = self.default_timeout();
        self.read_input_registers(slave_id, address, quantity, timeout)
    }

    fn write_05(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> impl Future<Output = ModbusResult<bool>> + Send {
        let timeout = self.default_timeout();
        self.write_single_coil(slave_id, address, value, timeout)
    }

    fn write_06(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> impl Future<Output = ModbusResult<u16>> + Send {
        let timeout = self.default_timeout();
        self.write_single_register(slave_id, address, value, timeout)
    }

    fn write_0f(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> impl Future<Output = ModbusResult<u16>> + Send {
        let timeout = self.default_timeout();
        self.write_multiple_coils(slave_id, address, values, timeout)
    }

    fn write_10(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = ModbusResult<u16>> + Send {
        let timeout = self.default_timeout();
        self.write_multiple_registers(slave_id, address, values, timeout)
    }
}

/// Modbus master over any transport
pub struct GenericModbusClient<T: ModbusTransport> {
    transport: T,
    logger: Option<CallbackLogger>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl<T: ModbusTransport> GenericModbusClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            logger: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_logger(transport: T, logger: CallbackLogger) -> Self {
        let mut client = Self::new(transport);
        client.logger = Some(logger);
        client
    }

    /// Apply timeout and retry settings from a [`MasterConfig`]
    pub fn with_config(transport: T, config: &MasterConfig) -> Self {
        let mut client = Self::new(transport);
        client.timeout = config.timeout();
        client.retry = config.retry;
        client
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub fn set_logger(&mut self, logger: CallbackLogger) {
        self.logger = Some(logger);
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// One attempt, no retry
    pub async fn execute_request(
        &mut self,
        slave_id: SlaveId,
        request: &ModbusRequest,
        timeout: Duration,
    ) -> ModbusResult<ModbusResponse> {
        let function_code = request.function().to_u8();
        if let Some(ref logger) = self.logger {
            logger.log_request(slave_id, function_code, request.address(), request.quantity());
        }

        let result = self.transport.request(slave_id, request, timeout).await;

        if let Some(ref logger) = self.logger {
            match &result {
                Ok(response) => logger.log_response(slave_id, function_code, &format!("{:?}", response)),
                Err(e) => logger.log_response(slave_id, function_code, &format!("error: {}", e)),
            }
        }
        result
    }

    /// Run `request`, retrying timeouts up to `policy.max_retries` times.
    ///
    /// Exceptions, framing and transport errors are returned immediately.
    pub async fn execute_with_retry(
        &mut self,
        slave_id: SlaveId,
        request: &ModbusRequest,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> ModbusResult<ModbusResponse> {
        let mut attempt = 0;
        loop {
            match self.execute_request(slave_id, request, timeout).await {
                Err(e) if e.is_recoverable() && attempt < policy.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} to slave {} timed out, retry {}/{}",
                        request.function().name(),
                        slave_id,
                        attempt,
                        policy.max_retries
                    );
                    tokio::time::sleep(policy.delay()).await;
                }
                result => return result,
            }
        }
    }
}

impl<T: ModbusTransport> ModbusClient for GenericModbusClient<T> {
    async fn execute(
        &mut self,
        slave_id: SlaveId,
        request: ModbusRequest,
        timeout: Duration,
    ) -> ModbusResult<ModbusResponse> {
        let policy = self.retry;
        self.execute_with_retry(slave_id, &request, timeout, policy).await
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.transport.close().await
    }

    fn get_stats(&self) -> TransportStats {
        self.transport.get_stats()
    }
}

/// Modbus TCP master
pub type ModbusTcpClient<S = TcpStream> = GenericModbusClient<TcpTransport<S>>;

/// Modbus RTU master
pub type ModbusRtuClient<S> = GenericModbusClient<RtuTransport<S>>;

impl GenericModbusClient<TcpTransport<TcpStream>> {
    /// Connect to `addr`; `timeout` bounds the connect and becomes the default request timeout
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> ModbusResult<Self> {
        debug!("Connecting Modbus TCP master to {}", addr);
        let transport = TcpTransport::connect(addr, timeout).await?;
        let mut client = Self::new(transport);
        client.timeout = timeout;
        Ok(client)
    }

    pub async fn from_address(addr: &str, timeout: Duration) -> ModbusResult<Self> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| ModbusError::configuration(format!("Invalid address: {}", e)))?;
        Self::connect(addr, timeout).await
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.transport.set_packet_logging(enabled);
    }
}

#[cfg(feature = "rtu")]
impl GenericModbusClient<RtuTransport<tokio_serial::SerialStream>> {
    /// Open a serial port at 8N1
    pub fn open(port: &str, baud_rate: u32, timeout: Duration) -> ModbusResult<Self> {
        let transport = RtuTransport::open(port, baud_rate)?;
        let mut client = Self::new(transport);
        client.timeout = timeout;
        Ok(client)
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.transport.set_packet_logging(enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ExceptionCode;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Scripted transport: pops one canned result per request
    struct MockTransport {
        responses: Arc<Mutex<VecDeque<ModbusResult<ModbusResponse>>>>,
        requests: Arc<Mutex<Vec<(SlaveId, ModbusRequest)>>>,
    }

    impl MockTransport {
        fn new(responses: Vec<ModbusResult<ModbusResponse>>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(responses.into())),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ModbusTransport for MockTransport {
        async fn request(
            &mut self,
            slave_id: SlaveId,
            request: &ModbusRequest,
            timeout: Duration,
        ) -> ModbusResult<ModbusResponse> {
            request.validate()?;
            self.requests.lock().push((slave_id, request.clone()));
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ModbusError::timeout("mock", timeout.as_millis() as u64)))
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn close(&mut self) -> ModbusResult<()> {
            Ok(())
        }

        fn get_stats(&self) -> TransportStats {
            TransportStats::default()
        }
    }

    #[tokio::test]
    async fn test_read_coils_typed() {
        let transport = MockTransport::new(vec![Ok(ModbusResponse::ReadCoils(vec![true, false, true]))]);
        let mut client = GenericModbusClient::new(transport);

        let bits = client.read_01(1, 0, 3).await.unwrap();
        assert_eq!(bits, vec![true, false, true]);
    }

    #[tokio::test]
    async fn test_write_multiple_coils_returns_count() {
        let transport = MockTransport::new(vec![Ok(ModbusResponse::WriteMultipleCoils {
            address: 10,
            quantity: 3,
        })]);
        let requests = transport.requests.clone();
        let mut client = GenericModbusClient::new(transport);

        let count = client
            .write_multiple_coils(2, 10, &[true, false, true], Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            requests.lock()[0],
            (
                2,
                ModbusRequest::WriteMultipleCoils {
                    address: 10,
                    values: vec![true, false, true]
                }
            )
        );
    }

    #[tokio::test]
    async fn test_mismatched_response_variant_is_protocol_error() {
        let transport = MockTransport::new(vec![Ok(ModbusResponse::ReadInputRegisters(vec![1]))]);
        let mut client = GenericModbusClient::new(transport);

        let err = client.read_03(1, 0, 1).await.unwrap_err();
        assert!(matches!(err, ModbusError::Protocol { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_only_on_timeout() {
        let transport = MockTransport::new(vec![
            Err(ModbusError::timeout("Read Holding Registers", 100)),
            Ok(ModbusResponse::ReadHoldingRegisters(vec![42])),
        ]);
        let requests = transport.requests.clone();
        let mut client = GenericModbusClient::new(transport);
        client.set_retry_policy(RetryPolicy::new(2, Duration::from_millis(10)));

        let values = client.read_03(1, 0, 1).await.unwrap();
        assert_eq!(values, vec![42]);
        assert_eq!(requests.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exception_not_retried() {
        let transport = MockTransport::new(vec![
            Err(ModbusError::exception(0x03, ExceptionCode::IllegalDataAddress)),
            Ok(ModbusResponse::ReadHoldingRegisters(vec![42])),
        ]);
        let requests = transport.requests.clone();
        let mut client = GenericModbusClient::new(transport);
        client.set_retry_policy(RetryPolicy::new(3, Duration::from_millis(10)));

        let err = client.read_03(1, 0, 1).await.unwrap_err();
        assert_eq!(err.exception_code(), ExceptionCode::IllegalDataAddress);
        assert_eq!(requests.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let transport = MockTransport::new(vec![]);
        let requests = transport.requests.clone();
        let mut client = GenericModbusClient::new(transport);
        client.set_retry_policy(RetryPolicy::new(2, Duration::from_millis(10)));

        let err = client.read_04(1, 0, 1).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(requests.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_logger_sees_request_and_response() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let logger = CallbackLogger::new(
            move |_, message: &str| sink.lock().push(message.to_string()),
            crate::logging::LogLevel::Debug,
        );
        let transport =
            MockTransport::new(vec![Ok(ModbusResponse::WriteSingleRegister { address: 1, value: 5 })]);
        let mut client = GenericModbusClient::with_logger(transport, logger);

        assert_eq!(client.write_06(1, 1, 5).await.unwrap(), 5);
        let lines = lines.lock();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("request slave:1 fc:0x06"));
        assert!(lines[1].starts_with("response slave:1 fc:0x06"));
    }

    #[test]
    fn test_config_applies_timeout() {
        let config: MasterConfig = serde_json::from_str(r#"{"timeout_ms": 250}"#).unwrap();
        let client = GenericModbusClient::with_config(MockTransport::new(vec![]), &config);
        assert_eq!(client.default_timeout(), Duration::from_millis(250));
    }
}
