//! Modbus slave implementations
//!
//! Both slaves run the same cycle: wait for a complete frame, dispatch the
//! request against the shared [`RegisterContext`], send the reply.
//!
//! - [`ModbusRtuServer`] serves one serial line. Frames for other unit ids are
//!   ignored; broadcasts (unit 0) are applied but never answered.
//! - [`ModbusTcpServer`] accepts many connections, one task per connection,
//!   all sharing one [`SharedContext`]. Every unit id is served.
//!
//! Failures while handling a request become exception responses:
//!
//! | Failure | Exception |
//! |---------|-----------|
//! | Unknown function code | 0x01 Illegal Function |
//! | Address outside the configured ranges | 0x02 Illegal Data Address |
//! | Malformed request | 0x03 Illegal Data Value |
//! | Anything else | 0x04 Server Device Failure |
//!
//! Callbacks registered per function code run after a request has been
//! applied successfully, inside the same lock on the context. They may read
//! or modify the context but cannot change the reply, which is already built.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::{RtuSlaveConfig, TcpSlaveConfig};
use crate::constants::{DEFAULT_BAUD_RATE, EXCEPTION_FLAG, MBAP_HEADER_LEN};
use crate::context::{RegisterContext, RegisterKind, SharedContext};
use crate::error::{ModbusError, ModbusResult};
use crate::logging::log_packet;
use crate::pdu::{decode_request, encode_exception, encode_response, ModbusPdu};
use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse, SlaveId, BROADCAST_SLAVE_ID};
use crate::rtu::{self, RtuFramer};
use crate::tcp::{self, TcpFramer};

/// What a slave just did, delivered to the callback for that function code.
///
/// Reads carry the values returned, writes the values stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlaveEvent {
    ReadCoils { address: u16, values: Vec<bool> },
    ReadDiscreteInputs { address: u16, values: Vec<bool> },
    ReadHoldingRegisters { address: u16, values: Vec<u16> },
    ReadInputRegisters { address: u16, values: Vec<u16> },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl SlaveEvent {
    pub fn function(&self) -> ModbusFunction {
        match self {
            SlaveEvent::ReadCoils { .. } => ModbusFunction::ReadCoils,
            SlaveEvent::ReadDiscreteInputs { .. } => ModbusFunction::ReadDiscreteInputs,
            SlaveEvent::ReadHoldingRegisters { .. } => ModbusFunction::ReadHoldingRegisters,
            SlaveEvent::ReadInputRegisters { .. } => ModbusFunction::ReadInputRegisters,
            SlaveEvent::WriteSingleCoil { .. } => ModbusFunction::WriteSingleCoil,
            SlaveEvent::WriteSingleRegister { .. } => ModbusFunction::WriteSingleRegister,
            SlaveEvent::WriteMultipleCoils { .. } => ModbusFunction::WriteMultipleCoils,
            SlaveEvent::WriteMultipleRegisters { .. } => ModbusFunction::WriteMultipleRegisters,
        }
    }

    /// First address touched
    pub fn address(&self) -> u16 {
        match *self {
            SlaveEvent::ReadCoils { address, .. }
            | SlaveEvent::ReadDiscreteInputs { address, .. }
            | SlaveEvent::ReadHoldingRegisters { address, .. }
            | SlaveEvent::ReadInputRegisters { address, .. }
            | SlaveEvent::WriteSingleCoil { address, .. }
            | SlaveEvent::WriteSingleRegister { address, .. }
            | SlaveEvent::WriteMultipleCoils { address, .. }
            | SlaveEvent::WriteMultipleRegisters { address, .. } => address,
        }
    }
}

pub type SlaveCallback = Arc<dyn Fn(&SlaveEvent, &mut RegisterContext) + Send + Sync>;

/// Server statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub connections: u64,
    pub active_connections: u64,
    pub requests: u64,
    pub exception_responses: u64,
    /// Frames ignored: bad CRC, wrong unit id, or an invalid MBAP header
    pub dropped_frames: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

/// Applies decoded requests to the register context
#[derive(Clone)]
pub struct RequestHandler {
    context: SharedContext,
    callbacks: HashMap<ModbusFunction, SlaveCallback>,
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandler")
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RequestHandler {
    pub fn new(context: SharedContext) -> Self {
        Self {
            context,
            callbacks: HashMap::new(),
        }
    }

    pub fn context(&self) -> &SharedContext {
        &self.context
    }

    /// Replace the callback for `function`
    pub fn register_callback<F>(&mut self, function: ModbusFunction, callback: F)
    where
        F: Fn(&SlaveEvent, &mut RegisterContext) + Send + Sync + 'static,
    {
        self.callbacks.insert(function, Arc::new(callback));
    }

    /// Process one request PDU and return the reply PDU (normal or exception).
    ///
    /// Never fails: any error becomes an exception response.
    pub fn handle(&self, pdu: &ModbusPdu) -> ModbusPdu {
        let fc = pdu.function_code().unwrap_or(0) & !EXCEPTION_FLAG;

        let request = match decode_request(pdu) {
            Ok(request) => request,
            Err(e) => {
                debug!("Rejecting request FC={:02X}: {}", fc, e);
                return encode_exception(fc, e.exception_code());
            }
        };

        let mut context = self.context.lock();
        let (response, event) = match apply(&mut context, &request) {
            Ok(applied) => applied,
            Err(e) => {
                debug!("{} failed: {}", request.function(), e);
                return encode_exception(fc, e.exception_code());
            }
        };
        let reply = match encode_response(&response) {
            Ok(reply) => reply,
            Err(e) => {
                error!("Cannot encode {} response: {}", request.function(), e);
                return encode_exception(fc, e.exception_code());
            }
        };

        if let Some(callback) = self.callbacks.get(&request.function()) {
            callback(&event, &mut *context);
        }
        reply
    }
}

fn apply(ctx: &mut RegisterContext, request: &ModbusRequest) -> ModbusResult<(ModbusResponse, SlaveEvent)> {
    Ok(match request {
        ModbusRequest::ReadCoils { address, quantity } => {
            let values = ctx.get_bits(RegisterKind::Coil, *address, *quantity as usize)?;
            (
                ModbusResponse::ReadCoils(values.clone()),
                SlaveEvent::ReadCoils { address: *address, values },
            )
        }
        ModbusRequest::ReadDiscreteInputs { address, quantity } => {
            let values = ctx.get_bits(RegisterKind::DiscreteInput, *address, *quantity as usize)?;
            (
                ModbusResponse::ReadDiscreteInputs(values.clone()),
                SlaveEvent::ReadDiscreteInputs { address: *address, values },
            )
        }
        ModbusRequest::ReadHoldingRegisters { address, quantity } => {
            let values =
                ctx.get_registers(RegisterKind::HoldingRegister, *address, *quantity as usize)?;
            (
                ModbusResponse::ReadHoldingRegisters(values.clone()),
                SlaveEvent::ReadHoldingRegisters { address: *address, values },
            )
        }
        ModbusRequest::ReadInputRegisters { address, quantity } => {
            let values =
                ctx.get_registers(RegisterKind::InputRegister, *address, *quantity as usize)?;
            (
                ModbusResponse::ReadInputRegisters(values.clone()),
                SlaveEvent::ReadInputRegisters { address: *address, values },
            )
        }
        ModbusRequest::WriteSingleCoil { address, value } => {
            ctx.set_bits(RegisterKind::Coil, *address, &[*value])?;
            (
                ModbusResponse::WriteSingleCoil { address: *address, value: *value },
                SlaveEvent::WriteSingleCoil { address: *address, value: *value },
            )
        }
        ModbusRequest::WriteSingleRegister { address, value } => {
            ctx.set_registers(RegisterKind::HoldingRegister, *address, &[*value])?;
            (
                ModbusResponse::WriteSingleRegister { address: *address, value: *value },
                SlaveEvent::WriteSingleRegister { address: *address, value: *value },
            )
        }
        ModbusRequest::WriteMultipleCoils { address, values } => {
            ctx.set_bits(RegisterKind::Coil, *address, values)?;
            (
                ModbusResponse::WriteMultipleCoils {
                    address: *address,
                    quantity: values.len() as u16,
                },
                SlaveEvent::WriteMultipleCoils {
                    address: *address,
                    values: values.clone(),
                },
            )
        }
        ModbusRequest::WriteMultipleRegisters { address, values } => {
            ctx.set_registers(RegisterKind::HoldingRegister, *address, values)?;
            (
                ModbusResponse::WriteMultipleRegisters {
                    address: *address,
                    quantity: values.len() as u16,
                },
                SlaveEvent::WriteMultipleRegisters {
                    address: *address,
                    values: values.clone(),
                },
            )
        }
    })
}

// ============================================================================
// RTU
// ============================================================================

/// Modbus RTU slave on one serial line
pub struct ModbusRtuServer<S> {
    stream: S,
    framer: RtuFramer,
    device_address: SlaveId,
    handler: RequestHandler,
    stats: ServerStats,
    packet_logging: bool,
}

impl<S> ModbusRtuServer<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Serve `device_address` on `stream`, with the 9600 baud inter-frame silence
    pub fn new(stream: S, context: SharedContext, device_address: SlaveId) -> Self {
        Self {
            stream,
            framer: RtuFramer::for_baud_rate(DEFAULT_BAUD_RATE),
            device_address,
            handler: RequestHandler::new(context),
            stats: ServerStats::default(),
            packet_logging: false,
        }
    }

    pub fn with_config(stream: S, context: SharedContext, config: &RtuSlaveConfig) -> ModbusResult<Self> {
        config.validate()?;
        let mut server = Self::new(stream, context, config.device_address);
        server.framer = RtuFramer::new(config.silence());
        server.packet_logging = config.log_packets;
        Ok(server)
    }

    pub fn set_silence(&mut self, silence: Duration) {
        self.framer = RtuFramer::new(silence);
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    pub fn device_address(&self) -> SlaveId {
        self.device_address
    }

    pub fn context(&self) -> SharedContext {
        self.handler.context().clone()
    }

    pub fn register_callback<F>(&mut self, function: ModbusFunction, callback: F)
    where
        F: Fn(&SlaveEvent, &mut RegisterContext) + Send + Sync + 'static,
    {
        self.handler.register_callback(function, callback);
    }

    pub fn stats(&self) -> ServerStats {
        let mut stats = self.stats.clone();
        stats.dropped_frames += self.framer.discarded_frames();
        stats
    }

    /// Wait for one frame and answer it
    pub async fn process_next(&mut self) -> ModbusResult<()> {
        let (unit_id, pdu) = self.framer.next_adu(&mut self.stream).await?;
        self.stats.bytes_received += pdu.len() as u64 + 3;
        if self.packet_logging {
            log_packet("recv", "RTU", Some(unit_id), &rtu::encode_adu(unit_id, &pdu));
        }

        if unit_id != self.device_address && unit_id != BROADCAST_SLAVE_ID {
            self.stats.dropped_frames += 1;
            debug!("Frame for unit {} ignored (serving {})", unit_id, self.device_address);
            return Ok(());
        }

        self.stats.requests += 1;
        let reply = self.handler.handle(&pdu);
        if reply.is_exception() {
            self.stats.exception_responses += 1;
        }

        if unit_id == BROADCAST_SLAVE_ID {
            debug!("Broadcast FC={:02X} applied, no reply", pdu.function_code().unwrap_or(0));
            return Ok(());
        }

        let frame = rtu::encode_adu(unit_id, &reply);
        if self.packet_logging {
            log_packet("send", "RTU", Some(unit_id), &frame);
        }
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        self.stats.bytes_sent += frame.len() as u64;
        Ok(())
    }

    /// Serve until the stream fails
    pub async fn run(&mut self) -> ModbusResult<()> {
        info!("Modbus RTU slave serving unit {}", self.device_address);
        loop {
            self.process_next().await?;
        }
    }

    /// Serve until `signal` completes or the stream fails
    pub async fn run_until<F>(&mut self, signal: F) -> ModbusResult<()>
    where
        F: Future<Output = ()>,
    {
        info!("Modbus RTU slave serving unit {}", self.device_address);
        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Modbus RTU slave stopped");
                    return Ok(());
                }
                result = self.process_next() => result?,
            }
        }
    }
}

#[cfg(feature = "rtu")]
impl ModbusRtuServer<tokio_serial::SerialStream> {
    /// Open a serial port at 8N1 and serve `device_address` on it
    pub fn open(
        port: &str,
        baud_rate: u32,
        context: SharedContext,
        device_address: SlaveId,
    ) -> ModbusResult<Self> {
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(port, baud_rate)
            .open_native_async()
            .map_err(|e| ModbusError::connection(format!("Failed to open {}: {}", port, e)))?;
        let mut server = Self::new(stream, context, device_address);
        server.framer = RtuFramer::for_baud_rate(baud_rate);
        Ok(server)
    }
}

// ============================================================================
// TCP
// ============================================================================

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Modbus TCP slave
pub struct ModbusTcpServer {
    listener: TcpListener,
    handler: RequestHandler,
    handle: Handle,
    max_connections: usize,
    packet_logging: bool,
    shutdown_tx: watch::Sender<bool>,
    stats: Arc<Mutex<ServerStats>>,
}

impl ModbusTcpServer {
    pub async fn bind(addr: &str, context: SharedContext) -> ModbusResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ModbusError::connection(format!("Failed to bind to {}: {}", addr, e)))?;
        Self::from_listener(listener, context)
    }

    pub async fn with_config(config: &TcpSlaveConfig, context: SharedContext) -> ModbusResult<Self> {
        let mut server = Self::bind(&config.bind_address, context).await?;
        server.max_connections = config.max_connections;
        server.packet_logging = config.log_packets;
        Ok(server)
    }

    /// Serve on an already bound listener. Connection tasks are spawned on the
    /// current runtime unless [`with_handle`](Self::with_handle) says otherwise.
    pub fn from_listener(listener: TcpListener, context: SharedContext) -> ModbusResult<Self> {
        let handle = Handle::try_current()
            .map_err(|e| ModbusError::configuration(format!("no tokio runtime: {}", e)))?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            listener,
            handler: RequestHandler::new(context),
            handle,
            max_connections: TcpSlaveConfig::default().max_connections,
            packet_logging: false,
            shutdown_tx,
            stats: Arc::new(Mutex::new(ServerStats::default())),
        })
    }

    /// Spawn connection tasks on `handle`
    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handle = handle;
        self
    }

    pub fn set_max_connections(&mut self, max_connections: usize) {
        self.max_connections = max_connections.max(1);
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    pub fn register_callback<F>(&mut self, function: ModbusFunction, callback: F)
    where
        F: Fn(&SlaveEvent, &mut RegisterContext) + Send + Sync + 'static,
    {
        self.handler.register_callback(function, callback);
    }

    pub fn local_addr(&self) -> ModbusResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> SharedContext {
        self.handler.context().clone()
    }

    pub fn stats(&self) -> ServerStats {
        self.stats.lock().clone()
    }

    /// Stop accepting and close every open connection.
    ///
    /// A stopped server stays stopped: calling this before [`run`](Self::run)
    /// makes `run` return at once.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Accept connections until [`shutdown`](Self::shutdown) is called
    pub async fn run(&self) -> ModbusResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `signal` completes or [`shutdown`](Self::shutdown) is called
    pub async fn run_until<F>(&self, signal: F) -> ModbusResult<()>
    where
        F: Future<Output = ()>,
    {
        let local = self.local_addr()?;
        info!(
            "Modbus TCP slave listening on {} (max {} connections)",
            local, self.max_connections
        );

        let handler = Arc::new(self.handler.clone());
        let permits = Arc::new(Semaphore::new(self.max_connections));
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::pin!(signal);

        loop {
            let permit = tokio::select! {
                biased;
                _ = stopped(&mut shutdown_rx) => break,
                _ = &mut signal => break,
                permit = permits.clone().acquire_owned() => permit
                    .map_err(|e| ModbusError::connection(format!("connection limiter closed: {}", e)))?,
            };

            let (stream, peer) = tokio::select! {
                biased;
                _ = stopped(&mut shutdown_rx) => break,
                _ = &mut signal => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        // EMFILE and friends persist; don't spin on them
                        error!("Failed to accept connection: {}", e);
                        drop(permit);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                warn!("Cannot set TCP_NODELAY for {}: {}", peer, e);
            }
            let handler = handler.clone();
            let stats = self.stats.clone();
            let shutdown = self.shutdown_tx.subscribe();
            let packet_logging = self.packet_logging;
            self.handle.spawn(async move {
                let _permit = permit;
                serve_tcp_stream(stream, peer, handler, stats, shutdown, packet_logging).await;
            });
        }

        self.shutdown_tx.send_replace(true);
        info!("Modbus TCP slave on {} stopped", local);
        Ok(())
    }
}

/// Resolves once the server has been told to stop, or was dropped
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Counts a connection as active for as long as it lives, unwinding included
struct ActiveConnection {
    stats: Arc<Mutex<ServerStats>>,
}

impl ActiveConnection {
    fn open(stats: Arc<Mutex<ServerStats>>) -> Self {
        {
            let mut stats = stats.lock();
            stats.connections += 1;
            stats.active_connections += 1;
        }
        Self { stats }
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        let mut stats = self.stats.lock();
        stats.active_connections = stats.active_connections.saturating_sub(1);
    }
}

async fn serve_tcp_stream(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<RequestHandler>,
    stats: Arc<Mutex<ServerStats>>,
    shutdown: watch::Receiver<bool>,
    packet_logging: bool,
) {
    info!("Client connected: {}", peer);
    let _active = ActiveConnection::open(stats.clone());

    let result = serve_connection(stream, &handler, &stats, shutdown, packet_logging).await;
    match result {
        Ok(()) => info!("Client disconnected: {}", peer),
        Err(e) => warn!("Client {} dropped: {}", peer, e),
    }
}

/// Serve Modbus TCP requests on one connection.
///
/// Returns `Ok` when the peer closes or shutdown is signalled, and an error
/// when the peer violates MBAP framing or the stream fails.
pub async fn serve_connection<S>(
    mut stream: S,
    handler: &RequestHandler,
    stats: &Mutex<ServerStats>,
    mut shutdown: watch::Receiver<bool>,
    packet_logging: bool,
) -> ModbusResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framer = TcpFramer::new();
    loop {
        let (header, pdu) = tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => return Ok(()),
            adu = framer.read_adu(&mut stream) => match adu {
                Ok(adu) => adu,
                Err(ModbusError::Connection { .. }) => return Ok(()),
                Err(e) => {
                    stats.lock().dropped_frames += 1;
                    return Err(e);
                }
            },
        };
        if packet_logging {
            log_packet(
                "recv",
                "TCP",
                Some(header.unit_id),
                &tcp::encode_adu(header.transaction_id, header.unit_id, &pdu),
            );
        }

        let reply = handler.handle(&pdu);
        let frame = tcp::encode_adu(header.transaction_id, header.unit_id, &reply);
        {
            let mut stats = stats.lock();
            stats.requests += 1;
            stats.bytes_received += (MBAP_HEADER_LEN + pdu.len()) as u64;
            stats.bytes_sent += frame.len() as u64;
            if reply.is_exception() {
                stats.exception_responses += 1;
            }
        }

        if packet_logging {
            log_packet("send", "TCP", Some(header.unit_id), &frame);
        }
        stream.write_all(&frame).await?;
        stream.flush().await?;
    }
}
