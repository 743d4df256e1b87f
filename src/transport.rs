//! # Modbus Transport Layer
//!
//! A transport owns one byte stream and runs the master side of a single
//! transaction at a time: encode, frame, send, then wait for a matching
//! reply until the deadline.
//!
//! ## Transports
//!
//! - [`RtuTransport`]: unit id + PDU + CRC16, frames delimited by line silence.
//!   Unit id 0 is a broadcast: writes are sent and never answered.
//! - [`TcpTransport`]: MBAP header + PDU. Replies are matched on transaction
//!   id as well as unit id and function code.
//!
//! Both are generic over the stream, so the same code drives a serial port,
//! a TCP socket or an in-memory `tokio::io::duplex` pipe.
//!
//! ## Reply matching
//!
//! Frames whose unit id, function code or transaction id do not belong to the
//! outstanding request are discarded and counted in
//! [`TransportStats::discarded_frames`]; the transport keeps waiting until the
//! deadline. A late reply to an earlier, timed-out request is dropped this way.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::debug;

use crate::constants::{EXCEPTION_FLAG, MBAP_HEADER_LEN};
use crate::error::{ModbusError, ModbusResult};
use crate::logging::log_packet;
use crate::pdu::{decode_exception, decode_response, encode_request, ModbusPdu};
use crate::protocol::{ModbusRequest, ModbusResponse, SlaveId, BROADCAST_SLAVE_ID};
use crate::rtu::{self, RtuFramer};
use crate::tcp::{self, TcpFramer};

/// Master-side transport: one outstanding request at a time
pub trait ModbusTransport: Send + Sync {
    /// Send `request` to `slave_id` and wait up to `timeout` for the reply.
    ///
    /// # Errors
    ///
    /// - `InvalidData` - arguments out of range, nothing was sent
    /// - `Exception` - the slave answered with an exception response
    /// - `Timeout` - no matching reply before the deadline
    /// - `Connection` / `Io` - the stream failed or was closed
    /// - `Frame` - TCP only, the peer sent an invalid MBAP header
    fn request(
        &mut self,
        slave_id: SlaveId,
        request: &ModbusRequest,
        timeout: Duration,
    ) -> impl Future<Output = ModbusResult<ModbusResponse>> + Send;

    fn is_connected(&self) -> bool;

    fn close(&mut self) -> impl Future<Output = ModbusResult<()>> + Send;

    fn get_stats(&self) -> TransportStats;
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    /// Frames dropped: bad CRC, or addressed to another transaction
    pub discarded_frames: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Outcome of checking a received PDU against the outstanding request
enum ReplyMatch {
    /// Reply belongs to another request
    Foreign,
    Matched(ModbusResult<ModbusResponse>),
}

fn match_reply(request: &ModbusRequest, pdu: &ModbusPdu) -> ReplyMatch {
    let function = request.function();
    let Some(fc) = pdu.function_code() else {
        return ReplyMatch::Foreign;
    };
    if fc & !EXCEPTION_FLAG != function.to_u8() {
        return ReplyMatch::Foreign;
    }

    if pdu.is_exception() {
        return ReplyMatch::Matched(match decode_exception(pdu) {
            Some(code) => Err(ModbusError::exception(function.to_u8(), code)),
            None => Err(ModbusError::frame("exception response without exception code")),
        });
    }

    ReplyMatch::Matched(
        decode_response(function, pdu.payload()).and_then(|response| shape_reply(request, response)),
    )
}

/// Trim bit replies to the requested quantity and check echoes and counts
fn shape_reply(request: &ModbusRequest, response: ModbusResponse) -> ModbusResult<ModbusResponse> {
    let quantity = request.quantity() as usize;
    let short = |got: usize| {
        ModbusError::protocol(format!(
            "{}: expected {} values, got {}",
            request.function().name(),
            quantity,
            got
        ))
    };

    match response {
        ModbusResponse::ReadCoils(mut bits) | ModbusResponse::ReadDiscreteInputs(mut bits)
            if bits.len() >= quantity && bits.len() < quantity + 8 =>
        {
            bits.truncate(quantity);
            Ok(match request {
                ModbusRequest::ReadCoils { .. } => ModbusResponse::ReadCoils(bits),
                _ => ModbusResponse::ReadDiscreteInputs(bits),
            })
        }
        ModbusResponse::ReadCoils(bits) | ModbusResponse::ReadDiscreteInputs(bits) => {
            Err(short(bits.len()))
        }
        ModbusResponse::ReadHoldingRegisters(ref values)
        | ModbusResponse::ReadInputRegisters(ref values) => {
            if values.len() == quantity {
                Ok(response)
            } else {
                Err(short(values.len()))
            }
        }
        echo => {
            if ModbusResponse::echo_of(request).as_ref() == Some(&echo) {
                Ok(echo)
            } else {
                Err(ModbusError::protocol(format!(
                    "{}: echo {:?} does not match request",
                    request.function().name(),
                    echo
                )))
            }
        }
    }
}

// ============================================================================
// RTU
// ============================================================================

/// Modbus RTU master transport over any byte stream
pub struct RtuTransport<S> {
    stream: Option<S>,
    framer: RtuFramer,
    stats: TransportStats,
    packet_logging: bool,
}

impl<S> RtuTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    /// Wrap `stream`, ending frames after `silence` of line idle time
    pub fn new(stream: S, silence: Duration) -> Self {
        Self {
            stream: Some(stream),
            framer: RtuFramer::new(silence),
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Wrap `stream`, deriving the inter-frame silence from the line speed
    pub fn with_baud_rate(stream: S, baud_rate: u32) -> Self {
        Self::new(stream, rtu::silence_for_baud(baud_rate))
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    pub fn silence(&self) -> Duration {
        self.framer.silence()
    }
}

#[cfg(feature = "rtu")]
impl RtuTransport<tokio_serial::SerialStream> {
    /// Open a serial port at 8N1
    pub fn open(port: &str, baud_rate: u32) -> ModbusResult<Self> {
        Self::open_with_config(
            port,
            baud_rate,
            tokio_serial::DataBits::Eight,
            tokio_serial::StopBits::One,
            tokio_serial::Parity::None,
        )
    }

    pub fn open_with_config(
        port: &str,
        baud_rate: u32,
        data_bits: tokio_serial::DataBits,
        stop_bits: tokio_serial::StopBits,
        parity: tokio_serial::Parity,
    ) -> ModbusResult<Self> {
        use tokio_serial::SerialPortBuilderExt;

        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .open_native_async()
            .map_err(|e| ModbusError::connection(format!("Failed to open {}: {}", port, e)))?;
        Ok(Self::with_baud_rate(stream, baud_rate))
    }
}

impl<S> ModbusTransport for RtuTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn request(
        &mut self,
        slave_id: SlaveId,
        request: &ModbusRequest,
        timeout: Duration,
    ) -> ModbusResult<ModbusResponse> {
        let pdu = encode_request(request)?;
        if slave_id == BROADCAST_SLAVE_ID && request.function().is_read() {
            return Err(ModbusError::invalid_data(format!(
                "{} cannot be broadcast",
                request.function().name()
            )));
        }

        let Self {
            stream,
            framer,
            stats,
            packet_logging,
        } = self;
        let stream = stream
            .as_mut()
            .ok_or_else(|| ModbusError::connection("RTU transport closed"))?;

        let frame = rtu::encode_adu(slave_id, &pdu);
        framer.reset();
        if *packet_logging {
            log_packet("send", "RTU", Some(slave_id), &frame);
        }
        if let Err(e) = write_frame(stream, &frame).await {
            stats.errors += 1;
            return Err(e);
        }
        stats.requests_sent += 1;
        stats.bytes_sent += frame.len() as u64;

        if slave_id == BROADCAST_SLAVE_ID {
            debug!("RTU broadcast {} sent, no reply expected", request.function());
            // Turnaround: keep the line idle so slaves finish the frame before the next one
            tokio::time::sleep(framer.silence() * 2).await;
            return ModbusResponse::echo_of(request)
                .ok_or_else(|| ModbusError::invalid_data("broadcast of a read request"));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let (unit_id, reply) = match timeout_at(deadline, framer.next_adu(stream)).await {
                Err(_) => {
                    stats.timeouts += 1;
                    return Err(ModbusError::timeout(
                        request.function().name(),
                        timeout.as_millis() as u64,
                    ));
                }
                Ok(Err(e)) => {
                    stats.errors += 1;
                    return Err(e);
                }
                Ok(Ok(adu)) => adu,
            };
            stats.bytes_received += reply.len() as u64 + 3;
            if *packet_logging {
                log_packet("recv", "RTU", Some(unit_id), &rtu::encode_adu(unit_id, &reply));
            }

            if unit_id != slave_id {
                stats.discarded_frames += 1;
                debug!("RTU reply from unit {} while waiting for {}, discarded", unit_id, slave_id);
                continue;
            }
            match match_reply(request, &reply) {
                ReplyMatch::Foreign => {
                    stats.discarded_frames += 1;
                    debug!("RTU reply with foreign function code, discarded");
                }
                ReplyMatch::Matched(result) => {
                    match &result {
                        Ok(_) | Err(ModbusError::Exception { .. }) => stats.responses_received += 1,
                        Err(_) => stats.errors += 1,
                    }
                    return result;
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        let mut stats = self.stats.clone();
        stats.discarded_frames += self.framer.discarded_frames();
        stats
    }
}

// ============================================================================
// TCP
// ============================================================================

/// Modbus TCP master transport
pub struct TcpTransport<S = TcpStream> {
    stream: Option<S>,
    framer: TcpFramer,
    address: Option<SocketAddr>,
    transaction_id: u16,
    stats: TransportStats,
    packet_logging: bool,
}

impl TcpTransport<TcpStream> {
    /// Connect to a Modbus TCP server
    pub async fn connect(address: SocketAddr, connect_timeout: Duration) -> ModbusResult<Self> {
        let stream = open_tcp(address, connect_timeout).await?;
        let mut transport = Self::new(stream);
        transport.address = Some(address);
        Ok(transport)
    }

    /// Drop the current connection and open a fresh one to the same server
    pub async fn reconnect(&mut self, connect_timeout: Duration) -> ModbusResult<()> {
        let address = self
            .address
            .ok_or_else(|| ModbusError::connection("no server address to reconnect to"))?;
        self.stream = None;
        self.framer.reset();
        self.stream = Some(open_tcp(address, connect_timeout).await?);
        Ok(())
    }

    pub fn server_address(&self) -> Option<SocketAddr> {
        self.address
    }
}

async fn open_tcp(address: SocketAddr, connect_timeout: Duration) -> ModbusResult<TcpStream> {
    let stream = timeout(connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| ModbusError::timeout(format!("connect to {}", address), connect_timeout.as_millis() as u64))?
        .map_err(|e| ModbusError::connection(format!("Failed to connect to {}: {}", address, e)))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

impl<S> TcpTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
            framer: TcpFramer::new(),
            address: None,
            transaction_id: 0,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Next transaction id; wraps and skips 0
    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }
}

impl<S> ModbusTransport for TcpTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn request(
        &mut self,
        slave_id: SlaveId,
        request: &ModbusRequest,
        timeout: Duration,
    ) -> ModbusResult<ModbusResponse> {
        let pdu = encode_request(request)?;
        if self.stream.is_none() {
            return Err(ModbusError::connection("TCP transport closed"));
        }
        let transaction_id = self.next_transaction_id();

        let Self {
            stream: stream_slot,
            framer,
            stats,
            packet_logging,
            ..
        } = self;
        let Some(stream) = stream_slot.as_mut() else {
            return Err(ModbusError::connection("TCP transport closed"));
        };

        let frame = tcp::encode_adu(transaction_id, slave_id, &pdu);
        if *packet_logging {
            log_packet("send", "TCP", Some(slave_id), &frame);
        }
        if let Err(e) = write_frame(stream, &frame).await {
            stats.errors += 1;
            *stream_slot = None;
            return Err(e);
        }
        stats.requests_sent += 1;
        stats.bytes_sent += frame.len() as u64;

        let deadline = Instant::now() + timeout;
        loop {
            let (header, reply) = match timeout_at(deadline, framer.read_adu(stream)).await {
                Err(_) => {
                    stats.timeouts += 1;
                    return Err(ModbusError::timeout(
                        request.function().name(),
                        timeout.as_millis() as u64,
                    ));
                }
                Ok(Err(e)) => {
                    // Stream is out of sync or gone either way
                    stats.errors += 1;
                    *stream_slot = None;
                    return Err(e);
                }
                Ok(Ok(adu)) => adu,
            };
            stats.bytes_received += (MBAP_HEADER_LEN + reply.len()) as u64;
            if *packet_logging {
                log_packet(
                    "recv",
                    "TCP",
                    Some(header.unit_id),
                    &tcp::encode_adu(header.transaction_id, header.unit_id, &reply),
                );
            }

            if header.transaction_id != transaction_id || header.unit_id != slave_id {
                stats.discarded_frames += 1;
                debug!(
                    "TCP reply tid:{} unit:{} while waiting for tid:{} unit:{}, discarded",
                    header.transaction_id, header.unit_id, transaction_id, slave_id
                );
                continue;
            }
            match match_reply(request, &reply) {
                ReplyMatch::Foreign => {
                    stats.discarded_frames += 1;
                    debug!("TCP reply with foreign function code, discarded");
                }
                ReplyMatch::Matched(result) => {
                    match &result {
                        Ok(_) | Err(ModbusError::Exception { .. }) => stats.responses_received += 1,
                        Err(_) => stats.errors += 1,
                    }
                    return result;
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }
}

async fn write_frame<S>(stream: &mut S, frame: &[u8]) -> ModbusResult<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(frame).await?;
    stream.flush().await?;
    Ok(())
}
