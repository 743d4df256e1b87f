//! Modbus RTU framing
//!
//! RTU frames carry no length field. A frame ends when the line has been
//! silent for the inter-frame interval, measured from the last received
//! byte. Each frame is `unit_id + PDU + CRC16` with the CRC low byte first.
//! Frames failing the CRC or length checks are dropped without a reply.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::constants::*;
use crate::crc::{crc16, verify};
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;
use crate::protocol::SlaveId;

/// Inter-frame silence for a serial line running at `baud_rate`.
///
/// 3.5 character times at 11 bits per character; a fixed 1.75 ms above 19200
/// baud where the character time becomes too short to time reliably.
pub fn silence_for_baud(baud_rate: u32) -> Duration {
    if baud_rate == 0 || baud_rate > 19200 {
        return Duration::from_micros(RTU_MIN_SILENCE_US);
    }
    // 3.5 chars × bits per char × 1e6 µs / baud
    let micros = (RTU_BITS_PER_CHAR as u64 * 3_500_000).div_ceil(baud_rate as u64);
    Duration::from_micros(micros.max(RTU_MIN_SILENCE_US))
}

/// Build an RTU ADU: unit id, PDU, then the CRC of both (low byte first)
pub fn encode_adu(unit_id: SlaveId, pdu: &ModbusPdu) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pdu.len() + 3);
    frame.push(unit_id);
    frame.extend_from_slice(pdu.as_slice());
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Split a complete frame into unit id and PDU.
///
/// Returns `None` when the frame is too short, too long or fails the CRC.
pub fn decode_adu(frame: &[u8]) -> Option<(SlaveId, ModbusPdu)> {
    if frame.len() < MIN_RTU_ADU_SIZE || frame.len() > MAX_RTU_ADU_SIZE {
        return None;
    }
    if !verify(frame) {
        return None;
    }
    let pdu = ModbusPdu::from_slice(&frame[1..frame.len() - 2]).ok()?;
    Some((frame[0], pdu))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtuFrameState {
    /// No bytes of the next frame seen yet
    Idle,
    /// Bytes arriving, waiting for the line to go quiet
    Receiving,
    /// Silence observed; the buffered bytes form one candidate frame
    Complete,
}

/// Silence-delimited frame reassembly over any byte stream.
///
/// The partial frame lives in the framer, so a read cancelled by a deadline
/// resumes where it stopped.
#[derive(Debug)]
pub struct RtuFramer {
    buffer: BytesMut,
    silence: Duration,
    state: RtuFrameState,
    overflowed: bool,
    discarded: u64,
}

impl RtuFramer {
    pub fn new(silence: Duration) -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_RTU_ADU_SIZE),
            silence,
            state: RtuFrameState::Idle,
            overflowed: false,
            discarded: 0,
        }
    }

    pub fn for_baud_rate(baud_rate: u32) -> Self {
        Self::new(silence_for_baud(baud_rate))
    }

    pub fn silence(&self) -> Duration {
        self.silence
    }

    pub fn state(&self) -> RtuFrameState {
        self.state
    }

    /// Frames dropped for bad CRC, bad length or overflow
    pub fn discarded_frames(&self) -> u64 {
        self.discarded
    }

    /// Drop any partially received frame
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            debug!("RTU framer reset, dropping {} stale bytes", self.buffer.len());
        }
        self.buffer.clear();
        self.overflowed = false;
        self.state = RtuFrameState::Idle;
    }

    /// Wait for the next silence-delimited run of bytes.
    ///
    /// End of stream with nothing buffered is a `Connection` error; end of
    /// stream after some bytes completes that frame.
    pub async fn next_frame<R>(&mut self, reader: &mut R) -> ModbusResult<Bytes>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if self.buffer.is_empty() && !self.overflowed {
                self.state = RtuFrameState::Idle;
                let n = reader.read_buf(&mut self.buffer).await?;
                if n == 0 {
                    return Err(ModbusError::connection("RTU stream closed"));
                }
                self.state = RtuFrameState::Receiving;
                self.check_overflow();
                continue;
            }

            let eof = match timeout(self.silence, reader.read_buf(&mut self.buffer)).await {
                Err(_) => false,
                Ok(Ok(0)) => true,
                Ok(Ok(_)) => {
                    self.check_overflow();
                    continue;
                }
                Ok(Err(e)) => return Err(e.into()),
            };

            self.state = RtuFrameState::Complete;
            if self.overflowed {
                self.overflowed = false;
                self.discarded += 1;
                warn!("RTU frame exceeded {} bytes, discarded", MAX_RTU_ADU_SIZE);
                self.buffer.clear();
                if eof {
                    return Err(ModbusError::connection("RTU stream closed"));
                }
                continue;
            }

            let frame = self.buffer.split().freeze();
            self.state = RtuFrameState::Idle;
            return Ok(frame);
        }
    }

    /// Wait for the next frame that passes the length and CRC checks
    pub async fn next_adu<R>(&mut self, reader: &mut R) -> ModbusResult<(SlaveId, ModbusPdu)>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let frame = self.next_frame(reader).await?;
            match decode_adu(&frame) {
                Some(adu) => return Ok(adu),
                None => {
                    self.discarded += 1;
                    warn!(
                        "RTU frame discarded ({} bytes, CRC or length check failed)",
                        frame.len()
                    );
                }
            }
        }
    }

    fn check_overflow(&mut self) {
        if self.buffer.len() > MAX_RTU_ADU_SIZE {
            self.overflowed = true;
            self.buffer.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::encode_request;
    use crate::protocol::ModbusRequest;
    use tokio::io::AsyncWriteExt;
    use tokio_test::io::Builder;

    fn read_request_frame(unit: u8) -> Vec<u8> {
        let pdu = encode_request(&ModbusRequest::ReadHoldingRegisters {
            address: 0,
            quantity: 1,
        })
        .unwrap();
        encode_adu(unit, &pdu)
    }

    #[test]
    fn test_encode_adu() {
        assert_eq!(
            read_request_frame(1),
            vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]
        );
    }

    #[test]
    fn test_decode_adu() {
        let frame = read_request_frame(0x11);
        let (unit, pdu) = decode_adu(&frame).unwrap();
        assert_eq!(unit, 0x11);
        assert_eq!(pdu.as_slice(), &frame[1..6]);
    }

    #[test]
    fn test_decode_adu_rejects_bad_frames() {
        let mut frame = read_request_frame(1);
        frame[3] ^= 0x01;
        assert!(decode_adu(&frame).is_none());
        assert!(decode_adu(&[0x01, 0x03, 0x00]).is_none());
        assert!(decode_adu(&vec![0u8; MAX_RTU_ADU_SIZE + 1]).is_none());
    }

    #[test]
    fn test_silence_for_baud() {
        assert_eq!(silence_for_baud(115200), Duration::from_micros(1750));
        assert_eq!(silence_for_baud(38400), Duration::from_micros(1750));
        // 38.5 bits at 9600 baud is just over 4 ms
        let at_9600 = silence_for_baud(9600);
        assert!(at_9600 >= Duration::from_micros(4010));
        assert!(at_9600 < Duration::from_micros(4100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_split_on_silence() {
        let first = read_request_frame(1);
        let second = read_request_frame(2);
        let mut mock = Builder::new()
            .read(&first[..3])
            .read(&first[3..])
            .wait(Duration::from_millis(10))
            .read(&second)
            .build();

        let mut framer = RtuFramer::new(Duration::from_millis(2));
        let (unit, _) = framer.next_adu(&mut mock).await.unwrap();
        assert_eq!(unit, 1);
        let (unit, _) = framer.next_adu(&mut mock).await.unwrap();
        assert_eq!(unit, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_crc_silently_discarded() {
        let mut corrupt = read_request_frame(1);
        corrupt[2] ^= 0x40;
        let good = read_request_frame(3);
        let mut mock = Builder::new()
            .read(&corrupt)
            .wait(Duration::from_millis(10))
            .read(&good)
            .build();

        let mut framer = RtuFramer::new(Duration::from_millis(2));
        let (unit, _) = framer.next_adu(&mut mock).await.unwrap();
        assert_eq!(unit, 3);
        assert_eq!(framer.discarded_frames(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eof_without_data_is_connection_error() {
        let mut mock = Builder::new().build();
        let mut framer = RtuFramer::new(Duration::from_millis(2));
        let err = framer.next_adu(&mut mock).await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_frame_survives_cancellation() {
        let frame = read_request_frame(7);
        let (mut tx, mut rx) = tokio::io::duplex(64);
        let mut framer = RtuFramer::new(Duration::from_millis(2));

        tx.write_all(&frame[..4]).await.unwrap();
        // Deadline fires while the framer waits for the rest after the first read
        let cancelled = timeout(Duration::from_micros(500), framer.next_adu(&mut rx)).await;
        assert!(cancelled.is_err());
        assert_eq!(framer.state(), RtuFrameState::Receiving);

        tx.write_all(&frame[4..]).await.unwrap();
        let (unit, _) = framer.next_adu(&mut rx).await.unwrap();
        assert_eq!(unit, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_drops_partial_frame() {
        let frame = read_request_frame(7);
        let (mut tx, mut rx) = tokio::io::duplex(64);
        let mut framer = RtuFramer::new(Duration::from_millis(2));

        tx.write_all(&frame[..4]).await.unwrap();
        let _ = timeout(Duration::from_micros(500), framer.next_adu(&mut rx)).await;
        framer.reset();
        assert_eq!(framer.state(), RtuFrameState::Idle);

        tokio::time::sleep(Duration::from_millis(5)).await;
        tx.write_all(&frame).await.unwrap();
        let (unit, pdu) = framer.next_adu(&mut rx).await.unwrap();
        assert_eq!(unit, 7);
        assert_eq!(pdu.as_slice(), &frame[1..6]);
    }
}
