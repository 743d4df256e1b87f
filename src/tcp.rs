//! Modbus TCP (MBAP) framing
//!
//! Each ADU is a 7-byte MBAP header followed by the PDU:
//!
//! ```text
//! | transaction id (2) | protocol id (2) = 0 | length (2) | unit id (1) | PDU |
//! ```
//!
//! `length` counts the unit id plus the PDU. There is no checksum. A header
//! that cannot belong to a conforming peer is fatal for the connection.

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};
use crate::pdu::ModbusPdu;
use crate::protocol::SlaveId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    /// Always 0 for Modbus
    pub protocol_id: u16,
    /// Unit id plus PDU length
    pub length: u16,
    pub unit_id: SlaveId,
}

impl MbapHeader {
    pub fn new(transaction_id: u16, unit_id: SlaveId, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: 0,
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }

    /// Parse and validate a header.
    ///
    /// A non-zero protocol id, or a length that cannot carry a PDU of
    /// 1..=253 bytes, is a `Frame` error.
    pub fn parse(bytes: &[u8; MBAP_HEADER_LEN]) -> ModbusResult<Self> {
        let header = Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        };

        if header.protocol_id != 0 {
            return Err(ModbusError::frame(format!(
                "invalid MBAP protocol id {}",
                header.protocol_id
            )));
        }
        let length = header.length as usize;
        if !(MIN_MBAP_LENGTH..=MAX_MBAP_LENGTH).contains(&length) {
            return Err(ModbusError::frame(format!(
                "invalid MBAP length {} (expected {}..={})",
                length, MIN_MBAP_LENGTH, MAX_MBAP_LENGTH
            )));
        }
        Ok(header)
    }

    pub fn to_bytes(&self) -> [u8; MBAP_HEADER_LEN] {
        let tid = self.transaction_id.to_be_bytes();
        let pid = self.protocol_id.to_be_bytes();
        let len = self.length.to_be_bytes();
        [tid[0], tid[1], pid[0], pid[1], len[0], len[1], self.unit_id]
    }

    pub fn pdu_len(&self) -> usize {
        self.length as usize - 1
    }
}

/// Build a TCP ADU with `length = pdu.len() + 1`
pub fn encode_adu(transaction_id: u16, unit_id: SlaveId, pdu: &ModbusPdu) -> Vec<u8> {
    let header = MbapHeader::new(transaction_id, unit_id, pdu.len());
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&header.to_bytes());
    frame.extend_from_slice(pdu.as_slice());
    frame
}

/// Length-delimited ADU reassembly over a byte stream.
///
/// Bytes beyond the current ADU stay buffered for the next call, so several
/// ADUs arriving in one segment are each returned in turn.
#[derive(Debug, Default)]
pub struct TcpFramer {
    buffer: BytesMut,
}

impl TcpFramer {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_TCP_ADU_SIZE),
        }
    }

    /// Drop any buffered partial ADU
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// A complete ADU from the buffer, if one is there
    fn try_parse(&mut self) -> ModbusResult<Option<(MbapHeader, ModbusPdu)>> {
        if self.buffer.len() < MBAP_HEADER_LEN {
            return Ok(None);
        }
        let mut raw = [0u8; MBAP_HEADER_LEN];
        raw.copy_from_slice(&self.buffer[..MBAP_HEADER_LEN]);
        let header = MbapHeader::parse(&raw)?;

        let total = MBAP_HEADER_LEN + header.pdu_len();
        if self.buffer.len() < total {
            return Ok(None);
        }
        self.buffer.advance(MBAP_HEADER_LEN);
        let body = self.buffer.split_to(header.pdu_len());
        let pdu = ModbusPdu::from_slice(&body)?;
        Ok(Some((header, pdu)))
    }

    /// Read one ADU.
    ///
    /// Peer close is a `Connection` error; an invalid header is a `Frame`
    /// error after which the connection must be dropped.
    pub async fn read_adu<R>(&mut self, reader: &mut R) -> ModbusResult<(MbapHeader, ModbusPdu)>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            match self.try_parse() {
                Ok(Some(adu)) => return Ok(adu),
                Ok(None) => {}
                Err(e) => {
                    warn!("MBAP header rejected: {}", e);
                    self.buffer.clear();
                    return Err(e);
                }
            }

            let n = reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                let message = if self.buffer.is_empty() {
                    "peer closed connection".to_string()
                } else {
                    format!("peer closed connection mid-frame ({} bytes buffered)", self.buffer.len())
                };
                self.buffer.clear();
                return Err(ModbusError::connection(message));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn sample_pdu() -> ModbusPdu {
        ModbusPdu::from_slice(&[0x03, 0x00, 0x00, 0x00, 0x01]).unwrap()
    }

    #[test]
    fn test_encode_adu_header_layout() {
        let frame = encode_adu(0x1234, 0x11, &sample_pdu());
        assert_eq!(
            frame,
            vec![0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn test_parse_header_validation() {
        let ok = MbapHeader::parse(&[0, 1, 0, 0, 0, 6, 1]).unwrap();
        assert_eq!(ok.transaction_id, 1);
        assert_eq!(ok.pdu_len(), 5);

        assert!(matches!(
            MbapHeader::parse(&[0, 1, 0, 1, 0, 6, 1]),
            Err(ModbusError::Frame { .. })
        ));
        assert!(matches!(
            MbapHeader::parse(&[0, 1, 0, 0, 0, 0, 1]),
            Err(ModbusError::Frame { .. })
        ));
        assert!(matches!(
            MbapHeader::parse(&[0, 1, 0, 0, 0x01, 0x05, 1]),
            Err(ModbusError::Frame { .. })
        ));
    }

    #[tokio::test]
    async fn test_read_adu_across_segments() {
        let frame = encode_adu(7, 1, &sample_pdu());
        let mut mock = Builder::new().read(&frame[..4]).read(&frame[4..9]).read(&frame[9..]).build();
        let mut framer = TcpFramer::new();

        let (header, pdu) = framer.read_adu(&mut mock).await.unwrap();
        assert_eq!(header.transaction_id, 7);
        assert_eq!(header.unit_id, 1);
        assert_eq!(pdu, sample_pdu());
    }

    #[tokio::test]
    async fn test_two_adus_in_one_segment() {
        let mut segment = encode_adu(1, 1, &sample_pdu());
        segment.extend(encode_adu(2, 1, &sample_pdu()));
        let mut mock = Builder::new().read(&segment).build();
        let mut framer = TcpFramer::new();

        assert_eq!(framer.read_adu(&mut mock).await.unwrap().0.transaction_id, 1);
        assert_eq!(framer.read_adu(&mut mock).await.unwrap().0.transaction_id, 2);
    }

    #[tokio::test]
    async fn test_bad_protocol_id_is_fatal() {
        let mut frame = encode_adu(1, 1, &sample_pdu());
        frame[3] = 0x01;
        let mut mock = Builder::new().read(&frame).build();
        let mut framer = TcpFramer::new();

        let err = framer.read_adu(&mut mock).await.unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
    }

    #[tokio::test]
    async fn test_peer_close() {
        let frame = encode_adu(1, 1, &sample_pdu());
        let mut mock = Builder::new().read(&frame[..5]).build();
        let mut framer = TcpFramer::new();

        let err = framer.read_adu(&mut mock).await.unwrap_err();
        assert!(matches!(err, ModbusError::Connection { .. }));
    }
}
