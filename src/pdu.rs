//! Modbus PDU buffer and codec
//!
//! [`ModbusPdu`] is a fixed-size stack buffer holding one PDU (function code
//! plus payload). The free functions convert between PDUs and the typed
//! [`ModbusRequest`] / [`ModbusResponse`] values for both sides of a
//! transaction:
//!
//! | Side   | Outgoing                               | Incoming                                  |
//! |--------|----------------------------------------|-------------------------------------------|
//! | master | [`encode_request`]                     | [`decode_exception`], [`decode_response`] |
//! | slave  | [`encode_response`], [`encode_exception`] | [`decode_request`]                     |

use tracing::debug;

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ExceptionCode, ModbusFunction, ModbusRequest, ModbusResponse};

/// PDU with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Copy a received PDU out of a frame buffer
    pub fn from_slice(data: &[u8]) -> ModbusResult<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::frame(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();

        match pdu.function_code() {
            Some(fc) if pdu.is_exception() => debug!(
                "PDU parsed: FC={:02X} (Exception: {}), code={:02X}",
                fc,
                Self::function_code_description(fc),
                pdu.exception_code().unwrap_or(0)
            ),
            Some(fc) => debug!(
                "PDU parsed: FC={:02X} ({}), data_len={}",
                fc,
                Self::function_code_description(fc),
                pdu.len - 1
            ),
            None => debug!("PDU parsed: empty PDU"),
        }

        Ok(pdu)
    }

    /// Exception PDU: function code with the high bit set, then the code
    pub fn exception(function_code: u8, code: ExceptionCode) -> Self {
        let mut pdu = Self::new();
        pdu.data[0] = function_code | EXCEPTION_FLAG;
        pdu.data[1] = code.to_u8();
        pdu.len = 2;
        pdu
    }

    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(ModbusError::invalid_data("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        self.extend(&value.to_be_bytes())
    }

    #[inline]
    pub fn extend(&mut self, data: &[u8]) -> ModbusResult<()> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(ModbusError::invalid_data(format!(
                "PDU would exceed max size: {} + {} > {}",
                self.len,
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First byte, including the exception bit if set
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        if self.len > 0 {
            Some(self.data[0])
        } else {
            None
        }
    }

    /// Everything after the function code
    #[inline]
    pub fn payload(&self) -> &[u8] {
        if self.len > 0 {
            &self.data[1..self.len]
        } else {
            &[]
        }
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len > 1 {
            Some(self.data[1])
        } else {
            None
        }
    }

    pub fn function_code_description(fc: u8) -> &'static str {
        ModbusFunction::from_u8(fc & !EXCEPTION_FLAG)
            .map(ModbusFunction::name)
            .unwrap_or("Unknown Function")
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for ModbusPdu {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ModbusPdu {}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    #[inline]
    pub fn function(mut self, function: ModbusFunction) -> ModbusResult<Self> {
        self.pdu.push(function.to_u8())?;
        Ok(self)
    }

    #[inline]
    pub fn word(mut self, value: u16) -> ModbusResult<Self> {
        self.pdu.push_u16(value)?;
        Ok(self)
    }

    #[inline]
    pub fn byte(mut self, b: u8) -> ModbusResult<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    #[inline]
    pub fn data(mut self, data: &[u8]) -> ModbusResult<Self> {
        self.pdu.extend(data)?;
        Ok(self)
    }

    /// Append a byte count followed by registers in big-endian
    pub fn registers(mut self, values: &[u16]) -> ModbusResult<Self> {
        let byte_count = u8::try_from(values.len() * 2)
            .map_err(|_| ModbusError::invalid_data("too many registers for one PDU"))?;
        self.pdu.push(byte_count)?;
        for &value in values {
            self.pdu.push_u16(value)?;
        }
        Ok(self)
    }

    /// Append a byte count followed by bits packed LSB-first
    pub fn bits(mut self, values: &[bool]) -> ModbusResult<Self> {
        let packed = pack_bits(values);
        let byte_count = u8::try_from(packed.len())
            .map_err(|_| ModbusError::invalid_data("too many bits for one PDU"))?;
        self.pdu.push(byte_count)?;
        self.pdu.extend(&packed)?;
        Ok(self)
    }

    #[inline]
    pub fn build(self) -> ModbusPdu {
        if let Some(fc) = self.pdu.function_code() {
            debug!(
                "PDU built: FC={:02X} ({}), total_len={}",
                fc,
                ModbusPdu::function_code_description(fc),
                self.pdu.len()
            );
        }
        self.pdu
    }
}

/// Pack bits 8 per byte, least significant bit first, final byte zero padded
pub fn pack_bits(values: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; values.len().div_ceil(8)];
    for (i, &value) in values.iter().enumerate() {
        if value {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack every bit of `bytes`, least significant bit first
pub fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).map(move |bit| byte & (1 << bit) != 0))
        .collect()
}

fn read_u16(payload: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([payload[offset], payload[offset + 1]])
}

fn coil_from_wire(value: u16) -> Option<bool> {
    match value {
        COIL_ON => Some(true),
        COIL_OFF => Some(false),
        _ => None,
    }
}

fn coil_to_wire(value: bool) -> u16 {
    if value {
        COIL_ON
    } else {
        COIL_OFF
    }
}

fn expect_len(function: ModbusFunction, payload: &[u8], len: usize) -> ModbusResult<()> {
    if payload.len() != len {
        return Err(ModbusError::frame(format!(
            "{}: expected {} payload bytes, got {}",
            function.name(),
            len,
            payload.len()
        )));
    }
    Ok(())
}

// ============================================================================
// Master side
// ============================================================================

/// Encode a request, rejecting out-of-range quantities before anything is built
pub fn encode_request(request: &ModbusRequest) -> ModbusResult<ModbusPdu> {
    request.validate()?;

    let builder = PduBuilder::new().function(request.function())?;
    let builder = match request {
        ModbusRequest::ReadCoils { address, quantity }
        | ModbusRequest::ReadDiscreteInputs { address, quantity }
        | ModbusRequest::ReadHoldingRegisters { address, quantity }
        | ModbusRequest::ReadInputRegisters { address, quantity } => {
            builder.word(*address)?.word(*quantity)?
        }
        ModbusRequest::WriteSingleCoil { address, value } => {
            builder.word(*address)?.word(coil_to_wire(*value))?
        }
        ModbusRequest::WriteSingleRegister { address, value } => {
            builder.word(*address)?.word(*value)?
        }
        ModbusRequest::WriteMultipleCoils { address, values } => builder
            .word(*address)?
            .word(values.len() as u16)?
            .bits(values)?,
        ModbusRequest::WriteMultipleRegisters { address, values } => builder
            .word(*address)?
            .word(values.len() as u16)?
            .registers(values)?,
    };

    Ok(builder.build())
}

/// Exception code carried by `pdu`, if it is an exception response
pub fn decode_exception(pdu: &ModbusPdu) -> Option<ExceptionCode> {
    pdu.exception_code().map(ExceptionCode::from_u8)
}

/// Decode a normal response payload (the bytes after the function code).
///
/// Bit reads return every bit of every data byte; callers truncate to the
/// quantity they asked for.
pub fn decode_response(function: ModbusFunction, payload: &[u8]) -> ModbusResult<ModbusResponse> {
    match function {
        ModbusFunction::ReadCoils
        | ModbusFunction::ReadDiscreteInputs
        | ModbusFunction::ReadHoldingRegisters
        | ModbusFunction::ReadInputRegisters => {
            let (&byte_count, data) = payload
                .split_first()
                .ok_or_else(|| ModbusError::frame(format!("{}: missing byte count", function.name())))?;
            expect_len(function, data, byte_count as usize)?;

            Ok(match function {
                ModbusFunction::ReadCoils => ModbusResponse::ReadCoils(unpack_bits(data)),
                ModbusFunction::ReadDiscreteInputs => {
                    ModbusResponse::ReadDiscreteInputs(unpack_bits(data))
                }
                _ => {
                    if data.len() % 2 != 0 {
                        return Err(ModbusError::frame(format!(
                            "{}: odd register byte count {}",
                            function.name(),
                            data.len()
                        )));
                    }
                    let registers = data
                        .chunks_exact(2)
                        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                        .collect();
                    if function == ModbusFunction::ReadHoldingRegisters {
                        ModbusResponse::ReadHoldingRegisters(registers)
                    } else {
                        ModbusResponse::ReadInputRegisters(registers)
                    }
                }
            })
        }
        ModbusFunction::WriteSingleCoil => {
            expect_len(function, payload, 4)?;
            let value = coil_from_wire(read_u16(payload, 2)).ok_or_else(|| {
                ModbusError::frame(format!(
                    "Write Single Coil: invalid echoed value 0x{:04X}",
                    read_u16(payload, 2)
                ))
            })?;
            Ok(ModbusResponse::WriteSingleCoil {
                address: read_u16(payload, 0),
                value,
            })
        }
        ModbusFunction::WriteSingleRegister => {
            expect_len(function, payload, 4)?;
            Ok(ModbusResponse::WriteSingleRegister {
                address: read_u16(payload, 0),
                value: read_u16(payload, 2),
            })
        }
        ModbusFunction::WriteMultipleCoils => {
            expect_len(function, payload, 4)?;
            Ok(ModbusResponse::WriteMultipleCoils {
                address: read_u16(payload, 0),
                quantity: read_u16(payload, 2),
            })
        }
        ModbusFunction::WriteMultipleRegisters => {
            expect_len(function, payload, 4)?;
            Ok(ModbusResponse::WriteMultipleRegisters {
                address: read_u16(payload, 0),
                quantity: read_u16(payload, 2),
            })
        }
    }
}

// ============================================================================
// Slave side
// ============================================================================

/// Decode an incoming request PDU.
///
/// Unknown function codes yield `InvalidFunction`, out-of-range quantities and
/// inconsistent byte counts yield `InvalidData`, truncated payloads `Frame`.
/// A range running past address 65535 decodes fine; the register context
/// rejects it.
pub fn decode_request(pdu: &ModbusPdu) -> ModbusResult<ModbusRequest> {
    let fc = pdu
        .function_code()
        .ok_or_else(|| ModbusError::frame("empty request PDU"))?;
    let function = ModbusFunction::from_u8(fc)?;
    let payload = pdu.payload();

    let request = match function {
        ModbusFunction::ReadCoils
        | ModbusFunction::ReadDiscreteInputs
        | ModbusFunction::ReadHoldingRegisters
        | ModbusFunction::ReadInputRegisters => {
            expect_len(function, payload, 4)?;
            let address = read_u16(payload, 0);
            let quantity = read_u16(payload, 2);
            match function {
                ModbusFunction::ReadCoils => ModbusRequest::ReadCoils { address, quantity },
                ModbusFunction::ReadDiscreteInputs => {
                    ModbusRequest::ReadDiscreteInputs { address, quantity }
                }
                ModbusFunction::ReadHoldingRegisters => {
                    ModbusRequest::ReadHoldingRegisters { address, quantity }
                }
                _ => ModbusRequest::ReadInputRegisters { address, quantity },
            }
        }
        ModbusFunction::WriteSingleCoil => {
            expect_len(function, payload, 4)?;
            let raw = read_u16(payload, 2);
            let value = coil_from_wire(raw).ok_or_else(|| {
                ModbusError::invalid_data(format!("Write Single Coil: invalid value 0x{:04X}", raw))
            })?;
            ModbusRequest::WriteSingleCoil {
                address: read_u16(payload, 0),
                value,
            }
        }
        ModbusFunction::WriteSingleRegister => {
            expect_len(function, payload, 4)?;
            ModbusRequest::WriteSingleRegister {
                address: read_u16(payload, 0),
                value: read_u16(payload, 2),
            }
        }
        ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters => {
            if payload.len() < 5 {
                return Err(ModbusError::frame(format!(
                    "{}: truncated header ({} bytes)",
                    function.name(),
                    payload.len()
                )));
            }
            let address = read_u16(payload, 0);
            let quantity = read_u16(payload, 2) as usize;
            let byte_count = payload[4] as usize;
            let data = &payload[5..];

            let (max, expected_bytes) = if function == ModbusFunction::WriteMultipleCoils {
                (MAX_WRITE_COILS, quantity.div_ceil(8))
            } else {
                (MAX_WRITE_REGISTERS, quantity * 2)
            };
            if quantity == 0 || quantity > max {
                return Err(ModbusError::invalid_data(format!(
                    "{}: quantity {} out of range 1..={}",
                    function.name(),
                    quantity,
                    max
                )));
            }
            if byte_count != expected_bytes {
                return Err(ModbusError::invalid_data(format!(
                    "{}: byte count {} does not match quantity {}",
                    function.name(),
                    byte_count,
                    quantity
                )));
            }
            expect_len(function, data, byte_count)?;

            if function == ModbusFunction::WriteMultipleCoils {
                let mut values = unpack_bits(data);
                values.truncate(quantity);
                ModbusRequest::WriteMultipleCoils { address, values }
            } else {
                let values = data
                    .chunks_exact(2)
                    .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                    .collect();
                ModbusRequest::WriteMultipleRegisters { address, values }
            }
        }
    };

    // Address overflow is left to the register context (Illegal Data Address)
    request.validate_quantity()?;
    Ok(request)
}

/// Encode a normal response
pub fn encode_response(response: &ModbusResponse) -> ModbusResult<ModbusPdu> {
    let builder = PduBuilder::new().function(response.function())?;
    let builder = match response {
        ModbusResponse::ReadCoils(bits) | ModbusResponse::ReadDiscreteInputs(bits) => {
            builder.bits(bits)?
        }
        ModbusResponse::ReadHoldingRegisters(values)
        | ModbusResponse::ReadInputRegisters(values) => builder.registers(values)?,
        ModbusResponse::WriteSingleCoil { address, value } => {
            builder.word(*address)?.word(coil_to_wire(*value))?
        }
        ModbusResponse::WriteSingleRegister { address, value } => {
            builder.word(*address)?.word(*value)?
        }
        ModbusResponse::WriteMultipleCoils { address, quantity }
        | ModbusResponse::WriteMultipleRegisters { address, quantity } => {
            builder.word(*address)?.word(*quantity)?
        }
    };
    Ok(builder.build())
}

/// Encode an exception response for `function_code` (exception bit is added here)
pub fn encode_exception(function_code: u8, code: ExceptionCode) -> ModbusPdu {
    ModbusPdu::exception(function_code, code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdu(bytes: &[u8]) -> ModbusPdu {
        ModbusPdu::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_pdu_basic_operations() {
        let mut pdu = ModbusPdu::new();
        assert!(pdu.is_empty());

        pdu.push(0x03).unwrap();
        assert_eq!(pdu.function_code(), Some(0x03));
        assert!(!pdu.is_exception());

        pdu.push_u16(0x0100).unwrap();
        pdu.push_u16(0x000A).unwrap();

        assert_eq!(pdu.len(), 5);
        assert_eq!(pdu.as_slice(), &[0x03, 0x01, 0x00, 0x00, 0x0A]);
        assert_eq!(pdu.payload(), &[0x01, 0x00, 0x00, 0x0A]);
    }

    #[test]
    fn test_pdu_capacity() {
        let mut pdu = ModbusPdu::new();
        pdu.extend(&[0u8; MAX_PDU_SIZE]).unwrap();
        assert!(pdu.push(0).is_err());
        assert!(ModbusPdu::from_slice(&[0u8; MAX_PDU_SIZE + 1]).is_err());
    }

    #[test]
    fn test_encode_read_request() {
        let pdu = encode_request(&ModbusRequest::ReadHoldingRegisters {
            address: 0x006B,
            quantity: 3,
        })
        .unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x6B, 0x00, 0x03]);
    }

    #[test]
    fn test_encode_write_single_coil() {
        let pdu = encode_request(&ModbusRequest::WriteSingleCoil {
            address: 0x00AC,
            value: true,
        })
        .unwrap();
        assert_eq!(pdu.as_slice(), &[0x05, 0x00, 0xAC, 0xFF, 0x00]);
    }

    #[test]
    fn test_encode_write_multiple_coils_packing() {
        // 10 coils: 1011 0011 10 -> 0xCD 0x01 (LSB first)
        let values = [
            true, false, true, true, false, false, true, true, true, false,
        ];
        let pdu = encode_request(&ModbusRequest::WriteMultipleCoils {
            address: 0x0013,
            values: values.to_vec(),
        })
        .unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01]
        );
    }

    #[test]
    fn test_encode_write_multiple_registers() {
        let pdu = encode_request(&ModbusRequest::WriteMultipleRegisters {
            address: 0x0001,
            values: vec![0x000A, 0x0102],
        })
        .unwrap();
        assert_eq!(
            pdu.as_slice(),
            &[0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );
    }

    #[test]
    fn test_encode_rejects_bad_quantity() {
        let err = encode_request(&ModbusRequest::ReadHoldingRegisters {
            address: 0,
            quantity: 126,
        })
        .unwrap_err();
        assert!(matches!(err, ModbusError::InvalidData { .. }));
    }

    #[test]
    fn test_decode_read_coils_returns_all_bits() {
        let response = decode_response(ModbusFunction::ReadCoils, &[0x01, 0x05]).unwrap();
        assert_eq!(
            response,
            ModbusResponse::ReadCoils(vec![true, false, true, false, false, false, false, false])
        );
    }

    #[test]
    fn test_decode_registers() {
        let response =
            decode_response(ModbusFunction::ReadInputRegisters, &[0x04, 0x12, 0x34, 0x00, 0x01])
                .unwrap();
        assert_eq!(response, ModbusResponse::ReadInputRegisters(vec![0x1234, 0x0001]));
    }

    #[test]
    fn test_decode_truncated_response_is_frame_error() {
        let err = decode_response(ModbusFunction::ReadHoldingRegisters, &[0x04, 0x00, 0x01])
            .unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));

        let err = decode_response(ModbusFunction::WriteSingleRegister, &[0x00]).unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));

        let err = decode_response(ModbusFunction::ReadCoils, &[]).unwrap_err();
        assert!(matches!(err, ModbusError::Frame { .. }));
    }

    #[test]
    fn test_decode_exception() {
        let exception = pdu(&[0x83, 0x02]);
        assert_eq!(decode_exception(&exception), Some(ExceptionCode::IllegalDataAddress));
        assert_eq!(decode_exception(&pdu(&[0x03, 0x02, 0x00, 0x01])), None);
    }

    #[test]
    fn test_decode_request_write_multiple_coils() {
        let request = decode_request(&pdu(&[0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0xCD, 0x01])).unwrap();
        assert_eq!(
            request,
            ModbusRequest::WriteMultipleCoils {
                address: 0x13,
                values: vec![true, false, true, true, false, false, true, true, true, false],
            }
        );
    }

    #[test]
    fn test_decode_request_errors() {
        assert!(matches!(
            decode_request(&pdu(&[0x2B, 0x0E, 0x01, 0x00])),
            Err(ModbusError::InvalidFunction { code: 0x2B })
        ));
        assert!(matches!(
            decode_request(&pdu(&[0x03, 0x00, 0x00, 0x00, 0x7E])),
            Err(ModbusError::InvalidData { .. })
        ));
        assert!(matches!(
            decode_request(&pdu(&[0x03, 0x00, 0x00])),
            Err(ModbusError::Frame { .. })
        ));
        assert!(matches!(
            decode_request(&pdu(&[0x05, 0x00, 0x01, 0x12, 0x34])),
            Err(ModbusError::InvalidData { .. })
        ));
        // Byte count disagrees with quantity
        assert!(matches!(
            decode_request(&pdu(&[0x10, 0x00, 0x00, 0x00, 0x02, 0x02, 0x00, 0x01])),
            Err(ModbusError::InvalidData { .. })
        ));
        // Byte count right but data cut short
        assert!(matches!(
            decode_request(&pdu(&[0x10, 0x00, 0x00, 0x00, 0x02, 0x04, 0x00, 0x01])),
            Err(ModbusError::Frame { .. })
        ));
        assert!(matches!(
            decode_request(&ModbusPdu::new()),
            Err(ModbusError::Frame { .. })
        ));
    }

    #[test]
    fn test_decode_request_keeps_address_overflow_for_the_context() {
        let request = decode_request(&pdu(&[0x03, 0xFF, 0xFF, 0x00, 0x02])).unwrap();
        assert_eq!(
            request,
            ModbusRequest::ReadHoldingRegisters { address: 0xFFFF, quantity: 2 }
        );
        // The master still refuses to send it
        assert!(encode_request(&request).is_err());
    }

    #[test]
    fn test_encode_response_read_coils_pads_final_byte() {
        let pdu = encode_response(&ModbusResponse::ReadCoils(vec![true, false, true])).unwrap();
        assert_eq!(pdu.as_slice(), &[0x01, 0x01, 0x05]);
    }

    #[test]
    fn test_encode_response_write_echo() {
        let pdu = encode_response(&ModbusResponse::WriteSingleCoil {
            address: 7,
            value: false,
        })
        .unwrap();
        assert_eq!(pdu.as_slice(), &[0x05, 0x00, 0x07, 0x00, 0x00]);
    }

    #[test]
    fn test_encode_exception() {
        let pdu = encode_exception(0x03, ExceptionCode::IllegalDataAddress);
        assert_eq!(pdu.as_slice(), &[0x83, 0x02]);
        assert!(pdu.is_exception());
    }

    #[test]
    fn test_request_survives_slave_decode() {
        let request = ModbusRequest::WriteMultipleRegisters {
            address: 100,
            values: vec![1, 2, 3, 0xFFFF],
        };
        let pdu = encode_request(&request).unwrap();
        assert_eq!(decode_request(&pdu).unwrap(), request);
    }
}
