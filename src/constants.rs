//! Modbus protocol constants
//!
//! Frame limits follow the Modbus application protocol:
//! - Maximum PDU size: 253 bytes (RS485 ADU limit of 256 bytes minus address and CRC)
//! - Register/coil limits are calculated to fit within the PDU size constraint

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Modbus MBAP header length for TCP
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes
pub const MBAP_HEADER_LEN: usize = 7;

/// Maximum PDU (Protocol Data Unit) size
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum MBAP length field value a conforming peer sends (Unit ID + PDU)
/// = 1 (Unit ID) + 253 (Max PDU) = 254 bytes
pub const MAX_MBAP_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Smallest usable MBAP length field value: Unit ID + function code
pub const MIN_MBAP_LENGTH: usize = 2;

/// Largest TCP ADU: 7-byte header (which includes the unit id) + 253-byte PDU
pub const MAX_TCP_ADU_SIZE: usize = MBAP_HEADER_LEN + MAX_PDU_SIZE;

/// Largest RTU ADU: address + PDU + CRC
pub const MAX_RTU_ADU_SIZE: usize = 1 + MAX_PDU_SIZE + 2;

/// Smallest RTU ADU: address + function code + CRC
pub const MIN_RTU_ADU_SIZE: usize = 4;

/// Size of the Modbus address space per register bank
pub const ADDRESS_SPACE: usize = 65536;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03/FC04 (Read Holding/Input Registers)
///
/// Response PDU: 1 (fc) + 1 (byte count) + N × 2 ≤ 253, so N ≤ 125
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum number of registers for FC16 (Write Multiple Registers)
///
/// Request PDU: 1 + 2 + 2 + 1 + N × 2 ≤ 253, so N ≤ 123
pub const MAX_WRITE_REGISTERS: usize = 123;

// ============================================================================
// Coil Operation Limits
// ============================================================================

/// Maximum number of coils for FC01/FC02 (Read Coils/Discrete Inputs)
pub const MAX_READ_COILS: usize = 2000;

/// Maximum number of coils for FC15 (Write Multiple Coils)
pub const MAX_WRITE_COILS: usize = 1968;

/// Wire value of an ON coil in FC05
pub const COIL_ON: u16 = 0xFF00;

/// Wire value of an OFF coil in FC05
pub const COIL_OFF: u16 = 0x0000;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Coils (FC01)
pub const FC_READ_COILS: u8 = 0x01;

/// Read Discrete Inputs (FC02)
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Coil (FC05)
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Write Multiple Coils (FC15)
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// High bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Server Device Failure
pub const EXCEPTION_SERVER_DEVICE_FAILURE: u8 = 0x04;

/// Acknowledge
pub const EXCEPTION_ACKNOWLEDGE: u8 = 0x05;

/// Server Device Busy
pub const EXCEPTION_SERVER_DEVICE_BUSY: u8 = 0x06;

/// Memory Parity Error
pub const EXCEPTION_MEMORY_PARITY_ERROR: u8 = 0x08;

/// Gateway Path Unavailable
pub const EXCEPTION_GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;

/// Gateway Target Device Failed to Respond
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;

// ============================================================================
// Defaults
// ============================================================================

/// Default per-request deadline for the master
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Registered Modbus TCP port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default serial line speed
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Bits per RTU character: start + 8 data + parity/stop + stop
pub const RTU_BITS_PER_CHAR: u32 = 11;

/// Inter-frame silence used above 19200 baud, in microseconds
pub const RTU_MIN_SILENCE_US: u64 = 1750;
