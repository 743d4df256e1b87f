//! Modbus protocol definitions
//!
//! Typed views of the eight supported function codes. A [`ModbusRequest`] is
//! what a master sends and a slave decodes; a [`ModbusResponse`] is the
//! normal (non-exception) reply. Both are independent of transport framing;
//! see [`crate::pdu`] for their byte encodings.

use std::fmt;

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};

/// Modbus unit identifier (slave address). 0 is the RTU broadcast address.
pub type SlaveId = u8;

/// RTU broadcast address
pub const BROADCAST_SLAVE_ID: SlaveId = 0;

/// Supported Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusFunction {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
}

impl ModbusFunction {
    /// All supported functions, in function code order
    pub const ALL: [ModbusFunction; 8] = [
        ModbusFunction::ReadCoils,
        ModbusFunction::ReadDiscreteInputs,
        ModbusFunction::ReadHoldingRegisters,
        ModbusFunction::ReadInputRegisters,
        ModbusFunction::WriteSingleCoil,
        ModbusFunction::WriteSingleRegister,
        ModbusFunction::WriteMultipleCoils,
        ModbusFunction::WriteMultipleRegisters,
    ];

    /// Wire function code
    pub fn to_u8(self) -> u8 {
        match self {
            ModbusFunction::ReadCoils => FC_READ_COILS,
            ModbusFunction::ReadDiscreteInputs => FC_READ_DISCRETE_INPUTS,
            ModbusFunction::ReadHoldingRegisters => FC_READ_HOLDING_REGISTERS,
            ModbusFunction::ReadInputRegisters => FC_READ_INPUT_REGISTERS,
            ModbusFunction::WriteSingleCoil => FC_WRITE_SINGLE_COIL,
            ModbusFunction::WriteSingleRegister => FC_WRITE_SINGLE_REGISTER,
            ModbusFunction::WriteMultipleCoils => FC_WRITE_MULTIPLE_COILS,
            ModbusFunction::WriteMultipleRegisters => FC_WRITE_MULTIPLE_REGISTERS,
        }
    }

    /// Parse a wire function code (exception bit must already be stripped)
    pub fn from_u8(code: u8) -> ModbusResult<Self> {
        match code {
            FC_READ_COILS => Ok(ModbusFunction::ReadCoils),
            FC_READ_DISCRETE_INPUTS => Ok(ModbusFunction::ReadDiscreteInputs),
            FC_READ_HOLDING_REGISTERS => Ok(ModbusFunction::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Ok(ModbusFunction::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Ok(ModbusFunction::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Ok(ModbusFunction::WriteSingleRegister),
            FC_WRITE_MULTIPLE_COILS => Ok(ModbusFunction::WriteMultipleCoils),
            FC_WRITE_MULTIPLE_REGISTERS => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(code)),
        }
    }

    /// True for the four read functions
    pub fn is_read(self) -> bool {
        matches!(
            self,
            ModbusFunction::ReadCoils
                | ModbusFunction::ReadDiscreteInputs
                | ModbusFunction::ReadHoldingRegisters
                | ModbusFunction::ReadInputRegisters
        )
    }

    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.to_u8())
    }
}

/// Modbus exception codes carried by exception responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailed,
    /// A code outside the standard set; kept so the master can still report it
    Other(u8),
}

impl ExceptionCode {
    pub fn to_u8(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => EXCEPTION_ILLEGAL_FUNCTION,
            ExceptionCode::IllegalDataAddress => EXCEPTION_ILLEGAL_DATA_ADDRESS,
            ExceptionCode::IllegalDataValue => EXCEPTION_ILLEGAL_DATA_VALUE,
            ExceptionCode::ServerDeviceFailure => EXCEPTION_SERVER_DEVICE_FAILURE,
            ExceptionCode::Acknowledge => EXCEPTION_ACKNOWLEDGE,
            ExceptionCode::ServerDeviceBusy => EXCEPTION_SERVER_DEVICE_BUSY,
            ExceptionCode::MemoryParityError => EXCEPTION_MEMORY_PARITY_ERROR,
            ExceptionCode::GatewayPathUnavailable => EXCEPTION_GATEWAY_PATH_UNAVAILABLE,
            ExceptionCode::GatewayTargetFailed => EXCEPTION_GATEWAY_TARGET_FAILED,
            ExceptionCode::Other(code) => code,
        }
    }

    pub fn from_u8(code: u8) -> Self {
        match code {
            EXCEPTION_ILLEGAL_FUNCTION => ExceptionCode::IllegalFunction,
            EXCEPTION_ILLEGAL_DATA_ADDRESS => ExceptionCode::IllegalDataAddress,
            EXCEPTION_ILLEGAL_DATA_VALUE => ExceptionCode::IllegalDataValue,
            EXCEPTION_SERVER_DEVICE_FAILURE => ExceptionCode::ServerDeviceFailure,
            EXCEPTION_ACKNOWLEDGE => ExceptionCode::Acknowledge,
            EXCEPTION_SERVER_DEVICE_BUSY => ExceptionCode::ServerDeviceBusy,
            EXCEPTION_MEMORY_PARITY_ERROR => ExceptionCode::MemoryParityError,
            EXCEPTION_GATEWAY_PATH_UNAVAILABLE => ExceptionCode::GatewayPathUnavailable,
            EXCEPTION_GATEWAY_TARGET_FAILED => ExceptionCode::GatewayTargetFailed,
            other => ExceptionCode::Other(other),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Illegal Function",
            ExceptionCode::IllegalDataAddress => "Illegal Data Address",
            ExceptionCode::IllegalDataValue => "Illegal Data Value",
            ExceptionCode::ServerDeviceFailure => "Server Device Failure",
            ExceptionCode::Acknowledge => "Acknowledge",
            ExceptionCode::ServerDeviceBusy => "Server Device Busy",
            ExceptionCode::MemoryParityError => "Memory Parity Error",
            ExceptionCode::GatewayPathUnavailable => "Gateway Path Unavailable",
            ExceptionCode::GatewayTargetFailed => "Gateway Target Device Failed to Respond",
            ExceptionCode::Other(_) => "Unknown Exception",
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} ({})", self.to_u8(), self.description())
    }
}

/// A Modbus request, one variant per function code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusRequest {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl ModbusRequest {
    pub fn function(&self) -> ModbusFunction {
        match self {
            ModbusRequest::ReadCoils { .. } => ModbusFunction::ReadCoils,
            ModbusRequest::ReadDiscreteInputs { .. } => ModbusFunction::ReadDiscreteInputs,
            ModbusRequest::ReadHoldingRegisters { .. } => ModbusFunction::ReadHoldingRegisters,
            ModbusRequest::ReadInputRegisters { .. } => ModbusFunction::ReadInputRegisters,
            ModbusRequest::WriteSingleCoil { .. } => ModbusFunction::WriteSingleCoil,
            ModbusRequest::WriteSingleRegister { .. } => ModbusFunction::WriteSingleRegister,
            ModbusRequest::WriteMultipleCoils { .. } => ModbusFunction::WriteMultipleCoils,
            ModbusRequest::WriteMultipleRegisters { .. } => ModbusFunction::WriteMultipleRegisters,
        }
    }

    /// Starting address of the request
    pub fn address(&self) -> u16 {
        match *self {
            ModbusRequest::ReadCoils { address, .. }
            | ModbusRequest::ReadDiscreteInputs { address, .. }
            | ModbusRequest::ReadHoldingRegisters { address, .. }
            | ModbusRequest::ReadInputRegisters { address, .. }
            | ModbusRequest::WriteSingleCoil { address, .. }
            | ModbusRequest::WriteSingleRegister { address, .. }
            | ModbusRequest::WriteMultipleCoils { address, .. }
            | ModbusRequest::WriteMultipleRegisters { address, .. } => address,
        }
    }

    /// Number of coils/registers addressed
    pub fn quantity(&self) -> u16 {
        match self {
            ModbusRequest::ReadCoils { quantity, .. }
            | ModbusRequest::ReadDiscreteInputs { quantity, .. }
            | ModbusRequest::ReadHoldingRegisters { quantity, .. }
            | ModbusRequest::ReadInputRegisters { quantity, .. } => *quantity,
            ModbusRequest::WriteSingleCoil { .. } | ModbusRequest::WriteSingleRegister { .. } => 1,
            ModbusRequest::WriteMultipleCoils { values, .. } => values.len() as u16,
            ModbusRequest::WriteMultipleRegisters { values, .. } => values.len() as u16,
        }
    }

    /// Check quantity limits and address overflow.
    ///
    /// Violations are caller mistakes and never reach the wire.
    pub fn validate(&self) -> ModbusResult<()> {
        let quantity = self.validate_quantity()?;
        if self.address() as usize + quantity > ADDRESS_SPACE {
            return Err(ModbusError::invalid_data(format!(
                "{}: address {} + quantity {} exceeds address space",
                self.function().name(),
                self.address(),
                quantity
            )));
        }
        Ok(())
    }

    /// Check the quantity against the function's limits and return it.
    ///
    /// A slave uses this alone: a range running past 65535 is an address
    /// problem, answered by the register context with Illegal Data Address.
    pub fn validate_quantity(&self) -> ModbusResult<usize> {
        let (quantity, max) = match self {
            ModbusRequest::ReadCoils { quantity, .. }
            | ModbusRequest::ReadDiscreteInputs { quantity, .. } => (*quantity as usize, MAX_READ_COILS),
            ModbusRequest::ReadHoldingRegisters { quantity, .. }
            | ModbusRequest::ReadInputRegisters { quantity, .. } => {
                (*quantity as usize, MAX_READ_REGISTERS)
            }
            ModbusRequest::WriteSingleCoil { .. } | ModbusRequest::WriteSingleRegister { .. } => {
                return Ok(1)
            }
            ModbusRequest::WriteMultipleCoils { values, .. } => (values.len(), MAX_WRITE_COILS),
            ModbusRequest::WriteMultipleRegisters { values, .. } => {
                (values.len(), MAX_WRITE_REGISTERS)
            }
        };

        if quantity == 0 || quantity > max {
            return Err(ModbusError::invalid_data(format!(
                "{}: quantity {} out of range 1..={}",
                self.function().name(),
                quantity,
                max
            )));
        }
        Ok(quantity)
    }
}

/// A normal (non-exception) Modbus response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusResponse {
    /// Decoded from the wire this holds every packed bit, a multiple of 8;
    /// the master trims it to the requested quantity
    ReadCoils(Vec<bool>),
    ReadDiscreteInputs(Vec<bool>),
    ReadHoldingRegisters(Vec<u16>),
    ReadInputRegisters(Vec<u16>),
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, quantity: u16 },
    WriteMultipleRegisters { address: u16, quantity: u16 },
}

impl ModbusResponse {
    pub fn function(&self) -> ModbusFunction {
        match self {
            ModbusResponse::ReadCoils(_) => ModbusFunction::ReadCoils,
            ModbusResponse::ReadDiscreteInputs(_) => ModbusFunction::ReadDiscreteInputs,
            ModbusResponse::ReadHoldingRegisters(_) => ModbusFunction::ReadHoldingRegisters,
            ModbusResponse::ReadInputRegisters(_) => ModbusFunction::ReadInputRegisters,
            ModbusResponse::WriteSingleCoil { .. } => ModbusFunction::WriteSingleCoil,
            ModbusResponse::WriteSingleRegister { .. } => ModbusFunction::WriteSingleRegister,
            ModbusResponse::WriteMultipleCoils { .. } => ModbusFunction::WriteMultipleCoils,
            ModbusResponse::WriteMultipleRegisters { .. } => ModbusFunction::WriteMultipleRegisters,
        }
    }

    /// The response a slave would give to `request` if it succeeded.
    ///
    /// Used by the master for RTU broadcasts, which are never answered.
    pub fn echo_of(request: &ModbusRequest) -> Option<Self> {
        match request {
            ModbusRequest::WriteSingleCoil { address, value } => Some(ModbusResponse::WriteSingleCoil {
                address: *address,
                value: *value,
            }),
            ModbusRequest::WriteSingleRegister { address, value } => {
                Some(ModbusResponse::WriteSingleRegister {
                    address: *address,
                    value: *value,
                })
            }
            ModbusRequest::WriteMultipleCoils { address, values } => {
                Some(ModbusResponse::WriteMultipleCoils {
                    address: *address,
                    quantity: values.len() as u16,
                })
            }
            ModbusRequest::WriteMultipleRegisters { address, values } => {
                Some(ModbusResponse::WriteMultipleRegisters {
                    address: *address,
                    quantity: values.len() as u16,
                })
            }
            _ => None,
        }
    }
}
