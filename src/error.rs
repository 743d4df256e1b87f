//! Error types for the Modbus engine
//!
//! One error enum covers local validation, transport failures, framing
//! problems, protocol exceptions reported by a slave, and timeouts.

use thiserror::Error;

use crate::protocol::ExceptionCode;

/// Result type used throughout the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

#[derive(Error, Debug)]
pub enum ModbusError {
    /// Caller-side argument out of range, or a request/response whose
    /// contents are well framed but not acceptable
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Function code this engine does not implement
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport closed or unusable
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Truncated or malformed frame
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Exception response received from a slave
    #[error("Modbus exception: function 0x{function:02X}, code {code}")]
    Exception { function: u8, code: ExceptionCode },

    #[error("Timeout: {operation} did not complete within {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Well formed but unexpected reply
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Register context lookup outside every configured range
    #[error("Illegal data address: {address} (count {count})")]
    IllegalDataAddress { address: u16, count: usize },
}

impl ModbusError {
    pub fn invalid_data(message: impl Into<String>) -> Self {
        ModbusError::InvalidData {
            message: message.into(),
        }
    }

    pub fn invalid_function(code: u8) -> Self {
        ModbusError::InvalidFunction { code }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        ModbusError::Connection {
            message: message.into(),
        }
    }

    pub fn frame(message: impl Into<String>) -> Self {
        ModbusError::Frame {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        ModbusError::Protocol {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ModbusError::Configuration {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        ModbusError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn exception(function: u8, code: ExceptionCode) -> Self {
        ModbusError::Exception { function, code }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ModbusError::Timeout { .. })
    }

    /// Whether the same request may succeed if sent again on this transport.
    ///
    /// Only timeouts qualify: exceptions are the slave's answer and
    /// transport or framing failures leave the link unusable.
    pub fn is_recoverable(&self) -> bool {
        self.is_timeout()
    }

    /// Exception code a slave answers with when processing fails with `self`
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            ModbusError::InvalidFunction { .. } => ExceptionCode::IllegalFunction,
            ModbusError::IllegalDataAddress { .. } => ExceptionCode::IllegalDataAddress,
            ModbusError::InvalidData { .. } | ModbusError::Frame { .. } => {
                ExceptionCode::IllegalDataValue
            }
            ModbusError::Exception { code, .. } => *code,
            _ => ExceptionCode::ServerDeviceFailure,
        }
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        ModbusError::configuration(format!("JSON error: {}", err))
    }
}
