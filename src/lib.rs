//! # Modbus Stack - Async Modbus RTU/TCP master and slave engine
//!
//! A Modbus protocol engine built on Tokio. It covers both sides of the wire:
//! a master that issues requests and matches replies, and a slave that serves
//! a register map to any number of masters.
//!
//! ## Features
//!
//! - **Two transports**: RTU framing by inter-frame silence with CRC-16, and
//!   TCP framing by MBAP header
//! - **Stack-allocated PDU**: fixed 253-byte buffer, no allocation per frame
//! - **Register context**: four sparse address spaces loaded from JSON
//! - **Slave callbacks**: per function code hooks that run after a request is applied
//! - **Retry and statistics**: per-transport counters, retry on timeout
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Slave |
//! |------|----------|--------|-------|
//! | 0x01 | Read Coils | ✅ | ✅ |
//! | 0x02 | Read Discrete Inputs | ✅ | ✅ |
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x04 | Read Input Registers | ✅ | ✅ |
//! | 0x05 | Write Single Coil | ✅ | ✅ |
//! | 0x06 | Write Single Register | ✅ | ✅ |
//! | 0x0F | Write Multiple Coils | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbus_stack::{ModbusClient, ModbusResult, ModbusTcpClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let mut client = ModbusTcpClient::from_address("127.0.0.1:502", Duration::from_secs(1)).await?;
//!
//!     let values = client.read_03(1, 0, 10).await?;
//!     println!("Read registers: {:?}", values);
//!
//!     client.write_06(1, 100, 0x1234).await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Serving registers
//!
//! ```rust,no_run
//! use modbus_stack::{ModbusResult, ModbusTcpServer, RegisterContext};
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let context = RegisterContext::from_json_str(
//!         r#"{"holding_registers": [{"start_address": 0, "value": [1, 2, 3]}]}"#,
//!     )?
//!     .into_shared();
//!
//!     let server = ModbusTcpServer::bind("0.0.0.0:502", context).await?;
//!     server.run().await
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants based on official specification
pub mod constants;

/// CRC-16/MODBUS checksum
pub mod crc;

/// Modbus protocol definitions and message handling
pub mod protocol;

/// Stack-allocated PDU and request/response codec
pub mod pdu;

/// RTU framing by inter-frame silence
pub mod rtu;

/// TCP framing by MBAP header
pub mod tcp;

/// Register maps served by a slave
pub mod context;

/// JSON configuration for register maps, masters and slaves
pub mod config;

/// Logging system for the library
pub mod logging;

/// Master transports for TCP and RTU
pub mod transport;

/// Modbus master implementations
pub mod client;

/// Modbus slave implementations
pub mod server;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use tokio;

// === Master API ===
pub use client::{GenericModbusClient, ModbusClient, ModbusRtuClient, ModbusTcpClient};
pub use transport::{ModbusTransport, RtuTransport, TcpTransport, TransportStats};

// === Slave API ===
pub use context::{RegisterBank, RegisterContext, RegisterKind, SharedContext};
pub use server::{
    ModbusRtuServer, ModbusTcpServer, RequestHandler, ServerStats, SlaveCallback, SlaveEvent,
};

// === Configuration ===
pub use config::{
    MasterConfig, RegisterContextConfig, RegisterEntry, RetryPolicy, RtuSlaveConfig,
    TcpSlaveConfig,
};

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Core types ===
pub use protocol::{
    ExceptionCode, ModbusFunction, ModbusRequest, ModbusResponse, SlaveId, BROADCAST_SLAVE_ID,
};

// === Framing (advanced usage) ===
pub use pdu::{ModbusPdu, PduBuilder};
pub use rtu::RtuFramer;
pub use tcp::{MbapHeader, TcpFramer};

// === Protocol limits (commonly needed constants) ===
pub use constants::{
    DEFAULT_TCP_PORT, DEFAULT_TIMEOUT_MS, MAX_PDU_SIZE, MAX_READ_COILS, MAX_READ_REGISTERS,
    MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};

// === Logging ===
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Modbus Stack v{} - async Modbus RTU/TCP master and slave", VERSION)
}
