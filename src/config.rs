//! Serde configuration for masters, slaves and the register context
//!
//! Every struct deserializes from JSON with sensible defaults for missing
//! fields, so an empty object `{}` is always a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::SlaveId;
use crate::rtu::silence_for_baud;

// ============================================================================
// Register context
// ============================================================================

/// One configured value: a boolean or an integer.
///
/// Booleans in register banks become 0/1; integers in bit banks are true
/// when non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
}

impl ConfigValue {
    pub fn as_bit(self) -> bool {
        match self {
            ConfigValue::Bool(b) => b,
            ConfigValue::Int(i) => i != 0,
        }
    }

    /// Register value; negative values down to -32768 are stored as two's complement
    pub fn as_register(self) -> ModbusResult<u16> {
        match self {
            ConfigValue::Bool(b) => Ok(b as u16),
            ConfigValue::Int(i) if (0..=u16::MAX as i64).contains(&i) => Ok(i as u16),
            ConfigValue::Int(i) if (i16::MIN as i64..0).contains(&i) => Ok(i as i16 as u16),
            ConfigValue::Int(i) => Err(ModbusError::configuration(format!(
                "value {} does not fit in a 16-bit register",
                i
            ))),
        }
    }
}

/// Initial value(s) of an entry: a scalar for a single address or a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValues {
    Single(ConfigValue),
    List(Vec<ConfigValue>),
}

impl Default for RegisterValues {
    fn default() -> Self {
        RegisterValues::Single(ConfigValue::Int(0))
    }
}

impl RegisterValues {
    pub fn as_slice(&self) -> &[ConfigValue] {
        match self {
            RegisterValues::Single(value) => std::slice::from_ref(value),
            RegisterValues::List(values) => values,
        }
    }
}

/// A contiguous run of addresses in one bank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterEntry {
    #[serde(alias = "register")]
    pub start_address: u16,
    /// `val` and `initial_values` are accepted for older configurations
    #[serde(default, alias = "val", alias = "initial_values")]
    pub value: RegisterValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Engineering range `[min, max]`, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl RegisterEntry {
    pub fn new(start_address: u16, values: Vec<ConfigValue>) -> Self {
        Self {
            start_address,
            value: RegisterValues::List(values),
            description: None,
            range: None,
            unit: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn len(&self) -> usize {
        self.value.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, address: u16) -> bool {
        let start = self.start_address as usize;
        (start..start + self.len()).contains(&(address as usize))
    }
}

/// Declarative description of the four register banks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisterContextConfig {
    #[serde(default, alias = "coil")]
    pub coils: Vec<RegisterEntry>,
    #[serde(default, alias = "discrete_input")]
    pub discrete_inputs: Vec<RegisterEntry>,
    #[serde(default, alias = "holding_register")]
    pub holding_registers: Vec<RegisterEntry>,
    #[serde(default, alias = "input_register")]
    pub input_registers: Vec<RegisterEntry>,
}

impl RegisterContextConfig {
    pub fn from_json_str(json: &str) -> ModbusResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ModbusResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }
}

// ============================================================================
// Master
// ============================================================================

/// Retry behaviour for master requests. Only timeouts are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    #[serde(default)]
    pub max_retries: u32,
    /// Pause between attempts
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

fn default_retry_delay_ms() -> u64 {
    100
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay_ms: default_retry_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Per-request deadline
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Log every frame sent and received as hex
    #[serde(default)]
    pub log_packets: bool,
    /// RTU line speed; sets the inter-frame silence
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Explicit RTU inter-frame silence, overriding the baud-rate derived value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silence_us: Option<u64>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry: RetryPolicy::default(),
            log_packets: false,
            baud_rate: DEFAULT_BAUD_RATE,
            silence_us: None,
        }
    }
}

impl MasterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn silence(&self) -> Duration {
        self.silence_us
            .map(Duration::from_micros)
            .unwrap_or_else(|| silence_for_baud(self.baud_rate))
    }
}

// ============================================================================
// Slaves
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtuSlaveConfig {
    #[serde(default = "default_device_address")]
    pub device_address: SlaveId,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silence_us: Option<u64>,
    #[serde(default)]
    pub log_packets: bool,
}

fn default_device_address() -> SlaveId {
    1
}

impl Default for RtuSlaveConfig {
    fn default() -> Self {
        Self {
            device_address: default_device_address(),
            baud_rate: DEFAULT_BAUD_RATE,
            silence_us: None,
            log_packets: false,
        }
    }
}

impl RtuSlaveConfig {
    pub fn silence(&self) -> Duration {
        self.silence_us
            .map(Duration::from_micros)
            .unwrap_or_else(|| silence_for_baud(self.baud_rate))
    }

    pub fn validate(&self) -> ModbusResult<()> {
        if self.device_address == 0 || self.device_address > 247 {
            return Err(ModbusError::configuration(format!(
                "device address {} outside 1..=247",
                self.device_address
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpSlaveConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Connections beyond this wait in the accept backlog
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub log_packets: bool,
}

fn default_bind_address() -> String {
    format!("0.0.0.0:{}", DEFAULT_TCP_PORT)
}

fn default_max_connections() -> usize {
    100
}

impl Default for TcpSlaveConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_connections: default_max_connections(),
            log_packets: false,
        }
    }
}
