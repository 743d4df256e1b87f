//! Request and packet logging
//!
//! Library code logs through `tracing`. Applications that do not install a
//! tracing subscriber can hand a [`CallbackLogger`] to a client or slave and
//! receive the same lines through a plain closure.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        };
        f.write_str(name)
    }
}

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    Disabled,
    /// Forward to `tracing` macros
    Tracing,
    /// Forward to the user callback
    Callback,
}

pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<LogCallback>,
    level: LogLevel,
    mode: LoggingMode,
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self {
            callback: None,
            level: LogLevel::Info,
            mode: LoggingMode::Tracing,
        }
    }
}

impl fmt::Debug for CallbackLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackLogger")
            .field("level", &self.level)
            .field("mode", &self.mode)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

impl CallbackLogger {
    /// Deliver lines at or above `level` to `callback`
    pub fn new<F>(callback: F, level: LogLevel) -> Self
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
            level,
            mode: LoggingMode::Callback,
        }
    }

    pub fn tracing(level: LogLevel) -> Self {
        Self {
            callback: None,
            level,
            mode: LoggingMode::Tracing,
        }
    }

    pub fn disabled() -> Self {
        Self {
            callback: None,
            level: LogLevel::Error,
            mode: LoggingMode::Disabled,
        }
    }

    pub fn mode(&self) -> LoggingMode {
        self.mode
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.mode != LoggingMode::Disabled && level <= self.level
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if !self.enabled(level) {
            return;
        }
        match self.mode {
            LoggingMode::Disabled => {}
            LoggingMode::Tracing => match level {
                LogLevel::Error => error!("{}", message),
                LogLevel::Warn => warn!("{}", message),
                LogLevel::Info => info!("{}", message),
                LogLevel::Debug => debug!("{}", message),
                LogLevel::Trace => trace!("{}", message),
            },
            LoggingMode::Callback => {
                if let Some(callback) = &self.callback {
                    callback(level, message);
                }
            }
        }
    }

    pub fn log_request(&self, slave_id: u8, function_code: u8, address: u16, quantity: u16) {
        if self.enabled(LogLevel::Debug) {
            self.log(
                LogLevel::Debug,
                &format!(
                    "request slave:{} fc:0x{:02X} addr:{} qty:{}",
                    slave_id, function_code, address, quantity
                ),
            );
        }
    }

    pub fn log_response(&self, slave_id: u8, function_code: u8, summary: &str) {
        if self.enabled(LogLevel::Debug) {
            self.log(
                LogLevel::Debug,
                &format!(
                    "response slave:{} fc:0x{:02X} {}",
                    slave_id, function_code, summary
                ),
            );
        }
    }

    pub fn log_packet(&self, direction: &str, protocol: &str, slave_id: Option<u8>, data: &[u8]) {
        if self.enabled(LogLevel::Info) {
            self.log(LogLevel::Info, &packet_line(direction, protocol, slave_id, data));
        }
    }
}

/// Format raw bytes as hex string for packet logging
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn packet_line(direction: &str, protocol: &str, slave_id: Option<u8>, data: &[u8]) -> String {
    match slave_id {
        Some(id) => format!(
            "[MODBUS-{}] {} slave:{} {}",
            protocol,
            direction,
            id,
            format_hex_packet(data)
        ),
        None => format!("[MODBUS-{}] {} {}", protocol, direction, format_hex_packet(data)),
    }
}

/// Log a raw frame through `tracing` at info level
pub fn log_packet(direction: &str, protocol: &str, slave_id: Option<u8>, data: &[u8]) {
    info!("{}", packet_line(direction, protocol, slave_id, data));
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_format_hex_packet() {
        assert_eq!(format_hex_packet(&[0x01, 0x03, 0xAB]), "01 03 AB");
        assert_eq!(format_hex_packet(&[]), "");
    }

    #[test]
    fn test_callback_receives_lines_at_level() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let logger = CallbackLogger::new(
            move |level, message: &str| sink.lock().push((level, message.to_string())),
            LogLevel::Info,
        );

        logger.log_packet("send", "RTU", Some(1), &[0x01, 0x03]);
        logger.log_request(1, 0x03, 0, 1);

        let lines = lines.lock();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, LogLevel::Info);
        assert_eq!(lines[0].1, "[MODBUS-RTU] send slave:1 01 03");
    }

    #[test]
    fn test_disabled_logger() {
        let logger = CallbackLogger::disabled();
        assert!(!logger.enabled(LogLevel::Error));
        assert_eq!(logger.mode(), LoggingMode::Disabled);
    }
}
