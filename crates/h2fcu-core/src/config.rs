//! Runtime configuration
//!
//! Settings are stored as JSON. Every field has a default, so a partial file
//! (or no file at all) yields a working configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is not valid configuration JSON
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Client connection
    pub session: SessionConfig,
    /// History and fault log
    pub telemetry: TelemetryConfig,
    /// CSV logging
    pub datalog: DatalogConfig,
    /// Bridge server
    pub bridge: BridgeConfig,
}

impl MonitorConfig {
    /// Load from a JSON file, falling back to defaults if it does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match fs::read_to_string(path.as_ref()) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Save as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Wire protocol between the bridge and its observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserverProtocol {
    /// JSON text messages over WebSocket
    #[default]
    WebSocket,
    /// Newline-delimited JSON over plain TCP
    Lines,
}

impl fmt::Display for ObserverProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserverProtocol::WebSocket => write!(f, "websocket"),
            ObserverProtocol::Lines => write!(f, "lines"),
        }
    }
}

impl FromStr for ObserverProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(ObserverProtocol::WebSocket),
            "lines" | "tcp" => Ok(ObserverProtocol::Lines),
            other => Err(format!("unknown protocol '{}' (websocket, lines)", other)),
        }
    }
}

/// Connection and reconnect policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bridge address, `host:port` or a `ws://` URL
    pub address: String,
    /// How to talk to the bridge
    pub protocol: ObserverProtocol,
    /// Wait before each reconnect attempt
    pub reconnect_delay_ms: u64,
    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
}

impl SessionConfig {
    /// Wait before each reconnect attempt
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8765".to_string(),
            protocol: ObserverProtocol::default(),
            reconnect_delay_ms: 2000,
            max_reconnect_attempts: 10,
        }
    }
}

/// Aggregation windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Chart history retention
    pub history_window_secs: u64,
    /// Maximum retained fault log entries
    pub fault_log_capacity: usize,
    /// Minimum spacing between two entries for the same fault code
    pub fault_dedup_ms: i64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            history_window_secs: 600,
            fault_log_capacity: 50,
            fault_dedup_ms: 2000,
        }
    }
}

/// CSV logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatalogConfig {
    /// Period between buffer flushes
    pub flush_interval_ms: u64,
    /// Where log files are created; the documents directory when unset
    pub directory: Option<String>,
}

impl DatalogConfig {
    /// Flush period, at least 1 ms
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

impl Default for DatalogConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 2000,
            directory: None,
        }
    }
}

/// Shortest observer update period
const MIN_BROADCAST_INTERVAL: Duration = Duration::from_millis(1);

/// Bus-to-network bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bind host
    pub host: String,
    /// Bind port; 0 picks a free one
    pub port: u16,
    /// Protocol served to observers
    pub protocol: ObserverProtocol,
    /// Observer updates per second
    pub broadcast_rate_hz: u32,
    /// Period between bus polls
    pub poll_interval_ms: u64,
    /// Maximum frames drained per poll
    pub receive_batch: usize,
}

impl BridgeConfig {
    /// `host:port` to bind
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Period between observer updates, at least 1 ms
    pub fn broadcast_interval(&self) -> Duration {
        (Duration::from_secs(1) / self.broadcast_rate_hz.max(1)).max(MIN_BROADCAST_INTERVAL)
    }

    /// Period between bus polls, at least 1 ms
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            protocol: ObserverProtocol::default(),
            broadcast_rate_hz: 10,
            poll_interval_ms: 10,
            receive_batch: 50,
        }
    }
}
