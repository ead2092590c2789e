//! # Configuration Management
//!
//! Centralized configuration for the TCP and multicast transports.
//!
//! This module provides structured configuration for the server, the client,
//! the multicast publisher/subscriber pair and logging: listen addresses,
//! liveness intervals, queue bounds and packet size caps.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides (`TELEMETRY_WIRE_*`) via `from_env()`
//!
//! Durations are written to TOML as integer milliseconds.

use crate::core::datagram::MAX_DATAGRAM_SIZE;
use crate::core::header::HEADER_LEN;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Max allowed TCP packet size (16 MB)
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Default multicast group for telemetry
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 0, 1);

/// Default multicast port
pub const DEFAULT_MULTICAST_PORT: u16 = 9540;

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Multicast publisher/subscriber configuration
    #[serde(default)]
    pub multicast: MulticastConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `TELEMETRY_WIRE_*` overrides read through `lookup`.
    ///
    /// Unparseable values are reported rather than silently skipped.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("TELEMETRY_WIRE_SERVER_ADDRESS") {
            self.server.address = addr;
        }

        if let Some(addr) = lookup("TELEMETRY_WIRE_CLIENT_ADDRESS") {
            self.client.address = addr;
        }

        if let Some(value) = lookup("TELEMETRY_WIRE_HEARTBEAT_TIMEOUT_MS") {
            self.server.heartbeat_timeout = Duration::from_millis(parse_env(
                "TELEMETRY_WIRE_HEARTBEAT_TIMEOUT_MS",
                &value,
            )?);
        }

        if let Some(value) = lookup("TELEMETRY_WIRE_HEARTBEAT_INTERVAL_MS") {
            // 0 disables the heartbeat, as in TOML
            let millis: u64 = parse_env("TELEMETRY_WIRE_HEARTBEAT_INTERVAL_MS", &value)?;
            self.client.heartbeat_interval = (millis > 0).then(|| Duration::from_millis(millis));
        }

        if let Some(value) = lookup("TELEMETRY_WIRE_CONNECTION_TIMEOUT_MS") {
            self.client.connection_timeout = Duration::from_millis(parse_env(
                "TELEMETRY_WIRE_CONNECTION_TIMEOUT_MS",
                &value,
            )?);
        }

        if let Some(value) = lookup("TELEMETRY_WIRE_SYSTEM_ID") {
            self.server.system_id = Some(parse_env("TELEMETRY_WIRE_SYSTEM_ID", &value)?);
        }

        if let Some(value) = lookup("TELEMETRY_WIRE_MULTICAST_GROUP") {
            self.multicast.group = parse_env("TELEMETRY_WIRE_MULTICAST_GROUP", &value)?;
        }

        if let Some(value) = lookup("TELEMETRY_WIRE_MULTICAST_PORT") {
            self.multicast.port = parse_env("TELEMETRY_WIRE_MULTICAST_PORT", &value)?;
        }

        if let Some(value) = lookup("TELEMETRY_WIRE_LOG_LEVEL") {
            self.logging.log_level = value.parse::<Level>().map_err(|_| {
                ProtocolError::ConfigError(format!("Invalid log level in environment: {value}"))
            })?;
        }

        Ok(())
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.multicast.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        errors_to_result(self.validate())
    }
}

fn errors_to_result(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::ConfigError(format!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {key}: '{value}'")))
}

fn validate_packet_size(label: &str, size: usize, max: usize, errors: &mut Vec<String>) {
    if size <= HEADER_LEN {
        errors.push(format!(
            "{label} max packet size must exceed the {HEADER_LEN}-byte header"
        ));
    } else if size > max {
        errors.push(format!("{label} max packet size too large: {size} (maximum: {max})"));
    }
}

fn validate_dispatch_interval(label: &str, interval: Duration, errors: &mut Vec<String>) {
    if interval.is_zero() {
        errors.push(format!("{label} dispatch interval must be greater than 0"));
    } else if interval.as_secs() > 1 {
        errors.push(format!("{label} dispatch interval too long (maximum: 1s)"));
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server listen address (e.g., "0.0.0.0:5000")
    pub address: String,

    /// Silence after which a session is evicted
    #[serde(with = "duration_serde")]
    pub heartbeat_timeout: Duration,

    /// Interval of the liveness sweep
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,

    /// Interval at which pending commands are handed to the application
    #[serde(with = "duration_serde")]
    pub dispatch_interval: Duration,

    /// Bound on a single write to one session
    #[serde(with = "duration_serde")]
    pub send_timeout: Duration,

    /// Capacity of the event channel, and of each queue of received
    /// commands waiting for dispatch (oldest dropped first)
    pub event_queue_limit: usize,

    /// Maximum number of concurrent sessions
    pub max_connections: usize,

    /// Largest accepted packet, header included
    pub max_packet_size: usize,

    /// Fixed run identifier; a process-wide random id is used when unset
    pub system_id: Option<i64>,

    /// Answer client heartbeats with a heartbeat carrying the same task id
    pub echo_heartbeat: bool,

    /// Multicast group advertised in reply to address requests
    pub multicast_group: Option<SocketAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:5000"),
            heartbeat_timeout: timeout::HEARTBEAT_TIMEOUT,
            sweep_interval: timeout::SWEEP_INTERVAL,
            dispatch_interval: timeout::DISPATCH_INTERVAL,
            send_timeout: timeout::DEFAULT_TIMEOUT,
            event_queue_limit: 1024,
            max_connections: 1000,
            max_packet_size: MAX_PACKET_SIZE,
            system_id: None,
            echo_heartbeat: true,
            multicast_group: None,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:5000')",
                self.address
            ));
        }

        if self.heartbeat_timeout.as_millis() < 100 {
            errors.push("Heartbeat timeout too short (minimum: 100ms)".to_string());
        } else if self.heartbeat_timeout.as_secs() > 3600 {
            errors.push("Heartbeat timeout too long (maximum: 1 hour)".to_string());
        }

        if self.sweep_interval.is_zero() {
            errors.push("Sweep interval must be greater than 0".to_string());
        } else if self.sweep_interval > self.heartbeat_timeout {
            errors.push("Sweep interval should not exceed the heartbeat timeout".to_string());
        }

        validate_dispatch_interval("Server", self.dispatch_interval, &mut errors);

        if self.send_timeout.as_millis() < 10 {
            errors.push("Send timeout too short (minimum: 10ms)".to_string());
        }

        if self.event_queue_limit == 0 {
            errors.push("Event queue limit must be greater than 0".to_string());
        } else if self.event_queue_limit > 1_000_000 {
            errors.push(format!(
                "Event queue limit too large: {} (max recommended: 1,000,000)",
                self.event_queue_limit
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        validate_packet_size("Server", self.max_packet_size, i32::MAX as usize, &mut errors);

        if self.system_id == Some(0) {
            errors.push("System id 0 is reserved for 'unknown'".to_string());
        }

        if let Some(group) = self.multicast_group {
            if !is_ipv4_multicast(&group) {
                errors.push(format!("Advertised multicast group {group} is not IPv4 multicast"));
            }
        }

        errors
    }

    /// Like [`ServerConfig::validate`], failing with `ConfigError`
    pub fn validate_strict(&self) -> Result<()> {
        errors_to_result(self.validate())
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Interval at which received commands are handed to the application
    #[serde(with = "duration_serde")]
    pub dispatch_interval: Duration,

    /// Interval between heartbeats; `None` disables the heartbeat loop
    #[serde(with = "opt_duration_serde")]
    pub heartbeat_interval: Option<Duration>,

    /// Bound on a single write to the server
    #[serde(with = "duration_serde")]
    pub send_timeout: Duration,

    /// Capacity of the event channel, and of each queue of received
    /// commands waiting for dispatch (oldest dropped first)
    pub event_queue_limit: usize,

    /// Largest accepted packet, header included
    pub max_packet_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:5000"),
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            dispatch_interval: timeout::DISPATCH_INTERVAL,
            heartbeat_interval: Some(timeout::HEARTBEAT_INTERVAL),
            send_timeout: timeout::DEFAULT_TIMEOUT,
            event_queue_limit: 1024,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        } else if self.address.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid client address format: '{}' (expected format: '10.0.0.5:5000')",
                self.address
            ));
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        } else if self.connection_timeout.as_secs() > 300 {
            errors.push("Connection timeout too long (maximum: 300s)".to_string());
        }

        validate_dispatch_interval("Client", self.dispatch_interval, &mut errors);

        if let Some(interval) = self.heartbeat_interval {
            if interval.as_millis() < 100 {
                errors.push("Heartbeat interval too short (minimum: 100ms)".to_string());
            }
        }

        if self.send_timeout.as_millis() < 10 {
            errors.push("Send timeout too short (minimum: 10ms)".to_string());
        }

        if self.event_queue_limit == 0 {
            errors.push("Event queue limit must be greater than 0".to_string());
        }

        validate_packet_size("Client", self.max_packet_size, i32::MAX as usize, &mut errors);

        errors
    }

    pub fn validate_strict(&self) -> Result<()> {
        errors_to_result(self.validate())
    }
}

/// Multicast publisher/subscriber configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MulticastConfig {
    /// Multicast group address
    pub group: Ipv4Addr,

    /// Multicast port
    pub port: u16,

    /// Time-to-live of published datagrams
    pub ttl: u32,

    /// Deliver published datagrams back to local subscribers
    pub loopback: bool,

    /// Largest datagram published or accepted
    pub max_datagram_size: usize,

    /// Interval at which received commands are handed to the application
    #[serde(with = "duration_serde")]
    pub dispatch_interval: Duration,

    /// Capacity of the command channel to the application, and of the queue
    /// of received datagrams waiting for dispatch (oldest dropped first)
    pub event_queue_limit: usize,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_MULTICAST_PORT,
            ttl: 1,
            loopback: true,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            dispatch_interval: timeout::DISPATCH_INTERVAL,
            event_queue_limit: 4096,
        }
    }
}

impl MulticastConfig {
    /// The group endpoint
    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::from((self.group, self.port))
    }

    /// Validate multicast configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.group.is_multicast() {
            errors.push(format!("Multicast group {} is not a multicast address", self.group));
        }

        if self.port == 0 {
            errors.push("Multicast port must be greater than 0".to_string());
        }

        if self.ttl == 0 || self.ttl > 255 {
            errors.push(format!("Invalid multicast TTL: {} (valid range: 1-255)", self.ttl));
        }

        validate_packet_size(
            "Multicast",
            self.max_datagram_size,
            MAX_DATAGRAM_SIZE,
            &mut errors,
        );
        validate_dispatch_interval("Multicast", self.dispatch_interval, &mut errors);

        if self.event_queue_limit == 0 {
            errors.push("Event queue limit must be greater than 0".to_string());
        }

        errors
    }

    pub fn validate_strict(&self) -> Result<()> {
        errors_to_result(self.validate())
    }
}

/// True when `addr` is an IPv4 multicast endpoint
pub fn is_ipv4_multicast(addr: &SocketAddr) -> bool {
    matches!(addr, SocketAddr::V4(v4) if v4.ip().is_multicast())
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("telemetry-wire"),
            log_level: Level::INFO,
            log_to_console: true,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if !self.log_to_console {
            errors.push("Console logging is the only output and must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Optional durations; `0` means disabled since TOML has no null
mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.map(|d| d.as_millis() as u64).unwrap_or(0);
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok((millis > 0).then(|| Duration::from_millis(millis)))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        assert!(NetworkConfig::default().validate().is_empty());
    }

    #[test]
    fn test_env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("TELEMETRY_WIRE_SERVER_ADDRESS", "0.0.0.0:6000"),
            ("TELEMETRY_WIRE_HEARTBEAT_TIMEOUT_MS", "1500"),
            ("TELEMETRY_WIRE_SYSTEM_ID", "12345"),
            ("TELEMETRY_WIRE_MULTICAST_GROUP", "239.1.2.3"),
            ("TELEMETRY_WIRE_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = NetworkConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.address, "0.0.0.0:6000");
        assert_eq!(config.server.heartbeat_timeout, Duration::from_millis(1500));
        assert_eq!(config.server.system_id, Some(12345));
        assert_eq!(config.multicast.group, Ipv4Addr::new(239, 1, 2, 3));
        assert_eq!(config.logging.log_level, Level::DEBUG);
    }

    #[test]
    fn test_bad_env_value_is_reported() {
        let mut config = NetworkConfig::default();
        let result = config.apply_env(|key| {
            (key == "TELEMETRY_WIRE_MULTICAST_PORT").then(|| "not-a-port".to_string())
        });
        assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
    }

    #[test]
    fn test_zero_heartbeat_interval_env_disables_heartbeat() {
        fn heartbeat(millis: &'static str) -> impl Fn(&str) -> Option<String> {
            move |key| (key == "TELEMETRY_WIRE_HEARTBEAT_INTERVAL_MS").then(|| millis.to_string())
        }

        let mut config = NetworkConfig::default();
        config.apply_env(heartbeat("0")).unwrap();
        assert_eq!(config.client.heartbeat_interval, None);
        assert!(config.client.validate().is_empty());

        config.apply_env(heartbeat("250")).unwrap();
        assert_eq!(
            config.client.heartbeat_interval,
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_disabled_heartbeat_round_trips_as_zero() {
        let config = NetworkConfig::default_with_overrides(|c| c.client.heartbeat_interval = None);
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("heartbeat_interval = 0"));
        let parsed = NetworkConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.client.heartbeat_interval, None);
    }
}
