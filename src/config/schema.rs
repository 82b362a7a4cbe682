//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lifecycle::shutdown::TimeoutPolicy;
use crate::net::options::SocketOptions;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Per-connection socket tuning. Absent means platform-style defaults.
    pub socket: Option<SocketConfig>,

    /// Diagnostics endpoints.
    pub diagnostics: DiagnosticsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080" or ":8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time allowed for in-flight requests to finish, in seconds.
    pub timeout_secs: u64,

    /// Exit the process when the timeout elapses.
    pub exit_on_timeout: bool,

    /// Exit code used when `exit_on_timeout` fires.
    pub exit_code: i32,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            exit_on_timeout: true,
            exit_code: 0,
        }
    }
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn policy(&self) -> TimeoutPolicy {
        if self.exit_on_timeout {
            TimeoutPolicy::Exit {
                code: self.exit_code,
            }
        } else {
            TimeoutPolicy::KeepWaiting
        }
    }
}

/// Socket tuning as written in the config file.
///
/// Zero values mean "not supplied", same as [`SocketOptions`].
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct SocketConfig {
    pub no_delay: bool,
    pub keepalive: bool,
    pub keepalive_interval_secs: u64,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub read_timeout_secs: u64,
    pub read_header_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub max_header_bytes: usize,
}

impl SocketConfig {
    pub fn to_options(&self) -> SocketOptions {
        SocketOptions {
            no_delay: self.no_delay,
            keepalive: self.keepalive,
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
            read_buffer_size: self.read_buffer_size,
            write_buffer_size: self.write_buffer_size,
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            read_header_timeout: Duration::from_secs(self.read_header_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            max_header_bytes: self.max_header_bytes,
        }
    }
}

/// Diagnostics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Serve diagnostics endpoints.
    pub enabled: bool,

    /// Path prefix the endpoints live under.
    pub root: String,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root: "/debug/pprof/".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level for this crate (overridden by `RUST_LOG`).
    pub log_level: String,

    /// Emit JSON log lines.
    pub json_logs: bool,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Prometheus exporter address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert!(config.socket.is_none());
        assert_eq!(config.shutdown.policy(), TimeoutPolicy::Exit { code: 0 });
    }

    #[test]
    fn socket_section_maps_to_options() {
        let config: ServerConfig = toml::from_str(
            r#"
            [socket]
            keepalive = true
            keepalive_interval_secs = 30
            read_buffer_size = 65536
            write_timeout_secs = 20
            "#,
        )
        .unwrap();

        let opts = config.socket.unwrap().to_options();
        assert!(opts.keepalive);
        assert!(!opts.no_delay);
        assert_eq!(opts.keepalive_interval, Duration::from_secs(30));
        assert_eq!(opts.read_buffer_size, 65536);
        assert_eq!(opts.write_timeout, Duration::from_secs(20));
        assert_eq!(opts.read_timeout, Duration::ZERO);
    }

    #[test]
    fn empty_socket_section_is_present_but_zero() {
        let config: ServerConfig = toml::from_str("[socket]\n").unwrap();
        assert_eq!(config.socket.unwrap().to_options(), SocketOptions::default());
    }

    #[test]
    fn keep_waiting_policy() {
        let shutdown = ShutdownConfig {
            exit_on_timeout: false,
            ..Default::default()
        };
        assert_eq!(shutdown.policy(), TimeoutPolicy::KeepWaiting);
    }
}
