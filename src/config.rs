//! Client configuration
//!
//! Configuration can come from a TOML file ([`load_config`]) or be built by
//! the embedder. Only `server_host`, `username`, and `password` are
//! required; everything else has conventional defaults.

use crate::error::{Error, Result};
use crate::logging::LogLevel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_server_port() -> u16 {
    22
}

fn default_forward_port() -> u16 {
    1080
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_keepalive_interval_ms() -> u64 {
    30_000
}

fn default_initial_window() -> u32 {
    256 * 1024
}

/// Which tunnel transport carries the channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// SSH session with remote port forwarding
    #[default]
    Ssh,
    /// TLS connection with framed multiplexing
    Tls,
}

/// TLS transport options (used when `transport = "tls"`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsOptions {
    /// Hostname presented for certificate verification; defaults to the
    /// server host
    #[serde(default)]
    pub hostname: Option<String>,

    /// Path to an extra trusted root certificate (PEM)
    #[serde(default)]
    pub trusted_root: Option<String>,

    /// Accept any server certificate
    #[serde(default)]
    pub skip_verify: bool,

    /// Initial per-channel flow-control window in bytes
    #[serde(default = "default_initial_window")]
    pub initial_window: u32,
}

impl Default for TlsOptions {
    fn default() -> Self {
        TlsOptions {
            hostname: None,
            trusted_root: None,
            skip_verify: false,
            initial_window: default_initial_window(),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server hostname or IP
    pub server_host: String,

    /// Server port
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Username for authentication
    pub username: String,

    /// Password for authentication
    pub password: String,

    /// Port the server binds on its loopback for the reverse listener
    #[serde(default = "default_forward_port")]
    pub forward_port: u16,

    /// TCP connect + handshake timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Tunnel keepalive interval in milliseconds; 0 disables keepalives
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Minimum level stored in the log ring
    #[serde(default)]
    pub log_level: LogLevel,

    /// Tunnel transport variant
    #[serde(default)]
    pub transport: TransportType,

    /// TLS options for the `tls` transport
    #[serde(default)]
    pub tls: TlsOptions,
}

impl Config {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Keepalive interval, or `None` when disabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        if self.keepalive_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.keepalive_interval_ms))
        }
    }

    /// Check the configuration for values that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.server_host.is_empty() {
            return Err(Error::InvalidArgument("server_host is empty".into()));
        }
        if self.server_port == 0 {
            return Err(Error::InvalidArgument("server_port is 0".into()));
        }
        if self.username.is_empty() {
            return Err(Error::InvalidArgument("username is empty".into()));
        }
        if self.forward_port == 0 {
            return Err(Error::InvalidArgument("forward_port is 0".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::InvalidArgument("connect_timeout_ms is 0".into()));
        }
        Ok(())
    }
}

/// Load and validate a configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        Error::InvalidArgument(format!(
            "cannot read config file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&text)
        .map_err(|e| Error::InvalidArgument(format!("invalid config file: {}", e)))?;

    config.validate()?;
    Ok(config)
}
