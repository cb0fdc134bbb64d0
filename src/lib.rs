//! # Revsocks - Reverse SOCKS5 proxy over a secure tunnel
//!
//! Revsocks dials out to a remote server, asks it to open a listener on its
//! own loopback interface, and serves SOCKS5 on every connection the server
//! accepts there. Targets are dialed from this process's network, so the
//! effect is `ssh -R port:localhost:port` with an embedded SOCKS5 server —
//! programmable and self-contained.
//!
//! ## Transports
//!
//! - **SSH** (default): password-authenticated SSH session using remote
//!   port forwarding; each forwarded-tcpip channel carries one SOCKS5
//!   connection.
//! - **TLS**: a rustls connection running a custom framed multiplex
//!   protocol with per-channel flow control.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use revsocks::{config::Config, manager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = revsocks::config::load_config("config.toml")?;
//!     let handle = manager::start(config).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.cancel();
//!     Ok(())
//! }
//! ```
//!
//! The session is single-shot: when the tunnel drops,
//! [`manager::ProxyHandle::is_connected`] latches false and stays false.
//! Reconnection policy belongs to the embedder.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod channel;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod mux;
pub mod session;
pub mod socks5;
pub mod target;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{Error, Result};
pub use logging::{get_log, LogLevel};
pub use manager::{start, ProxyHandle};

/// Version of the revsocks library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
