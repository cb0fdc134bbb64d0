//! Error types for revsocks
//!
//! This module defines the error taxonomy shared by the tunnel transports,
//! channels, and SOCKS5 sessions.

use std::io;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for revsocks operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration or argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// DNS resolution failed
    #[error("DNS resolution failed for {0}")]
    DnsResolutionFailed(String),

    /// The peer refused the connection
    #[error("Connection refused")]
    ConnectionRefused,

    /// The connection was reset by the peer
    #[error("Connection reset")]
    ConnectionReset,

    /// The connection attempt timed out
    #[error("Connection timed out")]
    ConnectionTimeout,

    /// No route to the target network
    #[error("Network unreachable")]
    NetworkUnreachable,

    /// No route to the target host
    #[error("Host unreachable")]
    HostUnreachable,

    /// Uncategorized socket error
    #[error("Socket error: {0}")]
    SocketError(String),

    /// The SSH or TLS handshake failed
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// The server rejected our credentials
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// The remote listener request was rejected
    #[error("Remote listener request failed: {0}")]
    ChannelOpenFailed(String),

    /// The channel is closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The peer violated the wire protocol
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The tunnel session dropped
    #[error("Disconnected")]
    Disconnected,

    /// A send was attempted with no flow-control window left
    #[error("Send window exhausted")]
    WindowExhausted,

    /// The SOCKS5 client offered no acceptable authentication method
    #[error("SOCKS5 method negotiation failed")]
    Socks5AuthFailure,

    /// The SOCKS5 client sent a command other than CONNECT
    #[error("SOCKS5 command not supported: {0}")]
    Socks5UnsupportedCommand(u8),

    /// The SOCKS5 client sent an unknown address type
    #[error("SOCKS5 address type not supported: {0}")]
    Socks5UnsupportedAddressType(u8),

    /// Shutdown was requested
    #[error("Shutting down")]
    Shutdown,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Map a target connect failure to a SOCKS5 reply code (RFC 1928 §6).
    pub fn socks5_reply(&self) -> u8 {
        use crate::socks5::consts::*;
        match self {
            Error::NetworkUnreachable => REP_NETWORK_UNREACHABLE,
            Error::HostUnreachable => REP_HOST_UNREACHABLE,
            Error::ConnectionRefused => REP_CONNECTION_REFUSED,
            Error::ConnectionTimeout => REP_TTL_EXPIRED,
            _ => REP_GENERAL_FAILURE,
        }
    }

    /// Categorize an IO error from a target connection attempt.
    pub fn from_connect_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Error::ConnectionRefused,
            io::ErrorKind::ConnectionReset => Error::ConnectionReset,
            io::ErrorKind::TimedOut => Error::ConnectionTimeout,
            io::ErrorKind::NetworkUnreachable => Error::NetworkUnreachable,
            io::ErrorKind::HostUnreachable => Error::HostUnreachable,
            _ => Error::SocketError(err.to_string()),
        }
    }
}
