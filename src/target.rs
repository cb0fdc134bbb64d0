//! Outbound target connections
//!
//! The SOCKS5 session dials CONNECT targets from the client's own network
//! through this module. Failures are categorized so they can be mapped to
//! SOCKS5 reply codes.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

/// Resolve `host:port` to the first usable socket address.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|_| Error::DnsResolutionFailed(host.to_string()))?;

    addrs
        .next()
        .ok_or_else(|| Error::DnsResolutionFailed(host.to_string()))
}

/// Resolve and connect to a CONNECT target within `timeout`.
///
/// Nagle is disabled on the resulting stream; both relay directions carry
/// interactive traffic.
pub async fn connect_target(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let addr = resolve(host, port).await?;

    debug!("Connecting to target {} ({})", addr, host);

    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::ConnectionTimeout)?
        .map_err(Error::from_connect_io)?;

    stream.set_nodelay(true).map_err(Error::from)?;
    Ok(stream)
}
