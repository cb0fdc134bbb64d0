//! Channel abstraction
//!
//! A [`ByteChannel`] is one inbound logical stream accepted from the tunnel:
//! a bidirectional byte pipe with half-close. The SOCKS5 session drives the
//! handshake through the unsplit channel, then calls [`ByteChannel::into_split`]
//! to relay both directions concurrently.
//!
//! Implementations: [`SshChannel`] (SSH forwarded-tcpip channel),
//! [`MuxChannel`] (framed multiplex channel with flow control), and
//! [`FakeChannel`] (scripted in-memory double used by the test suite).

mod fake;
mod ssh;

pub use crate::mux::MuxChannel;
pub use fake::{FakeChannel, FakeShared};
pub use ssh::SshChannel;

use crate::error::Result;
use async_trait::async_trait;

/// One inbound tunnel channel.
#[async_trait]
pub trait ByteChannel: Send {
    /// Read bytes from the peer. `Ok(0)` means the peer closed its write
    /// half (end of stream).
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `data` toward the peer.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Signal local half-close. Idempotent; later writes fail.
    async fn send_eof(&mut self) -> Result<()>;

    /// Release the channel. Idempotent.
    async fn close(&mut self) -> Result<()>;

    /// Whether the peer has closed its write half.
    fn is_eof(&self) -> bool;

    /// Split into independently owned halves for full-duplex relay.
    fn into_split(self: Box<Self>) -> (Box<dyn ChannelReader>, Box<dyn ChannelWriter>);
}

/// Read half of a split channel.
#[async_trait]
pub trait ChannelReader: Send {
    /// Read bytes from the peer; `Ok(0)` is end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Write half of a split channel.
#[async_trait]
pub trait ChannelWriter: Send {
    /// Write all of `data` toward the peer.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Signal local half-close. Idempotent.
    async fn send_eof(&mut self) -> Result<()>;

    /// Release the write half. Idempotent.
    async fn close(&mut self) -> Result<()>;
}
