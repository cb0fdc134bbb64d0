//! SSH forwarded-tcpip channel
//!
//! Wraps a russh channel in the [`ByteChannel`] contract. russh serializes
//! all channel traffic through its session task, so ordering per channel is
//! preserved without an explicit write queue here.

use super::{ByteChannel, ChannelReader, ChannelWriter};
use crate::error::{Error, Result};
use async_trait::async_trait;
use russh::client;
use russh::ChannelStream;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};

/// One accepted `forwarded-tcpip` channel.
pub struct SshChannel {
    stream: ChannelStream<client::Msg>,
    eof_seen: bool,
    eof_sent: bool,
}

impl SshChannel {
    /// Wrap a channel accepted from the remote listener.
    pub fn new(channel: russh::Channel<client::Msg>) -> Self {
        SshChannel {
            stream: channel.into_stream(),
            eof_seen: false,
            eof_sent: false,
        }
    }
}

#[async_trait]
impl ByteChannel for SshChannel {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.eof_seen {
            return Ok(0);
        }
        let n = self
            .stream
            .read(buf)
            .await
            .map_err(|_| Error::ChannelClosed)?;
        if n == 0 {
            self.eof_seen = true;
        }
        Ok(n)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.eof_sent {
            return Err(Error::ChannelClosed);
        }
        self.stream
            .write_all(data)
            .await
            .map_err(|_| Error::ChannelClosed)?;
        self.stream
            .flush()
            .await
            .map_err(|_| Error::ChannelClosed)?;
        Ok(())
    }

    async fn send_eof(&mut self) -> Result<()> {
        if !self.eof_sent {
            self.eof_sent = true;
            // Best effort; the peer may already be gone
            let _ = self.stream.shutdown().await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.send_eof().await
    }

    fn is_eof(&self) -> bool {
        self.eof_seen
    }

    fn into_split(self: Box<Self>) -> (Box<dyn ChannelReader>, Box<dyn ChannelWriter>) {
        let (read_half, write_half) = tokio::io::split(self.stream);
        (
            Box::new(SshChannelReader {
                inner: read_half,
                eof_seen: self.eof_seen,
            }),
            Box::new(SshChannelWriter {
                inner: write_half,
                eof_sent: self.eof_sent,
            }),
        )
    }
}

struct SshChannelReader {
    inner: ReadHalf<ChannelStream<client::Msg>>,
    eof_seen: bool,
}

#[async_trait]
impl ChannelReader for SshChannelReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.eof_seen {
            return Ok(0);
        }
        let n = self
            .inner
            .read(buf)
            .await
            .map_err(|_| Error::ChannelClosed)?;
        if n == 0 {
            self.eof_seen = true;
        }
        Ok(n)
    }
}

struct SshChannelWriter {
    inner: WriteHalf<ChannelStream<client::Msg>>,
    eof_sent: bool,
}

#[async_trait]
impl ChannelWriter for SshChannelWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.eof_sent {
            return Err(Error::ChannelClosed);
        }
        self.inner
            .write_all(data)
            .await
            .map_err(|_| Error::ChannelClosed)?;
        self.inner
            .flush()
            .await
            .map_err(|_| Error::ChannelClosed)?;
        Ok(())
    }

    async fn send_eof(&mut self) -> Result<()> {
        if !self.eof_sent {
            self.eof_sent = true;
            let _ = self.inner.shutdown().await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.send_eof().await
    }
}
