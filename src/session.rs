//! Per-channel SOCKS5 session
//!
//! Each accepted tunnel channel gets one [`Socks5Session`]: it terminates
//! the SOCKS5 handshake on the channel, dials the requested target from the
//! local network, and relays bytes in both directions with orderly
//! half-close. Failures are local to the channel; they never affect the
//! tunnel session or other channels.

use crate::channel::{ByteChannel, ChannelReader, ChannelWriter};
use crate::error::{Error, Result};
use crate::socks5::consts::*;
use crate::socks5::{
    build_connect_reply, build_method_response, parse_connect_request, parse_method_request,
    types::ParseError, ConnectRequest, Parse,
};
use crate::target::connect_target;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

const READ_BUF_SIZE: usize = 4096;
const RELAY_BUF_SIZE: usize = 8192;

/// Session lifecycle; transitions are monotone with `Closed` as the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Accumulating the method selection message
    ReadingMethods,
    /// Accumulating the CONNECT request
    ReadingRequest,
    /// Target dial in flight
    Connecting,
    /// Bidirectional relay running
    Relaying,
    /// Terminal
    Closed,
}

/// One SOCKS5 session bound to one tunnel channel.
pub struct Socks5Session {
    channel: Option<Box<dyn ByteChannel>>,
    state: SessionState,
    inbound: Vec<u8>,
    connect_timeout: Duration,
}

impl Socks5Session {
    /// Bind a session to an accepted channel.
    pub fn new(channel: Box<dyn ByteChannel>, connect_timeout: Duration) -> Self {
        Socks5Session {
            channel: Some(channel),
            state: SessionState::ReadingMethods,
            inbound: Vec::new(),
            connect_timeout,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion and release the channel.
    pub async fn run(mut self) -> Result<()> {
        let result = self.drive().await;
        if let Err(ref e) = result {
            debug!("SOCKS5 session ended: {}", e);
        }
        self.close().await;
        result
    }

    async fn drive(&mut self) -> Result<()> {
        self.negotiate_method().await?;
        let request = self.read_request().await?;
        let target = self.dial_target(&request).await?;
        self.relay(target).await
    }

    /// Read more channel bytes into the reassembly buffer.
    async fn fill(&mut self) -> Result<()> {
        let channel = self.channel.as_mut().ok_or(Error::ChannelClosed)?;
        let mut buf = [0u8; READ_BUF_SIZE];
        let n = channel.read(&mut buf).await?;
        if n == 0 {
            // Peer closed mid-handshake
            return Err(Error::ChannelClosed);
        }
        self.inbound.extend_from_slice(&buf[..n]);
        Ok(())
    }

    async fn write_channel(&mut self, data: &[u8]) -> Result<()> {
        let channel = self.channel.as_mut().ok_or(Error::ChannelClosed)?;
        channel.write(data).await
    }

    async fn negotiate_method(&mut self) -> Result<()> {
        loop {
            match parse_method_request(&self.inbound) {
                Parse::Incomplete => self.fill().await?,
                Parse::Invalid(_) => {
                    warn!("SOCKS5 method negotiation failed (bad version)");
                    self.write_channel(&build_method_response(AUTH_NO_ACCEPTABLE))
                        .await?;
                    return Err(Error::Socks5AuthFailure);
                }
                Parse::Complete { consumed, value } => {
                    if !value.supports_no_auth {
                        warn!("SOCKS5 method negotiation failed (no-auth not offered)");
                        self.write_channel(&build_method_response(AUTH_NO_ACCEPTABLE))
                            .await?;
                        return Err(Error::Socks5AuthFailure);
                    }
                    self.inbound.drain(..consumed);
                    self.write_channel(&build_method_response(AUTH_NONE)).await?;
                    self.state = SessionState::ReadingRequest;
                    return Ok(());
                }
            }
        }
    }

    async fn read_request(&mut self) -> Result<ConnectRequest> {
        loop {
            match parse_connect_request(&self.inbound) {
                Parse::Incomplete => self.fill().await?,
                Parse::Invalid(ParseError::UnknownAddrType(atyp)) => {
                    warn!("SOCKS5 request with unsupported address type {}", atyp);
                    self.reply(REP_ADDRESS_TYPE_NOT_SUPPORTED).await?;
                    return Err(Error::Socks5UnsupportedAddressType(atyp));
                }
                Parse::Invalid(_) => {
                    warn!("Malformed SOCKS5 connect request");
                    self.reply(REP_GENERAL_FAILURE).await?;
                    return Err(Error::ProtocolError("malformed connect request".into()));
                }
                Parse::Complete { consumed, value } => {
                    self.inbound.drain(..consumed);
                    if !value.is_connect() {
                        warn!("SOCKS5 command {} not supported", value.command);
                        self.reply(REP_COMMAND_NOT_SUPPORTED).await?;
                        return Err(Error::Socks5UnsupportedCommand(value.command));
                    }
                    debug!("SOCKS5 CONNECT {}", value);
                    return Ok(value);
                }
            }
        }
    }

    /// Dial the target; the CONNECT reply goes out exactly once, after the
    /// dial resolves.
    async fn dial_target(&mut self, request: &ConnectRequest) -> Result<TcpStream> {
        self.state = SessionState::Connecting;

        match connect_target(&request.addr.host(), request.port, self.connect_timeout).await {
            Ok(stream) => {
                let bind = stream.local_addr().ok();
                self.write_channel(&build_connect_reply(REP_SUCCESS, bind))
                    .await?;
                self.state = SessionState::Relaying;
                info!("SOCKS5 tunnel established to {}", request);
                Ok(stream)
            }
            Err(e) => {
                warn!("Target connect to {} failed: {}", request, e);
                self.reply(e.socks5_reply()).await?;
                Err(e)
            }
        }
    }

    async fn reply(&mut self, code: u8) -> Result<()> {
        self.write_channel(&build_connect_reply(code, None)).await
    }

    async fn relay(&mut self, target: TcpStream) -> Result<()> {
        let channel = self.channel.take().ok_or(Error::ChannelClosed)?;
        // Bytes that followed the CONNECT request in the same packet belong
        // to the target stream
        let leftover = std::mem::take(&mut self.inbound);
        relay_bidirectional(channel, target, leftover).await;
        self.state = SessionState::Closed;
        Ok(())
    }

    async fn close(&mut self) {
        self.state = SessionState::Closed;
        if let Some(mut channel) = self.channel.take() {
            let _ = channel.send_eof().await;
            let _ = channel.close().await;
        }
    }
}

/// Copy both directions until each side has delivered its EOF.
///
/// Channel EOF half-closes the target's write side and the target keeps
/// draining; target EOF sends local end-of-stream toward the peer. Hard
/// errors on one side surface on the other as failed writes, so both
/// directions terminate.
async fn relay_bidirectional(
    channel: Box<dyn ByteChannel>,
    target: TcpStream,
    leftover: Vec<u8>,
) {
    let (mut channel_read, mut channel_write) = channel.into_split();
    let (mut target_read, mut target_write) = target.into_split();

    let client_to_target = async move {
        if !leftover.is_empty() && target_write.write_all(&leftover).await.is_err() {
            return;
        }
        let mut buf = vec![0u8; RELAY_BUF_SIZE];
        loop {
            match channel_read.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if target_write.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = target_write.shutdown().await;
    };

    let target_to_client = async move {
        let mut buf = vec![0u8; RELAY_BUF_SIZE];
        loop {
            match target_read.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if channel_write.write(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = channel_write.send_eof().await;
        let _ = channel_write.close().await;
    };

    tokio::join!(client_to_target, target_to_client);
    debug!("SOCKS5 relay finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{FakeChannel, FakeShared};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    fn session(reads: Vec<Vec<u8>>) -> (Socks5Session, Arc<FakeShared>) {
        let channel = FakeChannel::new(reads);
        let shared = channel.shared();
        (
            Socks5Session::new(Box::new(channel), Duration::from_secs(2)),
            shared,
        )
    }

    #[tokio::test]
    async fn test_no_auth_accepted() {
        let (mut s, shared) = session(vec![vec![0x05, 0x01, 0x00]]);
        s.negotiate_method().await.unwrap();

        assert_eq!(shared.written(), vec![0x05, 0x00]);
        assert_eq!(s.state(), SessionState::ReadingRequest);
    }

    #[tokio::test]
    async fn test_no_auth_not_offered() {
        let (s, shared) = session(vec![vec![0x05, 0x02, 0x01, 0x02]]);
        let err = s.run().await.unwrap_err();

        assert!(matches!(err, Error::Socks5AuthFailure));
        assert_eq!(shared.written(), vec![0x05, 0xFF]);
        assert!(shared.closed());
    }

    #[tokio::test]
    async fn test_partial_method_request() {
        let (mut s, shared) = session(vec![vec![0x05], vec![0x01, 0x00]]);
        s.negotiate_method().await.unwrap();

        assert_eq!(shared.written(), vec![0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_malformed_connect_request() {
        let (s, shared) = session(vec![
            vec![0x05, 0x01, 0x00],
            vec![0x04, 0x01, 0x00, 0x01, 0x01, 0x02, 0x03, 0x04, 0x1F, 0x90],
        ]);
        let err = s.run().await.unwrap_err();

        assert!(matches!(err, Error::ProtocolError(_)));
        let written = shared.written();
        // Method response, then a general-failure reply
        assert_eq!(&written[..2], &[0x05, 0x00]);
        assert_eq!(written[2], 0x05);
        assert_eq!(written[3], REP_GENERAL_FAILURE);
    }

    #[tokio::test]
    async fn test_unsupported_address_type() {
        let (s, shared) = session(vec![
            vec![0x05, 0x01, 0x00],
            vec![0x05, 0x01, 0x00, 0x09, 0x01, 0x02, 0x03, 0x04, 0x1F, 0x90],
        ]);
        let err = s.run().await.unwrap_err();

        assert!(matches!(err, Error::Socks5UnsupportedAddressType(0x09)));
        let written = shared.written();
        assert_eq!(written[3], REP_ADDRESS_TYPE_NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn test_unsupported_command() {
        // BIND request
        let (s, shared) = session(vec![
            vec![0x05, 0x01, 0x00],
            vec![0x05, 0x02, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01, 0x00, 0x50],
        ]);
        let err = s.run().await.unwrap_err();

        assert!(matches!(err, Error::Socks5UnsupportedCommand(0x02)));
        let written = shared.written();
        assert_eq!(written[3], REP_COMMAND_NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn test_refused_target() {
        // CONNECT 127.0.0.1:1
        let (s, shared) = session(vec![
            vec![0x05, 0x01, 0x00],
            vec![0x05, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01, 0x00, 0x01],
        ]);
        let err = s.run().await.unwrap_err();

        assert!(matches!(err, Error::ConnectionRefused));
        let written = shared.written();
        assert_eq!(&written[..2], &[0x05, 0x00]);
        assert_eq!(written[3], REP_CONNECTION_REFUSED);
        assert!(shared.closed());
    }

    #[tokio::test]
    async fn test_connect_and_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Echo one message back, then close
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&buf[..n]).await.unwrap();
        });

        let mut request = vec![0x05, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01];
        request.extend_from_slice(&port.to_be_bytes());

        let (s, shared) = session(vec![
            vec![0x05, 0x01, 0x00],
            request,
            b"ping".to_vec(),
        ]);
        s.run().await.unwrap();
        server.await.unwrap();

        let written = shared.written();
        // Method response
        assert_eq!(&written[..2], &[0x05, 0x00]);
        // Success reply with a 4-byte IPv4 bind address
        assert_eq!(written[2], 0x05);
        assert_eq!(written[3], REP_SUCCESS);
        assert_eq!(written[5], ATYP_IPV4);
        // Echoed relay payload at the tail
        assert_eq!(&written[written.len() - 4..], b"ping");
        assert!(shared.eof_sent());
    }

    #[tokio::test]
    async fn test_pipelined_request_bytes_reach_target() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"early");
        });

        // CONNECT and the first payload bytes arrive in one chunk
        let mut chunk = vec![0x05, 0x01, 0x00, 0x01, 0x7F, 0x00, 0x00, 0x01];
        chunk.extend_from_slice(&port.to_be_bytes());
        chunk.extend_from_slice(b"early");

        let (s, _shared) = session(vec![vec![0x05, 0x01, 0x00], chunk]);
        s.run().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_channel_eof_mid_handshake() {
        let (s, shared) = session(vec![vec![0x05]]);
        let err = s.run().await.unwrap_err();

        assert!(matches!(err, Error::ChannelClosed));
        // No reply was possible
        assert!(shared.written().is_empty());
        assert!(shared.closed());
    }
}
