//! SSH tunnel transport
//!
//! Dials the server, authenticates with username and password, and requests
//! a remote listener on the server's loopback (`tcpip-forward`). The server
//! opens one `forwarded-tcpip` channel per connection it accepts there;
//! those channels arrive through the russh handler and are forwarded to the
//! session manager's accept queue.
//!
//! Host keys are logged and accepted unconditionally; verifying them is an
//! explicit non-goal of this client.

use super::SocketOpts;
use crate::channel::{ByteChannel, SshChannel};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::target::resolve;
use russh::client::{self, AuthResult, Handler, Msg, Session};
use russh::keys::{HashAlg, PublicKey};
use russh::{Channel, Disconnect};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// One SSH session carrying forwarded channels.
pub struct SshTransport {
    handle: client::Handle<ClientHandler>,
    channels: mpsc::UnboundedReceiver<Channel<Msg>>,
}

impl SshTransport {
    /// Dial, authenticate, and request the remote listener.
    ///
    /// Returns only after the listener request succeeds, so a returned
    /// transport is fully operational.
    pub async fn connect(config: &Config) -> Result<Self> {
        let addr = resolve(&config.server_host, config.server_port).await?;

        let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(Error::from_connect_io)?;
        SocketOpts::default().apply(&stream)?;

        info!(
            "TCP connected to {}:{}",
            config.server_host, config.server_port
        );

        let ssh_config = Arc::new(client::Config {
            keepalive_interval: config.keepalive_interval(),
            keepalive_max: 3,
            ..Default::default()
        });

        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let handler = ClientHandler {
            channels: channel_tx,
        };

        let mut handle = tokio::time::timeout(
            config.connect_timeout(),
            client::connect_stream(ssh_config, stream, handler),
        )
        .await
        .map_err(|_| Error::ConnectionTimeout)?
        .map_err(|e| Error::HandshakeFailed(e.to_string()))?;

        let auth = handle
            .authenticate_password(&config.username, &config.password)
            .await
            .map_err(|e| Error::AuthFailed(e.to_string()))?;
        if !matches!(auth, AuthResult::Success) {
            return Err(Error::AuthFailed(format!(
                "server rejected password for '{}'",
                config.username
            )));
        }
        info!("SSH authenticated as '{}'", config.username);

        let _forwarded = handle
            .tcpip_forward("127.0.0.1", u32::from(config.forward_port))
            .await
            .map_err(|e| Error::ChannelOpenFailed(e.to_string()))?;
        info!(
            "Remote port forwarding active: 127.0.0.1:{} -> SOCKS5",
            config.forward_port
        );

        Ok(SshTransport {
            handle,
            channels: channel_rx,
        })
    }

    /// Forward accepted channels until shutdown or session death.
    pub async fn run(
        mut self,
        accept_tx: mpsc::UnboundedSender<Box<dyn ByteChannel>>,
        mut shutdown: broadcast::Receiver<bool>,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("SSH transport shutting down");
                    let _ = self
                        .handle
                        .disconnect(Disconnect::ByApplication, "shutdown", "en")
                        .await;
                    return Ok(());
                }
                accepted = self.channels.recv() => match accepted {
                    Some(channel) => {
                        debug!("Accepted forwarded-tcpip channel");
                        if accept_tx.send(Box::new(SshChannel::new(channel))).is_err() {
                            return Ok(());
                        }
                    }
                    // The handler only drops when the russh session task died
                    None => {
                        warn!("SSH session terminated unexpectedly");
                        return Err(Error::Disconnected);
                    }
                }
            }
        }
    }
}

struct ClientHandler {
    channels: mpsc::UnboundedSender<Channel<Msg>>,
}

impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        // Trust-all policy: log the fingerprint, accept
        debug!(
            "SSH server host key: {}",
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(
            "forwarded-tcpip channel from {}:{} via {}:{}",
            originator_address, originator_port, connected_address, connected_port
        );
        let _ = self.channels.send(channel);
        Ok(())
    }
}
