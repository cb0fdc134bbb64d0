//! Session manager
//!
//! Owns the tunnel transport and the lifecycle the embedder sees: a
//! blocking-style [`start`] that only returns once the tunnel is live, a
//! non-blocking [`ProxyHandle::cancel`], and a monotone
//! [`ProxyHandle::is_connected`] latch that never re-latches true within
//! one handle.

use crate::channel::ByteChannel;
use crate::config::{Config, TransportType};
use crate::error::Result;
use crate::logging;
use crate::mux::{run_mux_session, MuxConfig};
use crate::session::Socks5Session;
use crate::transport::{SocketOpts, SshTransport, TlsTransport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Handle to a running proxy instance.
#[derive(Debug)]
pub struct ProxyHandle {
    connected: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<bool>,
}

impl ProxyHandle {
    /// Ask the transport to stop. Returns immediately; idempotent.
    pub fn cancel(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    /// True while the tunnel session is live. Once false, stays false.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Dial, authenticate, and request the remote listener, then serve
/// accepted channels until canceled or the session drops.
///
/// Startup failures surface as typed errors; failures after a successful
/// start are observable through [`ProxyHandle::is_connected`] and the log
/// ring. The proxy never reconnects on its own.
pub async fn start(config: Config) -> Result<ProxyHandle> {
    config.validate()?;
    logging::set_min_level(config.log_level);

    let (shutdown_tx, _) = broadcast::channel(1);
    let (accept_tx, mut accept_rx) = mpsc::unbounded_channel::<Box<dyn ByteChannel>>();

    let transport_task = match config.transport {
        TransportType::Ssh => {
            let transport = SshTransport::connect(&config).await?;
            tokio::spawn(transport.run(accept_tx, shutdown_tx.subscribe()))
        }
        TransportType::Tls => {
            let tls = TlsTransport::with_config(&config.tls, SocketOpts::default())?
                .with_connect_timeout(config.connect_timeout());
            let stream = tls.connect(&config.server_host, config.server_port).await?;
            let mux_config = MuxConfig {
                initial_window: config.tls.initial_window,
                keepalive: config.keepalive_interval(),
            };
            tokio::spawn(run_mux_session(
                stream,
                mux_config,
                accept_tx,
                shutdown_tx.subscribe(),
            ))
        }
    };

    let connected = Arc::new(AtomicBool::new(true));
    info!(
        "Tunnel established to {}:{}; remote SOCKS5 listener on port {}",
        config.server_host, config.server_port, config.forward_port
    );

    // One SOCKS5 session task per accepted channel; a failing session only
    // takes down its own channel
    let connect_timeout = config.connect_timeout();
    tokio::spawn(async move {
        while let Some(channel) = accept_rx.recv().await {
            let session = Socks5Session::new(channel, connect_timeout);
            tokio::spawn(async move {
                let _ = session.run().await;
            });
        }
        debug!("Accept queue closed");
    });

    // Disconnect watcher: drops the latch exactly once
    {
        let connected = connected.clone();
        tokio::spawn(async move {
            match transport_task.await {
                Ok(Ok(())) => info!("Tunnel closed"),
                Ok(Err(e)) => warn!("Tunnel disconnected: {}", e),
                Err(e) => warn!("Transport task failed: {}", e),
            }
            connected.store(false, Ordering::SeqCst);
        });
    }

    Ok(ProxyHandle {
        connected,
        shutdown_tx,
    })
}
