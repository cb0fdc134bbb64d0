//! Revsocks - Reverse SOCKS5 proxy over a secure tunnel
//!
//! This is the main entry point for the revsocks binary.

use anyhow::Result;
use clap::Parser;
use revsocks::config::{Config, TlsOptions, TransportType};
use revsocks::logging::{LogLevel, RingLayer};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Reverse SOCKS5 proxy over an SSH or TLS tunnel
#[derive(Parser, Debug)]
#[command(name = "revsocks")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file; flags below are ignored if set
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server hostname or IP
    #[arg(long)]
    server: Option<String>,

    /// Server port
    #[arg(long, default_value_t = 22)]
    port: u16,

    /// Username
    #[arg(short, long)]
    username: Option<String>,

    /// Password
    #[arg(short, long)]
    password: Option<String>,

    /// Port to forward on the server's loopback
    #[arg(short = 'f', long, default_value_t = 1080)]
    forward_port: u16,

    /// TCP + handshake connect timeout in milliseconds
    #[arg(long, default_value_t = 10_000)]
    connect_timeout: u64,

    /// Keepalive interval in milliseconds (0 disables)
    #[arg(long, default_value_t = 30_000)]
    keepalive_ms: u64,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: LogLevel,

    /// Use the TLS framed-mux transport instead of SSH
    #[arg(long)]
    tls: bool,

    /// Accept any TLS server certificate (testing only)
    #[arg(long)]
    tls_skip_verify: bool,
}

impl Args {
    fn into_config(self) -> Result<Config> {
        if let Some(path) = &self.config {
            return Ok(revsocks::load_config(path)?);
        }

        let (Some(server_host), Some(username), Some(password)) =
            (self.server, self.username, self.password)
        else {
            anyhow::bail!("--server, --username, and --password are required without --config");
        };

        Ok(Config {
            server_host,
            server_port: self.port,
            username,
            password,
            forward_port: self.forward_port,
            connect_timeout_ms: self.connect_timeout,
            keepalive_interval_ms: self.keepalive_ms,
            log_level: self.log_level,
            transport: if self.tls {
                TransportType::Tls
            } else {
                TransportType::Ssh
            },
            tls: TlsOptions {
                skip_verify: self.tls_skip_verify,
                ..Default::default()
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.log_level)?;

    let config = args.into_config()?;

    info!("revsocks v{}", revsocks::VERSION);
    info!(
        "Connecting to {}:{} as '{}'",
        config.server_host, config.server_port, config.username
    );

    let handle = revsocks::start(config).await?;

    // Run until interrupted or the tunnel drops
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
            _ = wait_disconnected(&handle) => {
                warn!("Tunnel dropped; exiting (reconnect policy belongs to the caller)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
            }
            _ = wait_disconnected(&handle) => {
                warn!("Tunnel dropped; exiting (reconnect policy belongs to the caller)");
            }
        }
    }

    handle.cancel();
    info!("Client stopped");
    Ok(())
}

async fn wait_disconnected(handle: &revsocks::ProxyHandle) {
    while handle.is_connected() {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }
}

/// Route tracing output to stderr and mirror it into the log ring.
fn setup_logging(level: LogLevel) -> Result<()> {
    let max_level = match level {
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::filter::LevelFilter::from_level(max_level))
        .with(RingLayer)
        .init();

    Ok(())
}
