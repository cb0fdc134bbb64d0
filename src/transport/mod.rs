//! Tunnel transports
//!
//! Two interchangeable ways to carry channels to the server: an SSH session
//! with remote port forwarding ([`ssh`]) and a TLS connection running the
//! framed multiplex protocol ([`tls`] + [`crate::mux`]). Both dial and
//! authenticate before the manager reports success, then feed accepted
//! channels into the manager's accept queue.

pub mod ssh;
pub mod tls;

pub use ssh::SshTransport;
pub use tls::TlsTransport;

use std::time::Duration;
use tokio::net::TcpStream;

/// Socket options applied to the tunnel's TCP connection
#[derive(Debug, Clone)]
pub struct SocketOpts {
    /// Enable TCP_NODELAY
    pub nodelay: bool,
    /// TCP keepalive idle time
    pub keepalive_secs: Option<u64>,
    /// TCP keepalive probe interval
    pub keepalive_interval: Option<u64>,
}

impl Default for SocketOpts {
    fn default() -> Self {
        SocketOpts {
            nodelay: true,
            keepalive_secs: Some(30),
            keepalive_interval: Some(10),
        }
    }
}

impl SocketOpts {
    /// Apply the options to a connected stream.
    pub fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(self.nodelay)?;

        if let (Some(timeout), Some(interval)) = (self.keepalive_secs, self.keepalive_interval) {
            let socket = socket2::SockRef::from(stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(timeout))
                .with_interval(Duration::from_secs(interval));
            socket.set_tcp_keepalive(&keepalive)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_socket_opts_default() {
        let opts = SocketOpts::default();
        assert!(opts.nodelay);
        assert_eq!(opts.keepalive_secs, Some(30));
        assert_eq!(opts.keepalive_interval, Some(10));
    }

    #[tokio::test]
    async fn test_socket_opts_apply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();

        SocketOpts::default().apply(&stream).unwrap();
        assert!(stream.nodelay().unwrap());
    }
}
