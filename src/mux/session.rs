//! Mux session
//!
//! Runs the framed multiplex protocol over one TLS stream: a read loop
//! feeds the frame codec and dispatches frames to channels by id, while a
//! writer task drains the ordered outbound queue so encrypted writes are
//! serialized. Channel open is peer-initiated; accepted channels are handed
//! to the caller through `accept_tx`.

use super::channel::{ChannelEvent, MuxChannel, WindowState};
use super::frame::{Frame, FrameCodec, FrameType, FLAG_RST};
use crate::channel::ByteChannel;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Mux session tuning
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Initial per-channel flow-control window in bytes
    pub initial_window: u32,
    /// Ping cadence; `None` disables keepalives
    pub keepalive: Option<Duration>,
}

struct ChannelEntry {
    events: mpsc::UnboundedSender<ChannelEvent>,
    window: Arc<WindowState>,
}

type Registry = Arc<RwLock<HashMap<u16, ChannelEntry>>>;

/// Run the mux protocol until shutdown or session failure.
///
/// Accepted channels are sent through `accept_tx`; the caller spawns a
/// SOCKS5 session per channel. Returns `Ok(())` on requested shutdown and
/// the failure reason otherwise.
pub async fn run_mux_session<S>(
    stream: S,
    config: MuxConfig,
    accept_tx: mpsc::UnboundedSender<Box<dyn ByteChannel>>,
    mut shutdown: broadcast::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();

    // Sole writer of the encrypted stream; frame order on the wire is the
    // order frames entered the queue.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if write_half.write_all(&frame.encode()).await.is_err() {
                break;
            }
            if write_half.flush().await.is_err() {
                break;
            }
        }
    });

    let registry: Registry = Arc::new(RwLock::new(HashMap::new()));
    let mut codec = FrameCodec::new();
    let mut buf = vec![0u8; 16 * 1024];

    let keepalive_enabled = config.keepalive.is_some();
    let period = config.keepalive.unwrap_or(Duration::from_secs(86_400));
    let mut ping_timer =
        tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    let result = loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("Mux session shutting down");
                break Ok(());
            }
            _ = ping_timer.tick(), if keepalive_enabled => {
                debug!("Sending keepalive ping");
                if outbound_tx.send(Frame::ping()).is_err() {
                    break Err(Error::Disconnected);
                }
            }
            read = read_half.read(&mut buf) => {
                let n = match read {
                    Ok(0) => break Err(Error::Disconnected),
                    Ok(n) => n,
                    Err(e) => {
                        warn!("Mux transport read failed: {}", e);
                        break Err(Error::Disconnected);
                    }
                };

                let mut frames = Vec::new();
                if let Err(e) = codec.feed(&buf[..n], &mut frames) {
                    warn!("Mux framing violation: {}", e);
                    break Err(e);
                }
                for frame in frames {
                    dispatch(frame, &registry, &outbound_tx, &accept_tx, &config);
                }
            }
        }
    };

    close_all_channels(&registry);
    writer.abort();
    result
}

fn dispatch(
    frame: Frame,
    registry: &Registry,
    outbound: &mpsc::UnboundedSender<Frame>,
    accept_tx: &mpsc::UnboundedSender<Box<dyn ByteChannel>>,
    config: &MuxConfig,
) {
    let id = frame.channel_id;

    match FrameType::from_u8(frame.frame_type) {
        Some(FrameType::ChannelOpen) => {
            debug!("ChannelOpen for channel {}", id);

            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let window = Arc::new(WindowState::new(config.initial_window));
            {
                let mut reg = registry.write().unwrap();
                if reg
                    .insert(
                        id,
                        ChannelEntry {
                            events: event_tx,
                            window: window.clone(),
                        },
                    )
                    .is_some()
                {
                    warn!("ChannelOpen reused live channel id {}", id);
                }
            }

            let _ = outbound.send(Frame::open_ack(id));

            let channel =
                MuxChannel::new(id, event_rx, outbound.clone(), window, config.initial_window);
            if accept_tx.send(Box::new(channel)).is_err() {
                debug!("Accept side gone, dropping channel {}", id);
                registry.write().unwrap().remove(&id);
            }
        }
        Some(FrameType::ChannelRequest) | Some(FrameType::Data) => {
            let reg = registry.read().unwrap();
            match reg.get(&id) {
                Some(entry) => {
                    let _ = entry.events.send(ChannelEvent::Payload(frame.payload));
                }
                None => debug!("Payload for unknown channel {}", id),
            }
        }
        Some(FrameType::ChannelClose) => {
            debug!("ChannelClose for channel {} (flags=0x{:02X})", id, frame.flags);
            let _ = outbound.send(Frame::close_ack(id));
            if let Some(entry) = registry.write().unwrap().remove(&id) {
                let _ = entry.events.send(ChannelEvent::Close {
                    rst: frame.flags & FLAG_RST != 0,
                });
            }
        }
        Some(FrameType::ChannelCloseAck) => {
            debug!("ChannelCloseAck for channel {}", id);
            registry.write().unwrap().remove(&id);
        }
        Some(FrameType::Ping) => {
            debug!("Ping received, sending Pong");
            let _ = outbound.send(Frame::pong());
        }
        Some(FrameType::Pong) => {
            debug!("Pong received");
        }
        Some(FrameType::WindowUpdate) => {
            if frame.payload.len() < 4 {
                warn!("WindowUpdate with short payload on channel {}", id);
                return;
            }
            let increment = u32::from_le_bytes([
                frame.payload[0],
                frame.payload[1],
                frame.payload[2],
                frame.payload[3],
            ]);
            let reg = registry.read().unwrap();
            if let Some(entry) = reg.get(&id) {
                entry.window.add(increment);
            }
        }
        Some(FrameType::ChannelOpenAck) | Some(FrameType::ChannelRequestAck) => {
            debug!("Unexpected client-bound frame type 0x{:02X}", frame.frame_type);
        }
        None => {
            warn!("Unknown frame type: 0x{:02X}", frame.frame_type);
        }
    }
}

fn close_all_channels(registry: &Registry) {
    let mut reg = registry.write().unwrap();
    let count = reg.len();
    for (_, entry) in reg.drain() {
        let _ = entry.events.send(ChannelEvent::Close { rst: true });
    }
    if count > 0 {
        debug!("Closed all {} channels", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ByteChannel;
    use tokio::io::duplex;

    fn test_config() -> MuxConfig {
        MuxConfig {
            initial_window: 256 * 1024,
            keepalive: None,
        }
    }

    /// Feed the server side of the duplex pipe and collect what the session
    /// writes back.
    async fn read_frame(server: &mut (impl AsyncRead + Unpin)) -> Frame {
        let mut header = [0u8; 8];
        server.read_exact(&mut header).await.unwrap();
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let mut payload = vec![0u8; len];
        server.read_exact(&mut payload).await.unwrap();
        Frame {
            frame_type: header[0],
            flags: header[1],
            channel_id: u16::from_le_bytes([header[2], header[3]]),
            payload,
        }
    }

    #[tokio::test]
    async fn test_channel_open_is_acked_and_delivered() {
        let (client, mut server) = duplex(64 * 1024);
        let (accept_tx, mut accept_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let session = tokio::spawn(run_mux_session(
            client,
            test_config(),
            accept_tx,
            shutdown_rx,
        ));

        server
            .write_all(
                &Frame {
                    frame_type: FrameType::ChannelOpen as u8,
                    flags: 0,
                    channel_id: 5,
                    payload: Vec::new(),
                }
                .encode(),
            )
            .await
            .unwrap();

        let ack = read_frame(&mut server).await;
        assert_eq!(ack.frame_type, FrameType::ChannelOpenAck as u8);
        assert_eq!(ack.channel_id, 5);

        let channel = accept_rx.recv().await.unwrap();
        drop(channel);

        shutdown_tx.send(true).unwrap();
        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let (client, mut server) = duplex(64 * 1024);
        let (accept_tx, _accept_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let session = tokio::spawn(run_mux_session(
            client,
            test_config(),
            accept_tx,
            shutdown_rx,
        ));

        server.write_all(&Frame::ping().encode()).await.unwrap();

        let pong = read_frame(&mut server).await;
        assert_eq!(pong.frame_type, FrameType::Pong as u8);

        shutdown_tx.send(true).unwrap();
        session.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_request_payload_reaches_channel() {
        let (client, mut server) = duplex(64 * 1024);
        let (accept_tx, mut accept_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let _session = tokio::spawn(run_mux_session(
            client,
            test_config(),
            accept_tx,
            shutdown_rx,
        ));

        server
            .write_all(
                &Frame {
                    frame_type: FrameType::ChannelOpen as u8,
                    flags: 0,
                    channel_id: 1,
                    payload: Vec::new(),
                }
                .encode(),
            )
            .await
            .unwrap();
        let _ack = read_frame(&mut server).await;

        server
            .write_all(
                &Frame {
                    frame_type: FrameType::ChannelRequest as u8,
                    flags: 0,
                    channel_id: 1,
                    payload: vec![0x05, 0x01, 0x00],
                }
                .encode(),
            )
            .await
            .unwrap();

        let mut channel = accept_rx.recv().await.unwrap();
        let mut buf = [0u8; 16];
        let n = channel.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x05, 0x01, 0x00]);
    }

    #[tokio::test]
    async fn test_channel_close_is_acked() {
        let (client, mut server) = duplex(64 * 1024);
        let (accept_tx, mut accept_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let _session = tokio::spawn(run_mux_session(
            client,
            test_config(),
            accept_tx,
            shutdown_rx,
        ));

        server
            .write_all(
                &Frame {
                    frame_type: FrameType::ChannelOpen as u8,
                    flags: 0,
                    channel_id: 2,
                    payload: Vec::new(),
                }
                .encode(),
            )
            .await
            .unwrap();
        let _ack = read_frame(&mut server).await;
        let mut channel = accept_rx.recv().await.unwrap();

        server
            .write_all(&Frame::close(2, 0).encode())
            .await
            .unwrap();

        let close_ack = read_frame(&mut server).await;
        assert_eq!(close_ack.frame_type, FrameType::ChannelCloseAck as u8);
        assert_eq!(close_ack.channel_id, 2);

        // Plain close (no RST) reads as end of stream
        let mut buf = [0u8; 4];
        assert_eq!(channel.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_frame_ends_session() {
        let (client, mut server) = duplex(64 * 1024);
        let (accept_tx, _accept_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let session = tokio::spawn(run_mux_session(
            client,
            test_config(),
            accept_tx,
            shutdown_rx,
        ));

        let mut wire = vec![FrameType::Data as u8, 0, 0, 0];
        wire.extend_from_slice(&(super::super::frame::MAX_FRAME_PAYLOAD as u32 + 1).to_le_bytes());
        server.write_all(&wire).await.unwrap();

        let result = session.await.unwrap();
        assert!(matches!(result, Err(Error::ProtocolError(_))));
    }

    #[tokio::test]
    async fn test_peer_disconnect_ends_session() {
        let (client, server) = duplex(64 * 1024);
        let (accept_tx, _accept_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let session = tokio::spawn(run_mux_session(
            client,
            test_config(),
            accept_tx,
            shutdown_rx,
        ));

        drop(server);

        let result = session.await.unwrap();
        assert!(matches!(result, Err(Error::Disconnected)));
    }
}
