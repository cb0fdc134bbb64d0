//! Mux channel
//!
//! [`MuxChannel`] adapts one multiplexed stream to the [`ByteChannel`]
//! contract. Inbound payload arrives from the session's dispatch loop over
//! an event queue; outbound frames go into the session's ordered write
//! queue. Writes before the relay split travel as ChannelRequestAck (SOCKS5
//! handshake bytes); writes after it travel as Data and are paced by the
//! send window.

use super::frame::{Frame, FLAG_FIN, FLAG_RST, MAX_FRAME_PAYLOAD};
use crate::channel::{ByteChannel, ChannelReader, ChannelWriter};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tracing::debug;

/// Inbound event delivered by the session's dispatch loop.
#[derive(Debug)]
pub(crate) enum ChannelEvent {
    /// Payload bytes (ChannelRequest or Data)
    Payload(Vec<u8>),
    /// Peer sent ChannelClose; `rst` when the RST flag was set
    Close { rst: bool },
}

/// Send-window credit shared between the write half and the dispatch loop.
pub(crate) struct WindowState {
    available: Mutex<u32>,
    notify: Notify,
}

impl WindowState {
    pub(crate) fn new(initial: u32) -> Self {
        WindowState {
            available: Mutex::new(initial),
            notify: Notify::new(),
        }
    }

    /// Credit the window (peer WindowUpdate) and wake a blocked writer.
    pub(crate) fn add(&self, increment: u32) {
        {
            let mut avail = self.available.lock().unwrap();
            *avail = avail.saturating_add(increment);
        }
        // At most one writer waits per channel. notify_one stores a permit,
        // so a credit landing between the writer's availability check and
        // its await is not lost; notify_waiters would drop it.
        self.notify.notify_one();
    }

    /// Take up to `want` bytes of credit, waiting until some is available.
    async fn acquire(&self, want: u32) -> u32 {
        loop {
            {
                let mut avail = self.available.lock().unwrap();
                if *avail > 0 {
                    let n = want.min(*avail);
                    *avail -= n;
                    return n;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Flags shared between the two halves after a split.
#[derive(Default)]
struct CloseFlags {
    eof_sent: AtomicBool,
    closed: AtomicBool,
}

/// One multiplexed channel.
pub struct MuxChannel {
    id: u16,
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    pending: Vec<u8>,
    outbound: mpsc::UnboundedSender<Frame>,
    window: Arc<WindowState>,
    initial_window: u32,
    recv_consumed: u32,
    eof_seen: bool,
    flags: Arc<CloseFlags>,
}

impl MuxChannel {
    pub(crate) fn new(
        id: u16,
        inbound: mpsc::UnboundedReceiver<ChannelEvent>,
        outbound: mpsc::UnboundedSender<Frame>,
        window: Arc<WindowState>,
        initial_window: u32,
    ) -> Self {
        MuxChannel {
            id,
            inbound,
            pending: Vec::new(),
            outbound,
            window,
            initial_window,
            recv_consumed: 0,
            eof_seen: false,
            flags: Arc::new(CloseFlags::default()),
        }
    }

    /// Channel identifier on the wire.
    pub fn id(&self) -> u16 {
        self.id
    }

    fn send_frame(&self, frame: Frame) -> Result<()> {
        self.outbound.send(frame).map_err(|_| Error::ChannelClosed)
    }
}

/// Drain `pending` first, then pull the next inbound event. Replenishes the
/// peer's view of our receive window once half the initial window has been
/// consumed.
struct ReadState<'a> {
    inbound: &'a mut mpsc::UnboundedReceiver<ChannelEvent>,
    pending: &'a mut Vec<u8>,
    recv_consumed: &'a mut u32,
    initial_window: u32,
    eof_seen: &'a mut bool,
    id: u16,
    outbound: &'a mpsc::UnboundedSender<Frame>,
}

async fn read_inbound(state: ReadState<'_>, buf: &mut [u8]) -> Result<usize> {
    if *state.eof_seen {
        return Ok(0);
    }

    if state.pending.is_empty() {
        match state.inbound.recv().await {
            Some(ChannelEvent::Payload(bytes)) => *state.pending = bytes,
            Some(ChannelEvent::Close { rst: false }) => {
                *state.eof_seen = true;
                return Ok(0);
            }
            Some(ChannelEvent::Close { rst: true }) | None => {
                return Err(Error::ChannelClosed);
            }
        }
    }

    let n = state.pending.len().min(buf.len());
    buf[..n].copy_from_slice(&state.pending[..n]);
    state.pending.drain(..n);

    *state.recv_consumed += n as u32;
    if *state.recv_consumed >= state.initial_window / 2 {
        let _ = state
            .outbound
            .send(Frame::window_update(state.id, *state.recv_consumed));
        *state.recv_consumed = 0;
    }

    Ok(n)
}

#[async_trait]
impl ByteChannel for MuxChannel {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        read_inbound(
            ReadState {
                inbound: &mut self.inbound,
                pending: &mut self.pending,
                recv_consumed: &mut self.recv_consumed,
                initial_window: self.initial_window,
                eof_seen: &mut self.eof_seen,
                id: self.id,
                outbound: &self.outbound,
            },
            buf,
        )
        .await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        // Handshake phase: SOCKS5 bytes toward the server, not windowed
        if self.flags.eof_sent.load(Ordering::SeqCst) || self.flags.closed.load(Ordering::SeqCst)
        {
            return Err(Error::ChannelClosed);
        }
        self.send_frame(Frame::request_ack(self.id, data.to_vec()))
    }

    async fn send_eof(&mut self) -> Result<()> {
        if !self.flags.eof_sent.swap(true, Ordering::SeqCst) {
            self.send_frame(Frame::close(self.id, FLAG_FIN))?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.flags.closed.swap(true, Ordering::SeqCst)
            && !self.flags.eof_sent.swap(true, Ordering::SeqCst)
        {
            debug!("Channel {}: reset", self.id);
            let _ = self.send_frame(Frame::close(self.id, FLAG_RST));
        }
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.eof_seen
    }

    fn into_split(self: Box<Self>) -> (Box<dyn ChannelReader>, Box<dyn ChannelWriter>) {
        let reader = MuxChannelReader {
            id: self.id,
            inbound: self.inbound,
            pending: self.pending,
            recv_consumed: self.recv_consumed,
            initial_window: self.initial_window,
            eof_seen: self.eof_seen,
            outbound: self.outbound.clone(),
        };
        let writer = MuxChannelWriter {
            id: self.id,
            outbound: self.outbound,
            window: self.window,
            flags: self.flags,
        };
        (Box::new(reader), Box::new(writer))
    }
}

struct MuxChannelReader {
    id: u16,
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    pending: Vec<u8>,
    recv_consumed: u32,
    initial_window: u32,
    eof_seen: bool,
    outbound: mpsc::UnboundedSender<Frame>,
}

#[async_trait]
impl ChannelReader for MuxChannelReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        read_inbound(
            ReadState {
                inbound: &mut self.inbound,
                pending: &mut self.pending,
                recv_consumed: &mut self.recv_consumed,
                initial_window: self.initial_window,
                eof_seen: &mut self.eof_seen,
                id: self.id,
                outbound: &self.outbound,
            },
            buf,
        )
        .await
    }
}

struct MuxChannelWriter {
    id: u16,
    outbound: mpsc::UnboundedSender<Frame>,
    window: Arc<WindowState>,
    flags: Arc<CloseFlags>,
}

#[async_trait]
impl ChannelWriter for MuxChannelWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        // Relay phase: Data frames, paced by the send window and chunked to
        // the payload cap
        if self.flags.eof_sent.load(Ordering::SeqCst) || self.flags.closed.load(Ordering::SeqCst)
        {
            return Err(Error::ChannelClosed);
        }

        let mut offset = 0;
        while offset < data.len() {
            let want = (data.len() - offset).min(MAX_FRAME_PAYLOAD) as u32;
            // The session dropping its write queue must unblock a writer
            // waiting for credit
            let granted = tokio::select! {
                granted = self.window.acquire(want) => granted as usize,
                _ = self.outbound.closed() => return Err(Error::ChannelClosed),
            };
            let chunk = data[offset..offset + granted].to_vec();
            self.outbound
                .send(Frame::data(self.id, chunk))
                .map_err(|_| Error::ChannelClosed)?;
            offset += granted;
        }
        Ok(())
    }

    async fn send_eof(&mut self) -> Result<()> {
        if !self.flags.eof_sent.swap(true, Ordering::SeqCst) {
            self.outbound
                .send(Frame::close(self.id, FLAG_FIN))
                .map_err(|_| Error::ChannelClosed)?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.flags.closed.swap(true, Ordering::SeqCst)
            && !self.flags.eof_sent.swap(true, Ordering::SeqCst)
        {
            let _ = self.outbound.send(Frame::close(self.id, FLAG_RST));
        }
        Ok(())
    }
}
