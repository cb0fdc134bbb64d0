//! Mux frame codec
//!
//! Wire format: an 8-byte little-endian header followed by the payload.
//!
//! ```text
//! +------+-------+------------+----------------+---------+
//! | type | flags | channel id | payload length | payload |
//! +------+-------+------------+----------------+---------+
//! |  1   |   1   |   2 (LE)   |     4 (LE)     |  0..64K |
//! +------+-------+------------+----------------+---------+
//! ```

use crate::error::{Error, Result};
use bytes::{Buf, BytesMut};

/// Size of the fixed frame header
pub const FRAME_HEADER_SIZE: usize = 8;
/// Maximum payload carried by one frame
pub const MAX_FRAME_PAYLOAD: usize = 65536;

/// Graceful half-close
pub const FLAG_FIN: u8 = 0x01;
/// Abrupt reset
pub const FLAG_RST: u8 = 0x02;

/// Frame types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Server opens a channel for an inbound connection
    ChannelOpen = 0x01,
    /// Channel open acknowledged
    ChannelOpenAck = 0x02,
    /// SOCKS5 bytes toward the client
    ChannelRequest = 0x03,
    /// SOCKS5 bytes toward the server
    ChannelRequestAck = 0x04,
    /// Relay payload
    Data = 0x05,
    /// Channel teardown (honors FIN / RST flags)
    ChannelClose = 0x06,
    /// Teardown acknowledged
    ChannelCloseAck = 0x07,
    /// Liveness probe
    Ping = 0x08,
    /// Probe answer
    Pong = 0x09,
    /// Flow-control credit (payload: 4-byte LE increment)
    WindowUpdate = 0x0A,
}

impl FrameType {
    /// Decode a wire type byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x01 => Some(FrameType::ChannelOpen),
            0x02 => Some(FrameType::ChannelOpenAck),
            0x03 => Some(FrameType::ChannelRequest),
            0x04 => Some(FrameType::ChannelRequestAck),
            0x05 => Some(FrameType::Data),
            0x06 => Some(FrameType::ChannelClose),
            0x07 => Some(FrameType::ChannelCloseAck),
            0x08 => Some(FrameType::Ping),
            0x09 => Some(FrameType::Pong),
            0x0A => Some(FrameType::WindowUpdate),
            _ => None,
        }
    }
}

/// One decoded or to-be-encoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw type byte (see [`FrameType`])
    pub frame_type: u8,
    /// FIN / RST flags
    pub flags: u8,
    /// Channel this frame belongs to (0 for Ping/Pong)
    pub channel_id: u16,
    /// Frame payload
    pub payload: Vec<u8>,
}

impl Frame {
    fn new(frame_type: FrameType, flags: u8, channel_id: u16, payload: Vec<u8>) -> Self {
        Frame {
            frame_type: frame_type as u8,
            flags,
            channel_id,
            payload,
        }
    }

    /// Encode into wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.push(self.frame_type);
        buf.push(self.flags);
        buf.extend_from_slice(&self.channel_id.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// ChannelOpenAck for `channel_id`.
    pub fn open_ack(channel_id: u16) -> Self {
        Frame::new(FrameType::ChannelOpenAck, 0, channel_id, Vec::new())
    }

    /// SOCKS5 handshake bytes toward the server.
    pub fn request_ack(channel_id: u16, data: Vec<u8>) -> Self {
        Frame::new(FrameType::ChannelRequestAck, 0, channel_id, data)
    }

    /// Relay payload.
    pub fn data(channel_id: u16, data: Vec<u8>) -> Self {
        Frame::new(FrameType::Data, 0, channel_id, data)
    }

    /// Channel teardown with the given flags.
    pub fn close(channel_id: u16, flags: u8) -> Self {
        Frame::new(FrameType::ChannelClose, flags, channel_id, Vec::new())
    }

    /// Teardown acknowledgement.
    pub fn close_ack(channel_id: u16) -> Self {
        Frame::new(FrameType::ChannelCloseAck, 0, channel_id, Vec::new())
    }

    /// Liveness probe.
    pub fn ping() -> Self {
        Frame::new(FrameType::Ping, 0, 0, Vec::new())
    }

    /// Probe answer.
    pub fn pong() -> Self {
        Frame::new(FrameType::Pong, 0, 0, Vec::new())
    }

    /// Flow-control credit.
    pub fn window_update(channel_id: u16, increment: u32) -> Self {
        Frame::new(
            FrameType::WindowUpdate,
            0,
            channel_id,
            increment.to_le_bytes().to_vec(),
        )
    }
}

/// Accumulates wire bytes and emits complete frames.
#[derive(Default)]
pub struct FrameCodec {
    buf: BytesMut,
}

impl FrameCodec {
    /// Create an empty codec.
    pub fn new() -> Self {
        FrameCodec::default()
    }

    /// Feed raw bytes; complete frames are appended to `out`.
    ///
    /// A header announcing a payload larger than [`MAX_FRAME_PAYLOAD`] is a
    /// protocol violation: the accumulator is reset and the error ends the
    /// session.
    pub fn feed(&mut self, data: &[u8], out: &mut Vec<Frame>) -> Result<()> {
        self.buf.extend_from_slice(data);

        while self.buf.len() >= FRAME_HEADER_SIZE {
            let payload_len = u32::from_le_bytes([
                self.buf[4],
                self.buf[5],
                self.buf[6],
                self.buf[7],
            ]) as usize;

            if payload_len > MAX_FRAME_PAYLOAD {
                self.buf.clear();
                return Err(Error::ProtocolError(format!(
                    "frame payload too large: {}",
                    payload_len
                )));
            }

            let total = FRAME_HEADER_SIZE + payload_len;
            if self.buf.len() < total {
                break;
            }

            let frame_type = self.buf[0];
            let flags = self.buf[1];
            let channel_id = u16::from_le_bytes([self.buf[2], self.buf[3]]);
            self.buf.advance(FRAME_HEADER_SIZE);
            let payload = self.buf.split_to(payload_len).to_vec();

            out.push(Frame {
                frame_type,
                flags,
                channel_id,
                payload,
            });
        }

        Ok(())
    }
}
