//! Framed multiplexing over TLS
//!
//! The TLS transport variant carries channels inside a custom framed
//! protocol instead of SSH: fixed 8-byte headers, peer-initiated channel
//! open, per-channel flow-control windows, and Ping/Pong keepalives.

pub mod channel;
pub mod frame;
pub mod session;

pub use channel::MuxChannel;
pub use frame::{Frame, FrameCodec, FrameType, FLAG_FIN, FLAG_RST, FRAME_HEADER_SIZE, MAX_FRAME_PAYLOAD};
pub use session::{run_mux_session, MuxConfig};
