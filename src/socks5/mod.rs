//! SOCKS5 protocol support
//!
//! This module implements the subset of RFC 1928 the proxy terminates on
//! tunnel channels: method negotiation and the CONNECT request. Parsing is
//! incremental and slice-based so callers can accumulate partial messages
//! from the wire and re-run the parser as bytes arrive.

pub mod codec;
pub mod consts;
pub mod types;

pub use codec::{
    build_connect_reply, build_method_response, parse_connect_request, parse_method_request,
};
pub use types::{ConnectRequest, MethodRequest, Parse, ParseError, TargetAddr};
