//! SOCKS5 wire codec
//!
//! Pure functions over byte slices. All parsers follow the same contract:
//! [`Parse::Incomplete`] when the buffer holds only a prefix of a message,
//! [`Parse::Invalid`] when the prefix can never become a valid message, and
//! [`Parse::Complete`] with the byte count the caller must drain.

use crate::socks5::consts::*;
use crate::socks5::types::{ConnectRequest, MethodRequest, Parse, ParseError, TargetAddr};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Parse a method selection message.
///
/// ```text
/// +----+----------+----------+
/// |VER | NMETHODS | METHODS  |
/// +----+----------+----------+
/// | 1  |    1     | 1 to 255 |
/// +----+----------+----------+
/// ```
pub fn parse_method_request(data: &[u8]) -> Parse<MethodRequest> {
    if data.len() < 2 {
        return Parse::Incomplete;
    }
    if data[0] != VERSION {
        return Parse::Invalid(ParseError::BadVersion);
    }

    let nmethods = data[1] as usize;
    let total = 2 + nmethods;
    if data.len() < total {
        return Parse::Incomplete;
    }

    let supports_no_auth = data[2..total].contains(&AUTH_NONE);
    Parse::Complete {
        consumed: total,
        value: MethodRequest { supports_no_auth },
    }
}

/// Build a method selection response (VER + METHOD).
pub fn build_method_response(method: u8) -> [u8; 2] {
    [VERSION, method]
}

/// Parse a CONNECT request.
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// The command byte is carried through unexamined; callers reply with
/// COMMAND_NOT_SUPPORTED for anything other than CONNECT.
pub fn parse_connect_request(data: &[u8]) -> Parse<ConnectRequest> {
    if data.len() < 4 {
        return Parse::Incomplete;
    }
    if data[0] != VERSION {
        return Parse::Invalid(ParseError::BadVersion);
    }

    let command = data[1];
    let atyp = data[3];

    let addr_len = match atyp {
        ATYP_IPV4 => 4,
        ATYP_DOMAIN => {
            if data.len() < 5 {
                return Parse::Incomplete;
            }
            1 + data[4] as usize
        }
        ATYP_IPV6 => 16,
        other => return Parse::Invalid(ParseError::UnknownAddrType(other)),
    };

    let total = 4 + addr_len + 2;
    if data.len() < total {
        return Parse::Incomplete;
    }

    let addr = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&data[4..8]);
            TargetAddr::V4(Ipv4Addr::from(octets))
        }
        ATYP_DOMAIN => {
            let len = data[4] as usize;
            let bytes = &data[5..5 + len];
            TargetAddr::Domain(String::from_utf8_lossy(bytes).into_owned())
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[4..20]);
            TargetAddr::V6(Ipv6Addr::from(octets))
        }
        _ => unreachable!(),
    };

    let port = u16::from_be_bytes([data[total - 2], data[total - 1]]);

    Parse::Complete {
        consumed: total,
        value: ConnectRequest {
            command,
            addr,
            port,
        },
    }
}

/// Build a CONNECT reply (VER + REP + RSV + ATYP + BND.ADDR + BND.PORT).
///
/// With no bind address the reply carries IPv4 0.0.0.0:0.
pub fn build_connect_reply(reply_code: u8, bind_addr: Option<SocketAddr>) -> Vec<u8> {
    let bind_addr =
        bind_addr.unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));

    let mut reply = vec![VERSION, reply_code, RESERVED];
    match bind_addr {
        SocketAddr::V4(addr) => {
            reply.push(ATYP_IPV4);
            reply.extend_from_slice(&addr.ip().octets());
        }
        SocketAddr::V6(addr) => {
            reply.push(ATYP_IPV6);
            reply.extend_from_slice(&addr.ip().octets());
        }
    }
    reply.extend_from_slice(&bind_addr.port().to_be_bytes());
    reply
}
