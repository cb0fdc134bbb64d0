//! SOCKS5 protocol constants (RFC 1928)

/// SOCKS5 protocol version
pub const VERSION: u8 = 0x05;

// Authentication methods
/// No authentication required
pub const AUTH_NONE: u8 = 0x00;
/// No acceptable methods
pub const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

// Commands
/// TCP CONNECT command (the only one we execute)
pub const CMD_CONNECT: u8 = 0x01;

// Address types
/// IPv4 address
pub const ATYP_IPV4: u8 = 0x01;
/// Domain name
pub const ATYP_DOMAIN: u8 = 0x03;
/// IPv6 address
pub const ATYP_IPV6: u8 = 0x04;

// Reply codes
/// Succeeded
pub const REP_SUCCESS: u8 = 0x00;
/// General SOCKS server failure
pub const REP_GENERAL_FAILURE: u8 = 0x01;
/// Connection not allowed by ruleset
pub const REP_CONNECTION_NOT_ALLOWED: u8 = 0x02;
/// Network unreachable
pub const REP_NETWORK_UNREACHABLE: u8 = 0x03;
/// Host unreachable
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
/// Connection refused
pub const REP_CONNECTION_REFUSED: u8 = 0x05;
/// TTL expired
pub const REP_TTL_EXPIRED: u8 = 0x06;
/// Command not supported
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
/// Address type not supported
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Reserved byte value (always 0x00)
pub const RESERVED: u8 = 0x00;

/// Maximum domain name length in a CONNECT request
pub const MAX_DOMAIN_LEN: usize = 255;
