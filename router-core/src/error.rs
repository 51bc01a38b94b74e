//
// error.rs - Router error taxonomy
//
// Purpose:
//   Internal error type for the header codec and the dispatch path. Every variant here is
//   recovered locally by the caller (drop the frame, or emit an ICMP message); none of them
//   cross the `receive()` boundary, so this is a plain enum rather than anything wired into
//   a `?`-propagating public API.
//

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterError {
    ShortFrame,
    BadChecksum,
    UnknownEtherType(u16),
    UnknownIpProtocol(u8),
    UnknownArpOpcode(u16),
    NoRoute,
    TtlExpired,
    ArpUnresolved,
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouterError::ShortFrame => write!(f, "frame shorter than required header size"),
            RouterError::BadChecksum => write!(f, "header checksum did not validate"),
            RouterError::UnknownEtherType(t) => write!(f, "unknown EtherType 0x{t:04x}"),
            RouterError::UnknownIpProtocol(p) => write!(f, "unknown IP protocol {p}"),
            RouterError::UnknownArpOpcode(op) => write!(f, "unknown ARP opcode {op}"),
            RouterError::NoRoute => write!(f, "no matching route"),
            RouterError::TtlExpired => write!(f, "TTL expired"),
            RouterError::ArpUnresolved => write!(f, "ARP resolution exhausted its retries"),
        }
    }
}

impl std::error::Error for RouterError {}
