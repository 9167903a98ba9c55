// ── Wire protocol ──
//
// ASCII, pipe-delimited datagrams. Discovery traffic carries the shared
// passcode in its second field; per-device exchange traffic is prefixed
// with a monotonically increasing sequence number instead.

mod directive;
mod discovery;
mod exchange;

pub use directive::{Directive, FlashTarget};
pub use discovery::{DiscoveryMessage, parse_discovery};
pub use exchange::{FanProfile, Frame, HandshakeDescriptor, Payload, Reply, parse_reply};

use thiserror::Error;

/// Field separator used by every message.
pub const SEPARATOR: char = '|';

/// Why a datagram could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("datagram is not valid ASCII")]
    NotAscii,

    #[error("datagram is empty")]
    Empty,

    #[error("expected at least {expected} fields, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("unknown message source {0:?}")]
    UnknownSource(String),

    #[error("unknown message kind {0:?}")]
    UnknownKind(String),

    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("port {field} out of range: {value}")]
    PortOutOfRange { field: &'static str, value: i64 },

    #[error("unexpected field count {0}")]
    FieldCount(usize),
}

/// Decode a datagram into its pipe-separated fields.
pub(crate) fn split_fields(datagram: &[u8]) -> Result<Vec<&str>, ProtocolError> {
    if datagram.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if !datagram.is_ascii() {
        return Err(ProtocolError::NotAscii);
    }
    let text = std::str::from_utf8(datagram).map_err(|_| ProtocolError::NotAscii)?;
    Ok(text.split(SEPARATOR).collect())
}

pub(crate) fn parse_port(field: &'static str, raw: &str) -> Result<u16, ProtocolError> {
    let value: i64 = raw.trim().parse().map_err(|_| ProtocolError::InvalidField {
        field,
        value: raw.to_owned(),
    })?;
    match u16::try_from(value) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ProtocolError::PortOutOfRange { field, value }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn port_bounds_are_enforced() {
        assert_eq!(parse_port("p", "1").unwrap(), 1);
        assert_eq!(parse_port("p", "65535").unwrap(), 65535);
        assert!(matches!(
            parse_port("p", "0"),
            Err(ProtocolError::PortOutOfRange { value: 0, .. })
        ));
        assert!(matches!(
            parse_port("p", "65536"),
            Err(ProtocolError::PortOutOfRange { value: 65536, .. })
        ));
        assert!(matches!(
            parse_port("p", "-4"),
            Err(ProtocolError::PortOutOfRange { .. })
        ));
        assert!(matches!(
            parse_port("p", "abc"),
            Err(ProtocolError::InvalidField { .. })
        ));
    }

    #[test]
    fn non_ascii_is_rejected() {
        assert_eq!(split_fields(&[0xff, b'|']), Err(ProtocolError::NotAscii));
        assert_eq!(split_fields(b""), Err(ProtocolError::Empty));
    }
}
