// ── Discovery listener messages ──
//
// Inbound on the listener port:
//   A|<passcode>|<mac>|N|<inboundPort>|<outboundPort>|<version>   application announce
//   A|<passcode>|<mac>|E|<text>                                  application error
//   B|<passcode>|<mac>|N[|<bootVersion>]                         bootloader announce
//   B|<passcode>|<mac>|E|<text>                                  bootloader error

use super::{ProtocolError, parse_port, split_fields};
use crate::model::MacAddress;

/// A decoded, passcode-verified discovery datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    Announce {
        mac: MacAddress,
        inbound_port: u16,
        outbound_port: u16,
        version: String,
    },
    BootloaderAnnounce {
        mac: String,
        boot_version: Option<String>,
    },
    DeviceError {
        mac: String,
        text: String,
    },
    BootloaderError {
        mac: String,
        text: String,
    },
}

impl DiscoveryMessage {
    pub fn mac(&self) -> &str {
        match self {
            Self::Announce { mac, .. } => mac.as_str(),
            Self::BootloaderAnnounce { mac, .. }
            | Self::DeviceError { mac, .. }
            | Self::BootloaderError { mac, .. } => mac,
        }
    }
}

/// Parse a listener datagram.
///
/// Returns `Ok(None)` when the passcode does not match; such datagrams are
/// dropped without further inspection.
pub fn parse_discovery(
    datagram: &[u8],
    passcode: &str,
) -> Result<Option<DiscoveryMessage>, ProtocolError> {
    let fields = split_fields(datagram)?;
    if fields.len() < 2 {
        return Err(ProtocolError::Truncated {
            expected: 4,
            got: fields.len(),
        });
    }
    if fields[1] != passcode {
        return Ok(None);
    }
    if fields.len() < 4 {
        return Err(ProtocolError::Truncated {
            expected: 4,
            got: fields.len(),
        });
    }

    let mac = fields[2];
    let message = match (fields[0].chars().next(), fields[3]) {
        (Some('A'), "N") => {
            if fields.len() < 7 {
                return Err(ProtocolError::Truncated {
                    expected: 7,
                    got: fields.len(),
                });
            }
            let mac = MacAddress::parse(mac).map_err(|_| ProtocolError::InvalidField {
                field: "mac",
                value: mac.to_owned(),
            })?;
            DiscoveryMessage::Announce {
                mac,
                inbound_port: parse_port("inbound port", fields[4])?,
                outbound_port: parse_port("outbound port", fields[5])?,
                version: fields[6].to_owned(),
            }
        }
        (Some('A'), "E") => DiscoveryMessage::DeviceError {
            mac: mac.to_owned(),
            text: fields.get(4).copied().unwrap_or_default().to_owned(),
        },
        (Some('B'), "N") => DiscoveryMessage::BootloaderAnnounce {
            mac: mac.to_owned(),
            boot_version: fields.get(4).map(|v| (*v).to_owned()),
        },
        (Some('B'), "E") => DiscoveryMessage::BootloaderError {
            mac: mac.to_owned(),
            text: fields.get(4).copied().unwrap_or_default().to_owned(),
        },
        (Some('A' | 'B'), kind) => return Err(ProtocolError::UnknownKind(kind.to_owned())),
        _ => return Err(ProtocolError::UnknownSource(fields[0].to_owned())),
    };
    Ok(Some(message))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PASS: &str = "CT";

    #[test]
    fn parses_application_announce() {
        let msg = parse_discovery(b"A|CT|00:11:22:33:44:55|N|6000|6001|SK-1.2", PASS)
            .unwrap()
            .unwrap();
        assert_eq!(
            msg,
            DiscoveryMessage::Announce {
                mac: MacAddress::parse("00:11:22:33:44:55").unwrap(),
                inbound_port: 6000,
                outbound_port: 6001,
                version: "SK-1.2".into(),
            }
        );
    }

    #[test]
    fn wrong_passcode_is_silently_ignored() {
        let msg = parse_discovery(b"A|nope|00:11:22:33:44:55|N|6000|6001|v", PASS).unwrap();
        assert!(msg.is_none());
    }

    #[test]
    fn short_mac_is_rejected() {
        let err = parse_discovery(b"A|CT|00:11:22|N|6000|6001|v", PASS).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "mac", .. }));
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let err =
            parse_discovery(b"A|CT|00:11:22:33:44:55|N|70000|6001|v", PASS).unwrap_err();
        assert!(matches!(err, ProtocolError::PortOutOfRange { value: 70000, .. }));
    }

    #[test]
    fn bootloader_version_is_optional() {
        let msg = parse_discovery(b"B|CT|00:11:22:33:44:55|N", PASS)
            .unwrap()
            .unwrap();
        assert_eq!(
            msg,
            DiscoveryMessage::BootloaderAnnounce {
                mac: "00:11:22:33:44:55".into(),
                boot_version: None,
            }
        );
    }

    #[test]
    fn error_reports_carry_text() {
        let msg = parse_discovery(b"A|CT|00:11:22:33:44:55|E|fan 3 stalled", PASS)
            .unwrap()
            .unwrap();
        assert!(matches!(msg, DiscoveryMessage::DeviceError { ref text, .. } if text == "fan 3 stalled"));
    }

    #[test]
    fn unknown_source_is_malformed() {
        let err = parse_discovery(b"Z|CT|00:11:22:33:44:55|N", PASS).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownSource("Z".into()));
    }

    #[test]
    fn truncated_announce_is_malformed() {
        let err = parse_discovery(b"A|CT|00:11:22:33:44:55|N|6000", PASS).unwrap_err();
        assert_eq!(err, ProtocolError::Truncated { expected: 7, got: 5 });
    }
}
