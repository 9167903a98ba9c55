// ── Per-device exchange channel ──
//
// Outbound frames are `<seq>|<payload>`; the handshake always uses
// sequence 0 and every other frame the next outbound index. Replies are
// `<seq>|<tag>[|...]`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ProtocolError, split_fields};

/// Fan hardware parameters advertised to devices in the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FanProfile {
    pub fan_mode: String,
    pub fan_frequency_hz: u32,
    pub counter_counts: u32,
    pub pulses_per_rotation: u32,
    pub max_rpm: u32,
    pub min_rpm: u32,
    pub min_dc: f64,
    pub chaser_tolerance: f64,
    pub max_fan_timeouts: u32,
    pub pinout: String,
}

impl Default for FanProfile {
    fn default() -> Self {
        Self {
            fan_mode: "S".into(),
            fan_frequency_hz: 25_000,
            counter_counts: 1,
            pulses_per_rotation: 2,
            max_rpm: 16_000,
            min_rpm: 1_200,
            min_dc: 0.1,
            chaser_tolerance: 0.02,
            max_fan_timeouts: 1,
            pinout: "BASE".into(),
        }
    }
}

/// Configuration descriptor carried by the handshake frame.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeDescriptor {
    /// Port the engine receives on for this device.
    pub inbound_port: u16,
    /// Port the engine sends from for this device.
    pub outbound_port: u16,
    pub period_ms: u128,
    pub broadcast_period_ms: u128,
    pub max_timeouts: u32,
    pub max_fans: usize,
    pub profile: FanProfile,
}

impl fmt::Display for HandshakeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.profile;
        write!(
            f,
            "{},{},{},{},{}|{} {} {} {} {} {} {} {} {} {} {}",
            self.inbound_port,
            self.outbound_port,
            self.period_ms,
            self.broadcast_period_ms,
            self.max_timeouts,
            p.fan_mode,
            self.max_fans,
            p.fan_frequency_hz,
            p.counter_counts,
            p.pulses_per_rotation,
            p.max_rpm,
            p.min_rpm,
            p.min_dc,
            p.chaser_tolerance,
            p.max_fan_timeouts,
            p.pinout,
        )
    }
}

/// Body of an outbound exchange frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Handshake(HandshakeDescriptor),
    Ping,
    DutyCycle { dc: f64, selection: String },
    DutyCycleVector(Vec<f64>),
    /// Low-cost liveness probe sent one cycle before the timeout limit.
    Probe,
    /// Last-chance reconnect probe sent once at the timeout limit.
    ReconnectProbe,
    Disconnect,
    Reboot,
}

impl Payload {
    pub fn is_handshake(&self) -> bool {
        matches!(self, Self::Handshake(_))
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshake(descriptor) => write!(f, "H|{descriptor}"),
            Self::Ping => f.write_str("P"),
            Self::DutyCycle { dc, selection } => write!(f, "S|D:{dc}:{selection}"),
            Self::DutyCycleVector(dcs) => {
                f.write_str("S|F:")?;
                for (i, dc) in dcs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{dc}")?;
                }
                Ok(())
            }
            Self::Probe => f.write_str("Q"),
            Self::ReconnectProbe => f.write_str("Y"),
            Self::Disconnect => f.write_str("X"),
            Self::Reboot => f.write_str("R"),
        }
    }
}

/// A sequenced outbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<'a> {
    pub seq: u64,
    pub payload: &'a Payload,
}

impl fmt::Display for Frame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.seq, self.payload)
    }
}

/// A decoded device reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Telemetry {
        data_index: u64,
        rpm: Vec<f64>,
        duty_cycle: Vec<f64>,
    },
    /// Device restarted its outbound numbering.
    IndexReset,
    /// Device asks for a ping.
    PingRequest,
    /// Answer to the reconnect probe.
    ReconnectAck,
    /// Keep-alive with no content.
    Maintain,
    /// Handshake accepted.
    HandshakeAck,
    /// Handshake received, device still applying it.
    HandshakePending,
    /// Answer to the liveness probe.
    ProbeAck,
    Error(String),
    Unknown(String),
}

/// Parse a reply datagram into its sequence number and content.
///
/// Telemetry arrays are truncated or zero-padded to `width` entries.
pub fn parse_reply(datagram: &[u8], width: usize) -> Result<(u64, Reply), ProtocolError> {
    let fields = split_fields(datagram)?;
    if fields.len() < 2 {
        return Err(ProtocolError::Truncated {
            expected: 2,
            got: fields.len(),
        });
    }
    // Error text may itself contain separators.
    if fields.len() > 5 && fields[1] != "E" {
        return Err(ProtocolError::FieldCount(fields.len()));
    }
    let seq = parse_u64("sequence", fields[0])?;
    let reply = match fields[1] {
        "T" => {
            if fields.len() != 5 {
                return Err(ProtocolError::Truncated {
                    expected: 5,
                    got: fields.len(),
                });
            }
            Reply::Telemetry {
                data_index: parse_u64("data index", fields[2])?,
                rpm: parse_padded("rpm", fields[3], width)?,
                duty_cycle: parse_padded("duty cycle", fields[4], width)?,
            }
        }
        "I" => Reply::IndexReset,
        "P" => Reply::PingRequest,
        "Y" => Reply::ReconnectAck,
        "M" => Reply::Maintain,
        "H" => Reply::HandshakeAck,
        "K" => Reply::HandshakePending,
        "Q" => Reply::ProbeAck,
        "E" => Reply::Error(fields.get(2..).map(|rest| rest.join("|")).unwrap_or_default()),
        other => Reply::Unknown(other.to_owned()),
    };
    Ok((seq, reply))
}

fn parse_u64(field: &'static str, raw: &str) -> Result<u64, ProtocolError> {
    raw.trim().parse().map_err(|_| ProtocolError::InvalidField {
        field,
        value: raw.to_owned(),
    })
}

fn parse_padded(field: &'static str, csv: &str, width: usize) -> Result<Vec<f64>, ProtocolError> {
    let mut values = Vec::with_capacity(width);
    for part in csv.split(',').take(width) {
        let part = part.trim();
        if part.is_empty() {
            values.push(0.0);
            continue;
        }
        let value = part.parse().map_err(|_| ProtocolError::InvalidField {
            field,
            value: part.to_owned(),
        })?;
        values.push(value);
    }
    values.resize(width, 0.0);
    Ok(values)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn descriptor() -> HandshakeDescriptor {
        HandshakeDescriptor {
            inbound_port: 40001,
            outbound_port: 40002,
            period_ms: 100,
            broadcast_period_ms: 1000,
            max_timeouts: 10,
            max_fans: 21,
            profile: FanProfile::default(),
        }
    }

    #[test]
    fn handshake_frame_layout() {
        let payload = Payload::Handshake(descriptor());
        let frame = Frame { seq: 0, payload: &payload };
        assert_eq!(
            frame.to_string(),
            "0|H|40001,40002,100,1000,10|S 21 25000 1 2 16000 1200 0.1 0.02 1 BASE"
        );
    }

    #[test]
    fn command_payloads() {
        let dc = Payload::DutyCycle {
            dc: 0.5,
            selection: "101".into(),
        };
        assert_eq!(Frame { seq: 7, payload: &dc }.to_string(), "7|S|D:0.5:101");
        let vector = Payload::DutyCycleVector(vec![0.25, 0.5, 0.0]);
        assert_eq!(vector.to_string(), "S|F:0.25,0.5,0");
        assert_eq!(Payload::Ping.to_string(), "P");
        assert_eq!(Payload::Probe.to_string(), "Q");
        assert_eq!(Payload::ReconnectProbe.to_string(), "Y");
        assert_eq!(Payload::Disconnect.to_string(), "X");
    }

    #[test]
    fn telemetry_is_padded_to_width() {
        let (seq, reply) = parse_reply(b"12|T|3|1000,2000|0.5,0.6", 4).unwrap();
        assert_eq!(seq, 12);
        assert_eq!(
            reply,
            Reply::Telemetry {
                data_index: 3,
                rpm: vec![1000.0, 2000.0, 0.0, 0.0],
                duty_cycle: vec![0.5, 0.6, 0.0, 0.0],
            }
        );
    }

    #[test]
    fn telemetry_is_truncated_to_width() {
        let (_, reply) = parse_reply(b"1|T|1|1,2,3|0.1,0.2,0.3", 2).unwrap();
        let Reply::Telemetry { rpm, duty_cycle, .. } = reply else {
            panic!("expected telemetry");
        };
        assert_eq!(rpm, vec![1.0, 2.0]);
        assert_eq!(duty_cycle, vec![0.1, 0.2]);
    }

    #[test]
    fn simple_tags() {
        assert_eq!(parse_reply(b"4|H", 1).unwrap(), (4, Reply::HandshakeAck));
        assert_eq!(parse_reply(b"4|K", 1).unwrap(), (4, Reply::HandshakePending));
        assert_eq!(parse_reply(b"5|I", 1).unwrap(), (5, Reply::IndexReset));
        assert_eq!(
            parse_reply(b"6|E|overheat", 1).unwrap(),
            (6, Reply::Error("overheat".into()))
        );
        assert_eq!(parse_reply(b"6|Z", 1).unwrap(), (6, Reply::Unknown("Z".into())));
    }

    #[test]
    fn error_text_keeps_its_separators() {
        assert_eq!(
            parse_reply(b"9|E|fan 2|stalled|rpm 0|min 1200", 1).unwrap(),
            (9, Reply::Error("fan 2|stalled|rpm 0|min 1200".into()))
        );
        assert_eq!(parse_reply(b"9|E", 1).unwrap(), (9, Reply::Error(String::new())));
        assert!(matches!(
            parse_reply(b"9|M|a|b|c|d", 1),
            Err(ProtocolError::FieldCount(6))
        ));
    }

    #[test]
    fn bad_sequence_is_malformed() {
        assert!(matches!(
            parse_reply(b"x|H", 1),
            Err(ProtocolError::InvalidField { field: "sequence", .. })
        ));
        assert!(matches!(
            parse_reply(b"1|T|2|3", 1),
            Err(ProtocolError::Truncated { expected: 5, .. })
        ));
    }
}
