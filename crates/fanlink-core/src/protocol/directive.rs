// ── Passcode-prefixed directives ──
//
// Sent to a device's listener port (or broadcast) rather than over the
// sequenced exchange channel.

use std::fmt::Write as _;

/// Where a device in bootloader mode fetches its new image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashTarget {
    pub listener_port: u16,
    pub http_port: u16,
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Discovery beacon advertising where devices should announce.
    Beacon { listener_port: u16 },
    /// Fleet-wide disconnect.
    Disconnect,
    /// Reboot every device that hears it.
    Reboot,
    /// Reboot a single device identified by MAC.
    RebootDevice { mac: String },
    /// Tell a bootloader to launch the installed application.
    Launch,
    /// Tell a bootloader to fetch and flash a new image.
    Flash(FlashTarget),
    /// Fan-chasing request for every device.
    Chase { fan_id: u32, rpm: u32 },
    /// Fan-chasing request for one device.
    ChaseDevice { fan_id: u32, rpm: u32, mac: String },
    /// Fan-chasing request limited to the selected fans of every device.
    ChaseSelection {
        fan_id: u32,
        rpm: u32,
        selection: String,
    },
    /// PI controller gains for every device.
    PiSet { fan_id: u32, kp: f64, ki: f64 },
    /// PI controller gains for one device.
    PiSetDevice {
        fan_id: u32,
        kp: f64,
        ki: f64,
        mac: String,
    },
}

impl Directive {
    pub fn encode(&self, passcode: &str) -> String {
        let mut out = String::with_capacity(32);
        let tag = match self {
            Self::Beacon { .. } => "N",
            Self::Disconnect => "X",
            Self::Reboot => "R",
            Self::RebootDevice { .. } => "r",
            Self::Launch => "L",
            Self::Flash(_) => "U",
            Self::Chase { .. } => "C",
            Self::ChaseDevice { .. } => "c",
            Self::ChaseSelection { .. } => "CS",
            Self::PiSet { .. } => "P",
            Self::PiSetDevice { .. } => "p",
        };
        out.push_str(tag);
        out.push('|');
        out.push_str(passcode);

        // write! into a String cannot fail.
        let _ = match self {
            Self::Beacon { listener_port } => write!(out, "|{listener_port}"),
            Self::RebootDevice { mac } => write!(out, "|{mac}"),
            Self::Flash(target) => write!(
                out,
                "|{}|{}|{}|{}",
                target.listener_port, target.http_port, target.filename, target.size
            ),
            Self::Chase { fan_id, rpm } => write!(out, "|{fan_id}|{rpm}"),
            Self::ChaseDevice { fan_id, rpm, mac } => write!(out, "|{fan_id}|{rpm}|{mac}"),
            Self::ChaseSelection {
                fan_id,
                rpm,
                selection,
            } => write!(out, "|{fan_id}|{rpm}|{selection}"),
            // The gains travel as one space-separated field.
            Self::PiSet { fan_id, kp, ki } => write!(out, "|PISET {fan_id} {kp} {ki}"),
            Self::PiSetDevice {
                fan_id,
                kp,
                ki,
                mac,
            } => write!(out, "|PISET {fan_id} {kp} {ki}|{mac}"),
            Self::Disconnect | Self::Reboot | Self::Launch => Ok(()),
        };
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_listener_directives() {
        assert_eq!(
            Directive::Beacon { listener_port: 57584 }.encode("CT"),
            "N|CT|57584"
        );
        assert_eq!(Directive::Disconnect.encode("CT"), "X|CT");
        assert_eq!(Directive::Reboot.encode("CT"), "R|CT");
        assert_eq!(Directive::Launch.encode("CT"), "L|CT");
        assert_eq!(
            Directive::RebootDevice {
                mac: "00:11:22:33:44:55".into()
            }
            .encode("CT"),
            "r|CT|00:11:22:33:44:55"
        );
    }

    #[test]
    fn encodes_flash_and_chase() {
        let flash = Directive::Flash(FlashTarget {
            listener_port: 57584,
            http_port: 8000,
            filename: "fw.bin".into(),
            size: 4096,
        });
        assert_eq!(flash.encode("CT"), "U|CT|57584|8000|fw.bin|4096");
        assert_eq!(
            Directive::Chase { fan_id: 2, rpm: 9000 }.encode("CT"),
            "C|CT|2|9000"
        );
        assert_eq!(
            Directive::ChaseDevice {
                fan_id: 2,
                rpm: 9000,
                mac: "00:11:22:33:44:55".into()
            }
            .encode("CT"),
            "c|CT|2|9000|00:11:22:33:44:55"
        );
        assert_eq!(
            Directive::ChaseSelection {
                fan_id: 0,
                rpm: 4500,
                selection: "1100".into()
            }
            .encode("CT"),
            "CS|CT|0|4500|1100"
        );
    }

    #[test]
    fn encodes_pi_gains() {
        assert_eq!(
            Directive::PiSet {
                fan_id: 1,
                kp: 0.25,
                ki: 0.05
            }
            .encode("CT"),
            "P|CT|PISET 1 0.25 0.05"
        );
        assert_eq!(
            Directive::PiSetDevice {
                fan_id: 0,
                kp: 2.0,
                ki: 0.5,
                mac: "00:11:22:33:44:55".into()
            }
            .encode("CT"),
            "p|CT|PISET 0 2 0.5|00:11:22:33:44:55"
        );
    }
}
