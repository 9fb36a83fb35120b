use crate::{
    codec::Frame,
    types::{DeviceInfo, MemoryMarker, UnitType},
};
use std::fmt;
use tracing::debug;

/// Password the console announces during initialization
///
/// The same token doubles as the UDP wake payload.
pub const CONSOLE_PASSWORD: &str = "SUPERWIGH";

/// Sport mode selected by `<WB_6>`; telemetry frames carry the same number
pub const SPORT_MODE: u8 = 6;

/// Commands the client sends to the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `<EQ_>` start initialization
    InitRequest,
    /// `<EP_OK>` password received
    PasswordAck,
    /// `<ER_OK>` resistance range received
    ResistanceAck,
    /// `<EA_OK>` MAC address received
    MacAck,
    /// `<ED_OK>` wheel diameter received
    DiameterAck,
    /// `<EM_OK>` memory marker received
    MemoryAck,
    /// `<ET_OK>` equipment type / vendor received
    EquipmentAck,
    /// `<Ez_OK>` initialization finished
    InitCompleteAck,
    /// `<CP_300>` pause the workout
    Pause,
    /// `<CP_000>` run the workout
    Run,
    /// `<WB_6>` select sport mode and request telemetry
    SelectSportMode,
    /// `<CR_nn>` set the zero-based resistance level on the wire
    SetLevel(u8),
    /// `<CC_>` clear accumulated data on the console
    ClearData,
    /// `<AT_>` client is going away
    Terminate,
    /// `<W6_OK>` sport data received
    SportDataAck,
    /// `<AS_ssid>` access point SSID
    AccessPointSsid(String),
    /// `<AK_password>` access point passphrase
    AccessPointKey(String),
    /// `<AP_>` switch to access point mode
    AccessPointSwitch,
}

impl Command {
    /// Resistance command for a user-facing level
    ///
    /// The level is raised to `min`, then lowered to `max`, then shifted to the
    /// console's zero-based numbering (`CR_00` is level 1). The clamps are
    /// applied in that order so an inverted range never panics.
    #[must_use]
    pub fn set_level(level: i32, min: i32, max: i32) -> Self {
        let mut level = level;
        if level < min {
            level = min;
        }
        if level > max {
            level = max;
        }
        let wire = level.saturating_sub(1).clamp(0, 99);
        Self::SetLevel(u8::try_from(wire).unwrap_or(0))
    }

    /// Render the command as a wire frame
    #[must_use]
    pub fn to_frame(&self) -> String {
        match self {
            Self::InitRequest => "<EQ_>".to_string(),
            Self::PasswordAck => "<EP_OK>".to_string(),
            Self::ResistanceAck => "<ER_OK>".to_string(),
            Self::MacAck => "<EA_OK>".to_string(),
            Self::DiameterAck => "<ED_OK>".to_string(),
            Self::MemoryAck => "<EM_OK>".to_string(),
            Self::EquipmentAck => "<ET_OK>".to_string(),
            Self::InitCompleteAck => "<Ez_OK>".to_string(),
            Self::Pause => "<CP_300>".to_string(),
            Self::Run => "<CP_000>".to_string(),
            Self::SelectSportMode => format!("<WB_{SPORT_MODE}>"),
            Self::SetLevel(level) => format!("<CR_{level:02}>"),
            Self::ClearData => "<CC_>".to_string(),
            Self::Terminate => "<AT_>".to_string(),
            Self::SportDataAck => "<W6_OK>".to_string(),
            Self::AccessPointSsid(ssid) => format!("<AS_{ssid}>"),
            Self::AccessPointKey(key) => format!("<AK_{key}>"),
            Self::AccessPointSwitch => "<AP_>".to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // keep the passphrase out of logs
            Self::AccessPointKey(_) => write!(f, "<AK_***>"),
            _ => f.write_str(&self.to_frame()),
        }
    }
}

/// Which access point setting the console echoed back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPointStep {
    /// `<AS>` SSID stored
    Ssid,
    /// `<AK>` passphrase stored
    Key,
    /// `<AP>` switching to access point mode
    Switch,
}

/// A decoded console frame
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCommand {
    /// `EQ_OK` initialization request accepted
    InitAck,
    /// `EP_SUPERWIGH` console password
    Password(String),
    /// `EP_OK`
    PasswordAck,
    /// `ER_min-max` resistance range
    Resistance {
        /// Lowest level
        min: i32,
        /// Highest level
        max: i32,
    },
    /// `ER_OK`
    ResistanceAck,
    /// `EA_...` MAC address; `None` when the payload was not 12 hex digits
    Mac(Option<String>),
    /// `EA_OK`
    MacAck,
    /// `ED_nnnn` wheel diameter in inches
    Diameter(f64),
    /// `ED_OK`
    DiameterAck,
    /// `EM_...` memory marker
    Memory(MemoryMarker),
    /// `EM_OK`
    MemoryAck,
    /// `EU_...` unit system
    Unit(UnitType),
    /// `EU_OK`
    UnitAck,
    /// `ET_...` / `EV_...` equipment type or vendor
    Equipment(String),
    /// `ET_OK` / `EV_OK`
    EquipmentAck,
    /// `Ez_...` end of initialization
    InitComplete,
    /// `W6_...` sport data; carries the comma-separated payload
    SportData(String),
    /// `W6_OK`
    SportAck,
    /// `CP_OK`
    CpAck,
    /// `CP_300` console paused
    CpPause,
    /// `CP_000` console running
    CpStart,
    /// `AS` / `AK` / `AP` echo
    AccessPointAck(AccessPointStep),
    /// Anything else
    Unknown {
        /// Two-letter tag, as received
        code: String,
        /// Remainder after the first underscore
        data: Option<String>,
    },
}

/// Split a frame payload on its first underscore
fn split_payload(payload: &str) -> (&str, Option<&str>) {
    match payload.split_once('_') {
        Some((code, data)) => (code, Some(data)),
        None => (payload, None),
    }
}

fn parse_range(data: &str) -> Option<(i32, i32)> {
    let (min, max) = data.split_once('-')?;
    Some((min.trim().parse().ok()?, max.trim().parse().ok()?))
}

/// Format 12 hex digits as `AA:BB:CC:DD:EE:FF`
fn format_mac(data: &str) -> Option<String> {
    if !data.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let hex = data.get(..12)?;

    let octets: Vec<&str> = (0..12).step_by(2).map(|i| &hex[i..i + 2]).collect();
    Some(octets.join(":").to_ascii_uppercase())
}

fn parse_diameter(data: &str) -> Option<f64> {
    if data.is_empty() || !data.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    data.parse::<u32>().ok().map(|value| f64::from(value) / 100.0)
}

/// Decode a frame into a tagged command
///
/// Pure: device state is only touched by [`DeviceInfo::apply`].
#[must_use]
pub fn parse_frame(frame: &Frame) -> ParsedCommand {
    parse_payload(frame.payload())
}

/// Decode a frame payload (delimiters already removed)
#[must_use]
pub fn parse_payload(payload: &str) -> ParsedCommand {
    let (code, data) = split_payload(payload);
    let text = data.unwrap_or("");
    let ok = text == "OK";

    let parsed = match code {
        "EQ" if ok => Some(ParsedCommand::InitAck),
        "EP" if ok => Some(ParsedCommand::PasswordAck),
        "EP" if text == CONSOLE_PASSWORD => Some(ParsedCommand::Password(text.to_string())),
        "ER" if ok => Some(ParsedCommand::ResistanceAck),
        "ER" => parse_range(text).map(|(min, max)| ParsedCommand::Resistance { min, max }),
        "EA" if ok => Some(ParsedCommand::MacAck),
        "EA" => Some(ParsedCommand::Mac(format_mac(text))),
        "ED" if ok => Some(ParsedCommand::DiameterAck),
        "ED" => parse_diameter(text).map(ParsedCommand::Diameter),
        "EM" if ok => Some(ParsedCommand::MemoryAck),
        "EM" => Some(ParsedCommand::Memory(MemoryMarker::from_data(text))),
        "EU" if ok => Some(ParsedCommand::UnitAck),
        "EU" => Some(ParsedCommand::Unit(
            UnitType::from_code(text).unwrap_or_default(),
        )),
        "ET" | "EV" if ok => Some(ParsedCommand::EquipmentAck),
        "ET" | "EV" if !text.is_empty() => Some(ParsedCommand::Equipment(text.to_string())),
        "Ez" if text.contains("1E") || text.contains("OK") => Some(ParsedCommand::InitComplete),
        "W6" if ok => Some(ParsedCommand::SportAck),
        c if c.starts_with("W6") => Some(ParsedCommand::SportData(text.to_string())),
        "CP" if ok => Some(ParsedCommand::CpAck),
        "CP" if text == "300" => Some(ParsedCommand::CpPause),
        "CP" if text == "000" => Some(ParsedCommand::CpStart),
        "AS" => Some(ParsedCommand::AccessPointAck(AccessPointStep::Ssid)),
        "AK" => Some(ParsedCommand::AccessPointAck(AccessPointStep::Key)),
        "AP" => Some(ParsedCommand::AccessPointAck(AccessPointStep::Switch)),
        _ => None,
    };

    parsed.unwrap_or_else(|| {
        debug!("Unknown frame: {payload}");
        ParsedCommand::Unknown {
            code: code.to_string(),
            data: data.map(str::to_string),
        }
    })
}

impl DeviceInfo {
    /// Record whatever `parsed` tells us about the console
    ///
    /// Returns `true` if a field changed.
    pub fn apply(&mut self, parsed: &ParsedCommand) -> bool {
        match parsed {
            ParsedCommand::Password(password) => {
                debug!("Password: {password}");
                self.password = Some(password.clone());
            }
            ParsedCommand::Resistance { min, max } => {
                debug!("Resistance range: {min}-{max}");
                self.resistance_min = *min;
                self.resistance_max = *max;
            }
            ParsedCommand::Mac(Some(mac)) => {
                debug!("MAC: {mac}");
                self.mac_address = Some(mac.clone());
            }
            ParsedCommand::Diameter(inches) => {
                debug!("Wheel diameter: {inches:.2}\"");
                self.wheel_diameter_inches = *inches;
            }
            ParsedCommand::Memory(marker) => {
                debug!("Memory: {marker}");
                self.memory_marker = Some(marker.clone());
            }
            ParsedCommand::Unit(unit) => {
                debug!("Unit: {unit}");
                self.unit_type = *unit;
            }
            ParsedCommand::Equipment(equipment) => {
                debug!("Equipment: {equipment}");
                self.equipment = Some(equipment.clone());
            }
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FrameCodec;

    #[test]
    fn test_set_level_clamping() {
        assert_eq!(Command::set_level(150, 1, 20).to_frame(), "<CR_19>");
        assert_eq!(Command::set_level(0, 1, 20).to_frame(), "<CR_00>");
        assert_eq!(Command::set_level(7, 1, 20).to_frame(), "<CR_06>");
        assert_eq!(Command::set_level(-4, 1, 20), Command::SetLevel(0));
        // unknown range: clamps collapse to level 0
        assert_eq!(Command::set_level(5, 0, 0), Command::SetLevel(0));
    }

    #[test]
    fn test_command_frames() {
        assert_eq!(Command::InitRequest.to_frame(), "<EQ_>");
        assert_eq!(Command::InitCompleteAck.to_frame(), "<Ez_OK>");
        assert_eq!(Command::Pause.to_frame(), "<CP_300>");
        assert_eq!(Command::Run.to_frame(), "<CP_000>");
        assert_eq!(Command::SelectSportMode.to_frame(), "<WB_6>");
        assert_eq!(Command::ClearData.to_frame(), "<CC_>");
        assert_eq!(Command::Terminate.to_frame(), "<AT_>");
        assert_eq!(Command::SportDataAck.to_frame(), "<W6_OK>");
        assert_eq!(
            Command::AccessPointSsid("gym".to_string()).to_frame(),
            "<AS_gym>"
        );
    }

    #[test]
    fn test_passphrase_hidden_in_display() {
        let cmd = Command::AccessPointKey("hunter2".to_string());
        assert_eq!(cmd.to_frame(), "<AK_hunter2>");
        assert!(!format!("{cmd}").contains("hunter2"));
    }

    #[test]
    fn test_handshake_frames() {
        assert_eq!(parse_payload("EQ_OK"), ParsedCommand::InitAck);
        assert_eq!(
            parse_payload("EP_SUPERWIGH"),
            ParsedCommand::Password("SUPERWIGH".to_string())
        );
        assert_eq!(parse_payload("EP_OK"), ParsedCommand::PasswordAck);
        assert_eq!(
            parse_payload("ER_1-20"),
            ParsedCommand::Resistance { min: 1, max: 20 }
        );
        assert_eq!(parse_payload("ER_OK"), ParsedCommand::ResistanceAck);
        assert_eq!(
            parse_payload("EA_0a1b2c3d4e5f"),
            ParsedCommand::Mac(Some("0A:1B:2C:3D:4E:5F".to_string()))
        );
        assert_eq!(parse_payload("EA_"), ParsedCommand::Mac(None));
        assert_eq!(parse_payload("EA_0A1B2C3D4E5FZZ"), ParsedCommand::Mac(None));
        assert_eq!(parse_payload("EA_0A1B2C3D4E"), ParsedCommand::Mac(None));
        assert_eq!(parse_payload("EA_OK"), ParsedCommand::MacAck);
        assert_eq!(parse_payload("ED_2100"), ParsedCommand::Diameter(21.0));
        assert_eq!(
            parse_payload("EM_3"),
            ParsedCommand::Memory(MemoryMarker::Numeric(3))
        );
        assert_eq!(
            parse_payload("EU_I"),
            ParsedCommand::Unit(UnitType::Imperial)
        );
        assert_eq!(
            parse_payload("ET_Upright"),
            ParsedCommand::Equipment("Upright".to_string())
        );
        assert_eq!(parse_payload("Ez_1E"), ParsedCommand::InitComplete);
        assert_eq!(parse_payload("Ez_OK"), ParsedCommand::InitComplete);
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(parse_payload("CP_OK"), ParsedCommand::CpAck);
        assert_eq!(parse_payload("CP_300"), ParsedCommand::CpPause);
        assert_eq!(parse_payload("CP_000"), ParsedCommand::CpStart);
        assert_eq!(parse_payload("W6_OK"), ParsedCommand::SportAck);
        assert_eq!(
            parse_payload("W6_0,224,000,000,03,000000,000,00"),
            ParsedCommand::SportData("0,224,000,000,03,000000,000,00".to_string())
        );
        assert_eq!(
            parse_payload("AS"),
            ParsedCommand::AccessPointAck(AccessPointStep::Ssid)
        );
    }

    #[test]
    fn test_unknown_frames_do_not_abort() {
        assert_eq!(
            parse_payload("ZZ_42"),
            ParsedCommand::Unknown {
                code: "ZZ".to_string(),
                data: Some("42".to_string()),
            }
        );
        assert!(matches!(
            parse_payload("EP_nope"),
            ParsedCommand::Unknown { .. }
        ));
        assert!(matches!(
            parse_payload("ER_garbage"),
            ParsedCommand::Unknown { .. }
        ));
        assert!(matches!(
            parse_payload("Ez_0"),
            ParsedCommand::Unknown { .. }
        ));
        assert!(matches!(
            parse_payload("EQ"),
            ParsedCommand::Unknown { data: None, .. }
        ));
    }

    #[test]
    fn test_merged_read_frames_parse_independently() {
        let mut codec = FrameCodec::new();
        let frames = codec.push(b"<EQ_OK><ER_1-20>");
        let parsed: Vec<_> = frames.iter().map(parse_frame).collect();

        assert_eq!(
            parsed,
            vec![
                ParsedCommand::InitAck,
                ParsedCommand::Resistance { min: 1, max: 20 }
            ]
        );
    }

    #[test]
    fn test_device_info_apply() {
        let mut info = DeviceInfo::default();

        assert!(info.apply(&parse_payload("EP_SUPERWIGH")));
        assert!(info.apply(&parse_payload("ER_1-24")));
        assert!(info.apply(&parse_payload("EA_A1B2C3D4E5F6")));
        assert!(info.apply(&parse_payload("ED_2650")));
        assert!(info.apply(&parse_payload("EM_A7")));
        assert!(!info.apply(&ParsedCommand::Mac(None)));
        assert!(!info.apply(&ParsedCommand::InitAck));

        assert_eq!(info.password.as_deref(), Some("SUPERWIGH"));
        assert_eq!(info.resistance_range(), Some((1, 24)));
        assert_eq!(info.mac_address.as_deref(), Some("A1:B2:C3:D4:E5:F6"));
        assert!((info.wheel_diameter_inches - 26.5).abs() < 1e-9);
        assert_eq!(
            info.memory_marker,
            Some(MemoryMarker::Text("A7".to_string()))
        );
    }
}
