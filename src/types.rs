use serde::{Deserialize, Serialize};
use std::{fmt, time::SystemTime};

/// Default wheel diameter in inches, used until the controller reports its own
pub const DEFAULT_WHEEL_DIAMETER_INCHES: f64 = 21.0;

/// Measurement system the console is configured for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitType {
    /// Kilometers, km/h
    #[default]
    Metric,
    /// Miles, mph
    Imperial,
}

impl UnitType {
    /// Interpret the payload of an `EU` frame
    ///
    /// Returns `None` when the code is not one the console is known to send.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().chars().next()?.to_ascii_uppercase() {
            'M' | 'K' | '0' => Some(Self::Metric),
            'I' | 'E' | '1' => Some(Self::Imperial),
            _ => None,
        }
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metric => write!(f, "Metric"),
            Self::Imperial => write!(f, "Imperial"),
        }
    }
}

/// Memory marker reported by the console during initialization (`EM` frame)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoryMarker {
    /// Purely numeric marker
    Numeric(u32),
    /// Anything else, kept verbatim
    Text(String),
}

impl MemoryMarker {
    /// Build a marker from raw frame data
    #[must_use]
    pub fn from_data(data: &str) -> Self {
        if !data.is_empty() && data.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(value) = data.parse() {
                return Self::Numeric(value);
            }
        }
        Self::Text(data.to_string())
    }
}

impl fmt::Display for MemoryMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "{value}"),
            Self::Text(text) => write!(f, "{text}"),
        }
    }
}

/// Information the controller reports about itself during the handshake
///
/// Populated incrementally while initializing and kept for the lifetime of the
/// connection. Reset only when a new connection is established.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Password announced by the console
    pub password: Option<String>,
    /// Lowest selectable resistance level
    pub resistance_min: i32,
    /// Highest selectable resistance level
    pub resistance_max: i32,
    /// Flywheel diameter in inches
    pub wheel_diameter_inches: f64,
    /// Controller MAC address, `AA:BB:CC:DD:EE:FF`
    pub mac_address: Option<String>,
    /// Console unit system
    pub unit_type: UnitType,
    /// Memory marker
    pub memory_marker: Option<MemoryMarker>,
    /// Equipment type / vendor string (`ET` or `EV` frames)
    pub equipment: Option<String>,
}

impl DeviceInfo {
    /// Resistance range if the console has reported one
    #[must_use]
    pub const fn resistance_range(&self) -> Option<(i32, i32)> {
        if self.resistance_max > 0 {
            Some((self.resistance_min, self.resistance_max))
        } else {
            None
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            password: None,
            resistance_min: 0,
            resistance_max: 0,
            wheel_diameter_inches: DEFAULT_WHEEL_DIAMETER_INCHES,
            mac_address: None,
            unit_type: UnitType::Metric,
            memory_marker: None,
            equipment: None,
        }
    }
}

/// Live sport data decoded from `W6` frames
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Sync/sequence value leading each sport frame
    pub sync: u32,
    /// Distance covered since the last clear, in kilometers
    pub distance_km: f64,
    /// Pedal cadence
    pub rpm: u32,
    /// Heart rate in beats per minute (0 without a sensor)
    pub heart_rate_bpm: u32,
    /// Resistance level as reported by the console
    pub level: u32,
    /// Estimated energy expenditure in kcal
    pub calories_kcal: f64,
    /// Output power in watts
    pub watts: u32,
    /// Speed derived from cadence, in km/h
    pub speed_kmh: f64,
    /// Time of the last successful decode
    pub last_update: Option<SystemTime>,
}

/// Frame counters kept by a link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    /// Frames written successfully
    pub messages_sent: u64,
    /// Reads that yielded at least one frame
    pub messages_received: u64,
}

/// Point-in-time view of a bike session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BikeStatus {
    /// Whether the link is currently up
    pub connected: bool,
    /// Whether the initialization handshake has finished (or degraded)
    pub initialized: bool,
    /// Latest sport data
    pub telemetry: Telemetry,
    /// Information gathered during the handshake
    pub device_info: DeviceInfo,
    /// Link counters
    pub stats: LinkStats,
}

/// Connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    /// Controller address (IP or host name)
    pub address: String,
    /// Controller TCP port; also used for the UDP wake broadcast
    pub port: u16,
    /// TCP connect attempts before giving up
    pub connect_attempts: u32,
    /// Payload of the UDP broadcast sent between failed attempts
    pub wake_token: String,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            address: crate::DEFAULT_ADDRESS.to_string(),
            port: crate::DEFAULT_PORT,
            connect_attempts: 2,
            wake_token: crate::WAKE_TOKEN.to_string(),
        }
    }
}

impl ConnectionParams {
    /// Parameters for a controller at `address` with everything else default
    #[must_use]
    pub fn for_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

/// Timing configuration
///
/// The pacing delays are not tuning knobs for speed: the controller drops
/// acknowledgements that arrive too close together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Wait after a UDP wake broadcast before retrying TCP
    pub wake_delay_ms: u64,
    /// Wait after sending the initial `EQ` request
    pub init_settle_ms: u64,
    /// Pacing after each handshake acknowledgement
    pub ack_delay_ms: u64,
    /// Pacing after the resistance range acknowledgement
    pub resistance_ack_delay_ms: u64,
    /// Receive timeout for each handshake poll
    pub handshake_poll_timeout_ms: u64,
    /// Handshake polls before degrading to "initialized anyway"
    pub handshake_max_polls: u32,
    /// Gap between the two frames of a compound command (start sport)
    pub command_gap_ms: u64,
    /// Interval at which callers should poll telemetry
    pub telemetry_poll_interval_ms: u64,
    /// Receive timeout for a telemetry poll
    pub telemetry_timeout_ms: u64,
    /// Receive timeout for SSID/password echoes while configuring the access point
    pub access_point_timeout_ms: u64,
    /// Receive timeout for the final access point switch confirmation
    pub access_point_switch_timeout_ms: u64,
    /// Minimum interval between program level checks
    pub level_check_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            wake_delay_ms: 500,
            init_settle_ms: 500,
            ack_delay_ms: 100,
            resistance_ack_delay_ms: 500,
            handshake_poll_timeout_ms: 2_000,
            handshake_max_polls: 10,
            command_gap_ms: 100,
            telemetry_poll_interval_ms: 200,
            telemetry_timeout_ms: 500,
            access_point_timeout_ms: 2_000,
            access_point_switch_timeout_ms: 5_000,
            level_check_interval_ms: 1_000,
        }
    }
}
