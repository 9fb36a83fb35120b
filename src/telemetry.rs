//! Sport data (`W6`) decoding.
//!
//! Frame layout, comma separated after `W6_`:
//!
//! | index | field    | width |
//! |-------|----------|-------|
//! | 0     | sync     | -     |
//! | 1     | distance | 3     |
//! | 2     | rpm      | 3     |
//! | 3     | pulse    | 3     |
//! | 4     | level    | 2     |
//! | 5     | calories | 6     |
//! | 6     | power    | 3     |
//! | 7     | unused   | 2     |
//!
//! Short fields are padded with `'0'` on the *right* before conversion, so a
//! truncated `"22"` distance reads as 220. That is how the console's own app
//! reads them and the numbers only line up with the console display this way.

use std::{f64::consts::PI, time::SystemTime};
use tracing::debug;

use crate::{
    error::{BikeError, Result},
    types::Telemetry,
};

/// Gear ratio between crank and flywheel
pub const GEAR_RATIO: f64 = 55.0;

/// Vendor constant converting flywheel turns per minute into km/h
pub const SPEED_CONSTANT: f64 = 0.004_785_36;

/// Span of the raw odometer counter before it wraps
pub const ODOMETER_SPAN: u32 = 1000;

const DISTANCE_WIDTH: usize = 3;
const RPM_WIDTH: usize = 3;
const PULSE_WIDTH: usize = 3;
const LEVEL_WIDTH: usize = 2;
const CALORIES_WIDTH: usize = 6;
const POWER_WIDTH: usize = 3;

/// Carries the high-order part of the 3-digit odometer counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OdometerState {
    /// Last raw counter seen, 0..=999
    pub previous_raw: u32,
    /// Number of times the raw counter has wrapped; only ever grows
    pub high_order_wraps: u32,
}

impl OdometerState {
    /// Feed a raw counter sample and return the full, unwrapped counter
    pub fn observe(&mut self, raw: u32) -> u32 {
        if raw < self.previous_raw {
            self.high_order_wraps += 1;
            debug!("Odometer wrapped, high order = {}", self.high_order_wraps);
        }
        self.previous_raw = raw;
        self.full_counter()
    }

    /// Current unwrapped counter
    #[must_use]
    pub const fn full_counter(&self) -> u32 {
        self.high_order_wraps * ODOMETER_SPAN + self.previous_raw
    }

    /// Reset alongside the accumulated distance
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Distance in kilometers for an unwrapped odometer counter
#[must_use]
pub fn distance_km(wheel_diameter_inches: f64, full_counter: u32) -> f64 {
    wheel_diameter_inches * f64::from(full_counter) * PI * 2.54 / 100_000.0
}

/// Speed in km/h derived from cadence
#[must_use]
pub fn speed_kmh(rpm: u32) -> f64 {
    f64::from(rpm) * GEAR_RATIO * SPEED_CONSTANT
}

/// Outcome of decoding one sport frame
#[derive(Debug, Default)]
pub struct DecodeReport {
    /// Fields that were decoded and stored
    pub fields_updated: usize,
    /// Fields that failed to decode and kept their previous value
    pub failures: Vec<BikeError>,
}

impl DecodeReport {
    /// At least one field made it into the record
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.fields_updated > 0
    }

    fn record<T>(&mut self, result: Result<T>, store: impl FnOnce(T)) {
        match result {
            Ok(value) => {
                store(value);
                self.fields_updated += 1;
            }
            Err(err) => {
                debug!("Keeping previous value: {err}");
                self.failures.push(err);
            }
        }
    }
}

/// Right-pad a fixed-width field with `'0'` and read it as an integer
fn padded_int(field: &str, width: usize, name: &'static str) -> Result<u32> {
    let padded = format!("{field:0<width$}");
    padded.parse().map_err(|_| BikeError::FieldDecode {
        field: name,
        value: field.to_string(),
    })
}

fn plain_int(field: &str, name: &'static str) -> Result<u32> {
    field.trim().parse().map_err(|_| BikeError::FieldDecode {
        field: name,
        value: field.to_string(),
    })
}

/// Decode the payload of a `W6` frame into `telemetry`
///
/// Each field is decoded independently; a field that fails keeps its previous
/// value. Missing trailing fields are simply not updated. Speed is always
/// recomputed from whatever cadence the record holds afterwards.
pub fn decode_sport_data(
    payload: &str,
    telemetry: &mut Telemetry,
    odometer: &mut OdometerState,
    wheel_diameter_inches: f64,
    now: SystemTime,
) -> DecodeReport {
    let fields: Vec<&str> = payload.split(',').collect();
    let mut report = DecodeReport::default();

    if let Some(sync) = fields.first() {
        report.record(plain_int(sync, "sync"), |v| telemetry.sync = v);
    }

    if let Some(distance) = fields.get(1) {
        report.record(padded_int(distance, DISTANCE_WIDTH, "distance"), |raw| {
            let full = odometer.observe(raw);
            telemetry.distance_km = distance_km(wheel_diameter_inches, full);
        });
    }

    if let Some(rpm) = fields.get(2) {
        report.record(padded_int(rpm, RPM_WIDTH, "rpm"), |v| telemetry.rpm = v);
    }

    if let Some(pulse) = fields.get(3) {
        report.record(padded_int(pulse, PULSE_WIDTH, "heart_rate"), |v| {
            telemetry.heart_rate_bpm = v;
        });
    }

    if let Some(level) = fields.get(4) {
        report.record(padded_int(level, LEVEL_WIDTH, "level"), |v| {
            telemetry.level = v;
        });
    }

    if let Some(calories) = fields.get(5) {
        report.record(padded_int(calories, CALORIES_WIDTH, "calories"), |v| {
            telemetry.calories_kcal = f64::from(v) / 100.0;
        });
    }

    if let Some(power) = fields.get(6) {
        report.record(padded_int(power, POWER_WIDTH, "watts"), |v| {
            telemetry.watts = v;
        });
    }

    telemetry.speed_kmh = speed_kmh(telemetry.rpm);

    if report.is_success() {
        telemetry.last_update = Some(now);
        debug!(
            "Sport - dist:{:.3}km rpm:{} hr:{} lvl:{} W:{} speed:{:.1}km/h cal:{:.1}",
            telemetry.distance_km,
            telemetry.rpm,
            telemetry.heart_rate_bpm,
            telemetry.level,
            telemetry.watts,
            telemetry.speed_kmh,
            telemetry.calories_kcal
        );
    }

    report
}
