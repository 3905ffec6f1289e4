//! Shared telemetry data types.
//!
//! All types are `Copy` so consumers can take cheap snapshots.

// ── Speed ─────────────────────────────────────────────────────────────────────

/// NMEA ground speed is reported in knots; derived units are precomputed at
/// decode time so display code never converts.
pub const KNOTS_TO_MPH: f32 = 1.150_779_448;
pub const KNOTS_TO_KMH: f32 = 1.852;

#[derive(Clone, Copy, Default, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Speed {
    pub knots: f32,
    pub mph: f32,
    pub kmh: f32,
}

impl Speed {
    pub fn from_knots(knots: f32) -> Self {
        Self {
            knots,
            mph: knots * KNOTS_TO_MPH,
            kmh: knots * KNOTS_TO_KMH,
        }
    }
}

/// Display unit selection, owned by the (out-of-scope) settings menu.
#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpeedUnit {
    Knots,
    Mph,
    Kmh,
}

impl Speed {
    pub fn get(&self, unit: SpeedUnit) -> f32 {
        match unit {
            SpeedUnit::Knots => self.knots,
            SpeedUnit::Mph => self.mph,
            SpeedUnit::Kmh => self.kmh,
        }
    }
}

// ── Fix ───────────────────────────────────────────────────────────────────────

/// Latest decoded telemetry. Written only by the fix decoder, read by the
/// trip accumulator, the lap detector and the display layer. Overwritten in
/// place per sentence, never destroyed.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fix {
    /// Decimal degrees, signed. `None` until the receiver first reports one.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Speed,
    /// Course over ground, degrees, 0 = north.
    pub course: f32,
    /// Metres MSL, from the altitude sentence only.
    pub altitude: Option<f32>,
    /// True iff the last RMC-equivalent sentence reported an active fix.
    pub valid: bool,
    /// Monotonic ms of the last *valid* fix.
    pub fix_time: u32,
    /// Monotonic ms of the last decoded sentence, valid or not.
    pub last_parse_time: u32,
}

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

impl Fix {
    /// 16-wind compass rose string for the current course, for the heading
    /// display. Each sector is 22.5° wide, centered on its direction.
    pub fn compass_point(&self) -> &'static str {
        let c = self.course % 360.0;
        let c = if c < 0.0 { c + 360.0 } else { c };
        let idx = ((c + 11.25) / 22.5) as usize % 16;
        COMPASS_POINTS[idx]
    }
}
