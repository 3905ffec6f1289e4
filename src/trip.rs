//! Trip distance accumulator.
//!
//! Integrates great-circle distance between successive valid fixes into a
//! running kilometre total, which is flushed into the external odometer
//! store on demand. Low-speed samples are treated as GPS position jitter
//! and advance the anchor without accumulating.

use crate::clock::ticks_diff;
use crate::state::Fix;

/// Mean Earth radius in metres.
const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Minimum spacing between distance samples.
const SAMPLE_INTERVAL_MS: i32 = 1000;
/// At or below this ground speed the position delta is jitter, not travel.
const MOTION_GATE_KMH: f32 = 10.0;

/// External persistent odometer, a plain numeric accumulator with
/// last-write-wins semantics. Callers bound the write frequency by choosing
/// when to [`TripMeter::flush`].
pub trait OdometerStore {
    fn get_distance_total(&self) -> f64;
    fn add_distance(&mut self, delta_km: f64);
}

/// Anchor snapshot for the next displacement measurement.
#[derive(Clone, Copy)]
struct PreviousPlace {
    latitude: f64,
    longitude: f64,
    time: u32,
}

pub struct TripMeter {
    anchor: Option<PreviousPlace>,
    trip_km: f64,
}

impl TripMeter {
    pub const fn new() -> Self {
        Self {
            anchor: None,
            trip_km: 0.0,
        }
    }

    /// Unflushed trip distance in kilometres.
    pub fn total_km(&self) -> f64 {
        self.trip_km
    }

    /// Feed the current fix, once per polling cycle. The first valid fix
    /// seeds the anchor; afterwards a sample is taken whenever more than
    /// [`SAMPLE_INTERVAL_MS`] has passed since the anchor.
    pub fn update(&mut self, fix: &Fix) {
        if !fix.valid {
            return;
        }
        let (Some(lat), Some(lon)) = (fix.latitude, fix.longitude) else {
            return;
        };

        let Some(anchor) = self.anchor else {
            self.anchor = Some(PreviousPlace {
                latitude: lat,
                longitude: lon,
                time: fix.fix_time,
            });
            return;
        };

        if ticks_diff(fix.fix_time, anchor.time) <= SAMPLE_INTERVAL_MS {
            return;
        }

        if fix.speed.kmh <= MOTION_GATE_KMH {
            // Stationary or crawling: drop the displacement, keep the clock.
            self.anchor = Some(PreviousPlace {
                time: fix.fix_time,
                ..anchor
            });
            return;
        }

        let meters = haversine_m(anchor.latitude, anchor.longitude, lat, lon);
        self.trip_km += meters / 1000.0;
        self.anchor = Some(PreviousPlace {
            latitude: lat,
            longitude: lon,
            time: fix.fix_time,
        });
    }

    /// Push the accumulated trip into the odometer store and zero it.
    pub fn flush(&mut self, store: &mut impl OdometerStore) {
        store.add_distance(self.trip_km);
        #[cfg(feature = "defmt")]
        defmt::info!("odometer += {} km", self.trip_km);
        self.trip_km = 0.0;
    }
}

impl Default for TripMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Great-circle distance in metres. The intermediate is clamped so that
/// degenerate input degrades to a finite distance instead of NaN.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const DEG: f64 = core::f64::consts::PI / 180.0;
    let phi1 = lat1 * DEG;
    let phi2 = lat2 * DEG;
    let dphi = (lat2 - lat1) * DEG;
    let dlambda = (lon2 - lon1) * DEG;

    let sp = libm::sin(dphi / 2.0);
    let sl = libm::sin(dlambda / 2.0);
    let a = sp * sp + libm::cos(phi1) * libm::cos(phi2) * sl * sl;
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * libm::atan2(libm::sqrt(a), libm::sqrt(1.0 - a));
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Speed;

    fn fix(lat: f64, lon: f64, kmh: f32, fix_time: u32) -> Fix {
        Fix {
            latitude: Some(lat),
            longitude: Some(lon),
            speed: Speed {
                knots: kmh / 1.852,
                mph: kmh / 1.609,
                kmh,
            },
            valid: true,
            fix_time,
            last_parse_time: fix_time,
            ..Fix::default()
        }
    }

    #[derive(Default)]
    struct MemStore {
        total: f64,
    }

    impl OdometerStore for MemStore {
        fn get_distance_total(&self) -> f64 {
            self.total
        }
        fn add_distance(&mut self, delta_km: f64) {
            self.total += delta_km;
        }
    }

    #[test]
    fn haversine_known_displacement() {
        // 0.01 deg of longitude at 48.8566 N
        let d = haversine_m(48.8566, 2.3522, 48.8566, 2.3622);
        assert!((d - 731.6).abs() < 5.0, "got {}", d);
        assert_eq!(haversine_m(10.0, 20.0, 10.0, 20.0), 0.0);
    }

    #[test]
    fn first_valid_fix_seeds_anchor_without_distance() {
        let mut trip = TripMeter::new();
        trip.update(&fix(48.0, 2.0, 60.0, 1000));
        assert_eq!(trip.total_km(), 0.0);
    }

    #[test]
    fn invalid_or_empty_fixes_are_ignored() {
        let mut trip = TripMeter::new();
        let mut f = fix(48.0, 2.0, 60.0, 1000);
        f.valid = false;
        trip.update(&f);
        let mut f = fix(48.0, 2.0, 60.0, 1000);
        f.latitude = None;
        trip.update(&f);
        // anchor never seeded, so a later fix only seeds
        trip.update(&fix(48.0, 2.1, 60.0, 5000));
        assert_eq!(trip.total_km(), 0.0);
    }

    #[test]
    fn low_speed_advances_anchor_without_accumulating() {
        let mut trip = TripMeter::new();
        trip.update(&fix(48.0, 2.0, 5.0, 0));
        // large position jumps at 5 km/h never count
        trip.update(&fix(48.0, 2.1, 5.0, 2000));
        trip.update(&fix(48.1, 2.2, 5.0, 4000));
        assert_eq!(trip.total_km(), 0.0);

        // the anchor clock kept moving: the next fast sample measures from
        // the *original* anchor position
        trip.update(&fix(48.0, 2.01, 60.0, 6000));
        let expected = haversine_m(48.0, 2.0, 48.0, 2.01) / 1000.0;
        assert!((trip.total_km() - expected).abs() < 1e-9);
    }

    #[test]
    fn sample_interval_gate() {
        let mut trip = TripMeter::new();
        trip.update(&fix(48.0, 2.0, 60.0, 0));
        // only 1000 ms since anchor: not yet (strictly greater required)
        trip.update(&fix(48.0, 2.01, 60.0, 1000));
        assert_eq!(trip.total_km(), 0.0);
        trip.update(&fix(48.0, 2.01, 60.0, 1001));
        assert!(trip.total_km() > 0.0);
    }

    #[test]
    fn accumulates_known_track_at_speed() {
        let mut trip = TripMeter::new();
        trip.update(&fix(48.8566, 2.3522, 60.0, 0));
        trip.update(&fix(48.8566, 2.3622, 60.0, 1500));
        trip.update(&fix(48.8566, 2.3722, 60.0, 3000));
        // two hops of ~731.6 m
        assert!((trip.total_km() - 2.0 * 0.7316).abs() < 0.01, "got {}", trip.total_km());
    }

    #[test]
    fn flush_moves_total_into_store_and_resets() {
        let mut trip = TripMeter::new();
        let mut store = MemStore { total: 12000.0 };
        trip.update(&fix(48.8566, 2.3522, 60.0, 0));
        trip.update(&fix(48.8566, 2.3622, 60.0, 1500));
        let before = trip.total_km();
        assert!(before > 0.0);

        trip.flush(&mut store);
        assert_eq!(trip.total_km(), 0.0);
        assert!((store.get_distance_total() - (12000.0 + before)).abs() < 1e-9);

        // flushing again is harmless
        trip.flush(&mut store);
        assert!((store.get_distance_total() - (12000.0 + before)).abs() < 1e-9);
    }
}
