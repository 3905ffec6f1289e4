//! Application glue: button routing, the shared timer bank, the
//! acceleration timer and the main-loop polling cycle.
//!
//! The surrounding firmware owns the menu, the display and the IRQ wiring;
//! it tells this module which function is active and forwards debounced
//! button events. Button handlers are called from interrupt context, the
//! poll cycle from the main loop; both sides meet in [`TimerCell`]s.

use crate::clock::ticks_add;
use crate::gps::{NmeaParser, SerialRead};
use crate::laptimer::LapTimer;
use crate::stopwatch::Stopwatch;
use crate::sync::TimerCell;
use crate::trip::TripMeter;

/// Which instrument function the display currently shows. The menu layer
/// owns the transitions; timer routing only needs the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActiveFunction {
    Clock,
    Speed,
    Acceleration,
    LapTimer,
    Stopwatch,
    Odometer,
    Heading,
    Altitude,
}

// ── Acceleration timer ────────────────────────────────────────────────────────

/// Standing-start acceleration measurement target.
const ACCEL_TARGET_KMH: f32 = 100.0;
/// Above this the car is no longer standing; launch is not armed.
const LAUNCH_SPEED_KMH: f32 = 2.0;
/// How long a finished measurement stays on the display.
const RESULT_DISPLAY_MS: u32 = 4000;

/// 0→100 km/h timer built on [`Stopwatch`]. The launch trigger (forward
/// acceleration while standing) comes from the caller, which owns the
/// accelerometer; this side stops the clock when the decoded GPS speed
/// first reaches the target.
#[derive(Clone, Copy)]
pub struct AccelTimer {
    pub(crate) watch: Stopwatch,
    target_kmh: f32,
    last_result_ms: u32,
}

impl AccelTimer {
    pub const fn new() -> Self {
        Self {
            watch: Stopwatch::new(),
            target_kmh: ACCEL_TARGET_KMH,
            last_result_ms: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.watch.is_running()
    }

    /// Armed and waiting: idle, no stale run, no result on display, and
    /// the car is standing still.
    pub fn ready(&self, speed_kmh: f32, now_ms: u32) -> bool {
        !self.watch.running
            && self.watch.start_time.is_none()
            && !self.watch.show_lap_time(now_ms)
            && speed_kmh < LAUNCH_SPEED_KMH
    }

    /// Launch detected by the caller; starts the measurement.
    pub fn launch(&mut self, now_ms: u32) {
        self.watch.start(now_ms);
    }

    /// Poll with the decoded speed. Returns the measurement once, when the
    /// target speed is first reached; the result stays readable through
    /// [`last_result_ms`](Self::last_result_ms) while the display window is
    /// open.
    pub fn update(&mut self, speed_kmh: f32, now_ms: u32) -> Option<u32> {
        if self.watch.running && speed_kmh >= self.target_kmh {
            let result = self.watch.elapsed(now_ms);
            #[cfg(feature = "defmt")]
            defmt::info!("{} km/h reached in {} ms", self.target_kmh as u32, result);
            self.last_result_ms = result;
            self.watch.show_lap_until = ticks_add(now_ms, RESULT_DISPLAY_MS);
            self.watch.reset(now_ms);
            return Some(result);
        }
        None
    }

    pub fn showing_result(&self, now_ms: u32) -> bool {
        self.watch.show_lap_time(now_ms)
    }

    pub fn last_result_ms(&self) -> u32 {
        self.last_result_ms
    }

    pub fn elapsed(&self, now_ms: u32) -> u32 {
        self.watch.elapsed(now_ms)
    }

    pub fn reset(&mut self, now_ms: u32) {
        self.watch.reset(now_ms);
    }
}

impl Default for AccelTimer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Timer bank ────────────────────────────────────────────────────────────────

/// The three application timers, each in its own [`TimerCell`].
/// `const`-constructible so it can live in a `static` shared between the
/// interrupt handlers and the main loop.
pub struct TimerBank {
    pub stopwatch: TimerCell<Stopwatch>,
    pub laptimer: TimerCell<LapTimer>,
    pub accel: TimerCell<AccelTimer>,
}

impl TimerBank {
    pub const fn new() -> Self {
        Self {
            stopwatch: TimerCell::new(Stopwatch::new()),
            laptimer: TimerCell::new(LapTimer::new()),
            accel: TimerCell::new(AccelTimer::new()),
        }
    }

    /// SET/RESET button, routed by the active function. Interrupt-safe.
    ///
    /// - stopwatch: toggle run state
    /// - lap timer: end a running session, or reset and start a new one
    ///   when a GPS fix is available
    /// - acceleration: abort a measurement in progress
    pub fn on_set_press(&self, active: ActiveFunction, has_fix: bool, now_ms: u32) {
        match active {
            ActiveFunction::Stopwatch => self.stopwatch.with(|w| {
                if w.is_running() {
                    w.stop(now_ms);
                } else {
                    w.start(now_ms);
                }
            }),
            ActiveFunction::LapTimer => self.laptimer.with(|lt| {
                if lt.is_running() {
                    lt.end(now_ms);
                } else if has_fix {
                    lt.reset_session(now_ms);
                    lt.start(now_ms);
                }
            }),
            ActiveFunction::Acceleration => self.accel.with(|a| {
                if a.watch.start_time.is_some() {
                    a.reset(now_ms);
                }
            }),
            _ => {}
        }
    }

    /// Stopwatch function button: mark a lap while running, reset while
    /// idle. Interrupt-safe.
    pub fn on_lap_press(&self, now_ms: u32) {
        self.stopwatch.with(|w| {
            if w.is_running() {
                w.lap(now_ms);
            } else {
                w.reset(now_ms);
            }
        });
    }
}

impl Default for TimerBank {
    fn default() -> Self {
        Self::new()
    }
}

// ── Main loop ─────────────────────────────────────────────────────────────────

/// One main-loop iteration: drain the serial port, advance the trip
/// accumulator, and run lap detection and the acceleration target check
/// against the freshest fix. Never blocks; safe to call at any rate.
pub fn poll_cycle(
    parser: &mut NmeaParser,
    trip: &mut TripMeter,
    timers: &TimerBank,
    port: &mut impl SerialRead,
    now_ms: u32,
) {
    parser.drain(port, now_ms);
    trip.update(&parser.fix);
    if parser.has_fix() {
        let fix = parser.fix;
        timers.laptimer.with(|lt| lt.check_for_completed_lap(&fix, now_ms));
        timers.accel.with(|a| {
            a.update(fix.speed.kmh, now_ms);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::KNOTS_TO_KMH;

    /// Wrap an NMEA body in `$...*HH\r\n` with a correct checksum.
    fn sentence(body: &str) -> Vec<u8> {
        let cs = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${}*{:02X}\r\n", body, cs).into_bytes()
    }

    /// Decimal degrees to the NMEA DDMM.mmmm field value.
    fn dm(deg: f64) -> f64 {
        let whole = deg.floor();
        whole * 100.0 + (deg - whole) * 60.0
    }

    /// RMC sentence for a position/course/speed, northern/eastern hemisphere.
    fn rmc(lat: f64, lon: f64, course: f32, kmh: f32) -> Vec<u8> {
        let body = format!(
            "GPRMC,123519,A,{:.4},N,{:.4},E,{:.3},{:.1},230394,,",
            dm(lat),
            dm(lon),
            kmh / KNOTS_TO_KMH,
            course
        );
        sentence(&body)
    }

    struct OneShotPort(Vec<u8>);

    impl SerialRead for OneShotPort {
        fn read(&mut self, buf: &mut [u8]) -> usize {
            let n = self.0.len().min(buf.len());
            let rest = self.0.split_off(n);
            buf[..n].copy_from_slice(&self.0);
            self.0 = rest;
            n
        }
    }

    fn poll(parser: &mut NmeaParser, trip: &mut TripMeter, bank: &TimerBank, line: Vec<u8>, now: u32) {
        let mut port = OneShotPort(line);
        poll_cycle(parser, trip, bank, &mut port, now);
    }

    #[test]
    fn bank_is_static_constructible() {
        static BANK: TimerBank = TimerBank::new();
        BANK.stopwatch.with(|w| assert!(!w.is_running()));
    }

    #[test]
    fn set_press_toggles_stopwatch() {
        let bank = TimerBank::new();
        bank.on_set_press(ActiveFunction::Stopwatch, false, 1000);
        assert!(bank.stopwatch.snapshot().is_running());
        bank.on_set_press(ActiveFunction::Stopwatch, false, 4000);
        let w = bank.stopwatch.snapshot();
        assert!(!w.is_running());
        assert_eq!(w.elapsed(9000), 3000);
        // unrelated functions leave the timers alone
        bank.on_set_press(ActiveFunction::Clock, true, 5000);
        assert!(!bank.stopwatch.snapshot().is_running());
    }

    #[test]
    fn lap_press_marks_while_running_resets_while_idle() {
        let bank = TimerBank::new();
        bank.on_set_press(ActiveFunction::Stopwatch, false, 0);
        bank.on_lap_press(10_000); // seed
        bank.on_lap_press(25_000);
        assert_eq!(bank.stopwatch.snapshot().lap_time(), 15_000);

        bank.on_set_press(ActiveFunction::Stopwatch, false, 30_000);
        bank.on_lap_press(31_000); // idle: reset
        let w = bank.stopwatch.snapshot();
        assert_eq!(w.elapsed(40_000), 0);
        assert_eq!(w.lap_time(), 0);
    }

    #[test]
    fn lap_session_needs_a_fix_to_start() {
        let bank = TimerBank::new();
        bank.on_set_press(ActiveFunction::LapTimer, false, 0);
        assert!(!bank.laptimer.snapshot().is_running());

        bank.on_set_press(ActiveFunction::LapTimer, true, 100);
        assert!(bank.laptimer.snapshot().is_running());

        // pressing again ends the session
        bank.on_set_press(ActiveFunction::LapTimer, true, 5000);
        assert!(!bank.laptimer.snapshot().is_running());
    }

    #[test]
    fn accel_measurement_lifecycle() {
        let mut a = AccelTimer::new();
        assert!(a.ready(0.5, 0));
        assert!(!a.ready(30.0, 0), "not armed while moving");

        a.launch(1000);
        assert!(a.is_running());
        assert_eq!(a.update(55.0, 4000), None, "below target keeps running");
        assert_eq!(a.update(100.2, 9400), Some(8400));

        // result readable through the display window, watch back to idle
        assert!(!a.is_running());
        assert_eq!(a.last_result_ms(), 8400);
        assert!(a.showing_result(13_300));
        assert!(!a.showing_result(13_500));
        assert_eq!(a.elapsed(20_000), 0);
        // not re-armed until the result window has passed
        assert!(!a.ready(0.5, 12_000));
        assert!(a.ready(0.5, 14_000));
    }

    #[test]
    fn set_press_aborts_running_acceleration_run() {
        let bank = TimerBank::new();
        bank.accel.with(|a| a.launch(1000));
        bank.on_set_press(ActiveFunction::Acceleration, true, 2000);
        let a = bank.accel.snapshot();
        assert!(!a.is_running());
        assert_eq!(a.elapsed(5000), 0);
    }

    #[test]
    fn poll_cycle_decodes_and_accumulates_trip() {
        let mut parser = NmeaParser::new();
        let mut trip = TripMeter::new();
        let bank = TimerBank::new();

        poll(&mut parser, &mut trip, &bank, rmc(48.8566, 2.3522, 90.0, 60.0), 0);
        assert!(parser.has_fix());
        assert_eq!(trip.total_km(), 0.0, "first fix only seeds the anchor");

        poll(&mut parser, &mut trip, &bank, rmc(48.8566, 2.3622, 90.0, 60.0), 1500);
        let km = trip.total_km();
        assert!((km - 0.7316).abs() < 0.01, "got {}", km);
    }

    #[test]
    fn poll_cycle_drives_a_full_lap() {
        let mut parser = NmeaParser::new();
        let mut trip = TripMeter::new();
        let bank = TimerBank::new();

        let lat: f64 = 48.0;
        let lon: f64 = 2.0;
        // metres east per degree of longitude at 48 N
        let lon_scale = 111_320.0 * lat.to_radians().cos();
        let east = |m: f64| lon + m / lon_scale;

        // fix first, then the driver starts a session
        poll(&mut parser, &mut trip, &bank, rmc(lat, lon, 90.0, 60.0), 0);
        bank.on_set_press(ActiveFunction::LapTimer, parser.has_fix(), 50);
        assert!(bank.laptimer.snapshot().is_running());

        // next fix captures the start line
        poll(&mut parser, &mut trip, &bank, rmc(lat, east(0.5), 90.0, 60.0), 100);

        // out on the track
        poll(&mut parser, &mut trip, &bank, rmc(lat + 0.002, east(300.0), 90.0, 60.0), 15_000);
        poll(&mut parser, &mut trip, &bank, rmc(lat + 0.002, east(-200.0), 270.0, 60.0), 30_000);

        // approach the line: minimum inside the geofence, then receding
        poll(&mut parser, &mut trip, &bank, rmc(lat, east(-8.5), 92.0, 60.0), 46_000);
        poll(&mut parser, &mut trip, &bank, rmc(lat, east(-3.5), 92.0, 60.0), 47_000);
        poll(&mut parser, &mut trip, &bank, rmc(lat, east(6.5), 92.0, 60.0), 48_000);

        let lt = bank.laptimer.snapshot();
        assert_eq!(lt.lap_count(), 2, "one completed lap");
        assert_eq!(lt.lap_time(), 47_000 - 50);
        assert!(lt.show_lap_time(48_100));
        assert!(trip.total_km() > 0.5, "trip ran alongside: {}", trip.total_km());
    }
}
