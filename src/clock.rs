//! Wrapping 32-bit millisecond clock.
//!
//! The tick counter overflows roughly every 49.7 days, so instants must be
//! compared with signed wrapping difference, never plain subtraction or `>`.

/// Current monotonic time in milliseconds, truncated to the wrapping u32
/// tick domain used throughout this crate.
pub fn now_ms() -> u32 {
    embassy_time::Instant::now().as_millis() as u32
}

/// Signed difference `a − b` in milliseconds, correct across wraparound
/// as long as the instants are less than ~24.8 days apart.
pub fn ticks_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// Deadline `t + ms` in the wrapping tick domain.
pub fn ticks_add(t: u32, ms: u32) -> u32 {
    t.wrapping_add(ms)
}

/// True while a display deadline lies in the future.
pub fn window_open(until: u32, now: u32) -> bool {
    ticks_diff(until, now) > 0
}
