//! GPS trip and lap timing core for a vehicle on-board instrument.
//!
//! Everything hardware-facing lives outside this crate: the owning firmware
//! feeds raw UART bytes in through [`gps::SerialRead`], forwards debounced
//! button events into [`app::TimerBank`] from interrupt context, and reads
//! the decoded [`state::Fix`] and timer state back out to drive the display.
//!
//! Data flows one way: bytes → sentence framer → fix decoder → [`state::Fix`]
//! → { trip accumulator, lap detector }. The [`stopwatch::Stopwatch`] is the
//! shared timing building block; the lap detector, the acceleration timer and
//! the generic stopwatch are all built on it.
//!
//! All timestamps are wrapping 32-bit monotonic milliseconds ([`clock`]);
//! durations are always computed with signed wrapping difference so counter
//! rollover never produces an absurd value.

#![cfg_attr(not(test), no_std)]

pub mod app;
pub mod clock;
pub mod gps;
pub mod laptimer;
pub mod state;
pub mod stopwatch;
pub mod sync;
pub mod trip;

pub use app::{poll_cycle, AccelTimer, ActiveFunction, TimerBank};
pub use gps::{NmeaParser, SerialRead};
pub use laptimer::{FastestLap, LapTimer};
pub use state::{Fix, Speed, SpeedUnit};
pub use stopwatch::{parse_time, Stopwatch};
pub use sync::TimerCell;
pub use trip::{OdometerStore, TripMeter};
