//! NMEA sentence framer, checksum validator and fix decoder.
//!
//! Bytes from the receiver arrive in bursts and carry line noise: partial
//! lines, binary garbage, corrupted checksums. Anything that does not frame
//! and verify is dropped silently and only counted; the last good [`Fix`]
//! stays in place. Only two sentence kinds are decoded, the RMC-equivalent
//! (position / speed / course / validity) and the GGA-equivalent (altitude).

use crate::state::{Fix, Speed};

/// Longest accepted sentence. The NMEA line limit is 82 bytes; anything
/// longer is treated as a framing error.
const MAX_SENTENCE_LEN: usize = 128;

/// Non-blocking byte source, typically a UART RX buffer.
pub trait SerialRead {
    /// Read whatever is pending into `buf`, returning the byte count.
    /// Returns 0 when the buffer is empty; must never block.
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

// ── Sentence classification ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SentenceKind {
    Rmc,
    Gga,
    Other,
}

/// Link diagnostics, wrapping counters.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStats {
    pub sentences_rx: u16,
    pub checksum_errors: u16,
    pub frame_errors: u16,
    pub rmc_count: u16,
    pub gga_count: u16,
    pub unknown_count: u16,
}

// ── Parser ────────────────────────────────────────────────────────────────────

pub struct NmeaParser {
    line: heapless::Vec<u8, MAX_SENTENCE_LEN>,
    pub fix: Fix,
    pub stats: LinkStats,
}

impl NmeaParser {
    pub const fn new() -> Self {
        Self {
            line: heapless::Vec::new(),
            fix: Fix {
                latitude: None,
                longitude: None,
                speed: Speed {
                    knots: 0.0,
                    mph: 0.0,
                    kmh: 0.0,
                },
                course: 0.0,
                altitude: None,
                valid: false,
                fix_time: 0,
                last_parse_time: 0,
            },
            stats: LinkStats {
                sentences_rx: 0,
                checksum_errors: 0,
                frame_errors: 0,
                rmc_count: 0,
                gga_count: 0,
                unknown_count: 0,
            },
        }
    }

    /// True iff the last RMC-equivalent sentence reported an active fix.
    /// The display layer shows a "no signal" state while this is false.
    pub fn has_fix(&self) -> bool {
        self.fix.valid
    }

    /// Drain a non-blocking port until it reports empty.
    pub fn drain(&mut self, port: &mut impl SerialRead, now_ms: u32) {
        let mut buf = [0u8; 64];
        loop {
            let n = port.read(&mut buf);
            if n == 0 {
                break;
            }
            self.push_bytes(&buf[..n], now_ms);
        }
    }

    /// Feed received bytes. A `$` restarts the frame buffer, `\n` terminates
    /// a candidate sentence; overflow drops the line as a frame error.
    pub fn push_bytes(&mut self, bytes: &[u8], now_ms: u32) {
        for &b in bytes {
            if b == b'$' {
                self.line.clear();
            }

            if self.line.push(b).is_err() {
                self.stats.frame_errors = self.stats.frame_errors.wrapping_add(1);
                self.line.clear();
                continue;
            }

            if b == b'\n' {
                self.parse_sentence(now_ms);
                self.line.clear();
            }
        }
    }

    fn parse_sentence(&mut self, now_ms: u32) {
        // Decode from a copy of the frame (field slices borrow it while the
        // parser state is written).
        let line = self.line.clone();
        let s = trim_line(&line);
        if s.len() < 6 || s[0] != b'$' {
            return; // not a sentence start, expected line noise
        }

        let Some(star) = s.iter().rposition(|&b| b == b'*') else {
            self.stats.checksum_errors = self.stats.checksum_errors.wrapping_add(1);
            return;
        };
        let body = &s[1..star];
        if !checksum_ok(body, &s[star + 1..]) {
            self.stats.checksum_errors = self.stats.checksum_errors.wrapping_add(1);
            return;
        }

        self.stats.sentences_rx = self.stats.sentences_rx.wrapping_add(1);

        // Body is immutable while we decode; take what we need first.
        let kind = classify(body);
        let mut parts: heapless::Vec<&[u8], 20> = heapless::Vec::new();
        for p in body.split(|&b| b == b',') {
            if parts.push(p).is_err() {
                break;
            }
        }

        match kind {
            SentenceKind::Rmc => {
                self.stats.rmc_count = self.stats.rmc_count.wrapping_add(1);
                let _ = self.decode_rmc(&parts, now_ms);
            }
            SentenceKind::Gga => {
                self.stats.gga_count = self.stats.gga_count.wrapping_add(1);
                let _ = self.decode_gga(&parts);
            }
            SentenceKind::Other => {
                self.stats.unknown_count = self.stats.unknown_count.wrapping_add(1);
            }
        }
    }

    /// RMC-equivalent: `talker,time,status,lat,NS,lon,EW,speed_kn,course,...`
    ///
    /// All fields are decoded into locals before anything is written, so a
    /// bad field aborts the whole update with no partial `Fix` state.
    fn decode_rmc(&mut self, parts: &[&[u8]], now_ms: u32) -> Option<()> {
        let valid = field(parts, 2) == b"A";
        let latitude = dm_to_degrees(field(parts, 3), field(parts, 4));
        let longitude = dm_to_degrees(field(parts, 5), field(parts, 6));
        let speed_kn: f32 = numeric_or_zero(field(parts, 7))?;
        let course: f32 = numeric_or_zero(field(parts, 8))?;

        self.fix.valid = valid;
        self.fix.latitude = latitude;
        self.fix.longitude = longitude;
        self.fix.speed = Speed::from_knots(speed_kn);
        self.fix.course = course;
        self.fix.last_parse_time = now_ms;
        if valid {
            self.fix.fix_time = now_ms;
        }
        Some(())
    }

    /// GGA-equivalent: only the altitude field (index 9) is taken. An empty
    /// field clears the altitude; an unparseable one leaves it untouched.
    fn decode_gga(&mut self, parts: &[&[u8]]) -> Option<()> {
        let raw = field(parts, 9);
        let altitude = if raw.is_empty() {
            None
        } else {
            Some(parse_num::<f32>(raw)?)
        };
        self.fix.altitude = altitude;
        Some(())
    }
}

impl Default for NmeaParser {
    fn default() -> Self {
        Self::new()
    }
}

// ── Framing helpers ───────────────────────────────────────────────────────────

fn trim_line(line: &[u8]) -> &[u8] {
    let mut s = line;
    while let [rest @ .., last] = s {
        if matches!(*last, b'\r' | b'\n' | b' ') {
            s = rest;
        } else {
            break;
        }
    }
    s
}

/// XOR of every byte between `$` and `*` must match the two hex digits that
/// follow the `*`.
fn checksum_ok(body: &[u8], check: &[u8]) -> bool {
    let hex = if check.len() >= 2 { &check[..2] } else { check };
    let Ok(hex) = core::str::from_utf8(hex) else {
        return false;
    };
    let Ok(expected) = u8::from_str_radix(hex, 16) else {
        return false;
    };
    let mut calc = 0u8;
    for &b in body {
        calc ^= b;
    }
    calc == expected
}

/// Sentence kind from the 3-letter type code. The talker prefix is 2 or 3
/// letters, so the code is the tail of the first comma-separated field.
fn classify(body: &[u8]) -> SentenceKind {
    let head = body.split(|&b| b == b',').next().unwrap_or(b"");
    if head.len() < 5 {
        return SentenceKind::Other;
    }
    match &head[head.len() - 3..] {
        b"RMC" => SentenceKind::Rmc,
        b"GGA" => SentenceKind::Gga,
        _ => SentenceKind::Other,
    }
}

// ── Field decoding ────────────────────────────────────────────────────────────

fn field<'a>(parts: &[&'a [u8]], idx: usize) -> &'a [u8] {
    parts.get(idx).copied().unwrap_or(b"")
}

fn parse_num<T: core::str::FromStr>(raw: &[u8]) -> Option<T> {
    core::str::from_utf8(raw).ok()?.parse().ok()
}

/// NMEA leaves speed/course blank when unknown; blank decodes to zero while
/// non-numeric garbage fails the sentence.
fn numeric_or_zero(raw: &[u8]) -> Option<f32> {
    if raw.is_empty() {
        return Some(0.0);
    }
    parse_num(raw)
}

/// `DDMM.mmmm` / `DDDMM.mmmm` degrees-and-minutes to signed decimal degrees.
/// Southern and western hemispheres are negative. Blank or malformed input
/// decodes to "no coordinate" rather than an error.
fn dm_to_degrees(dm: &[u8], hemi: &[u8]) -> Option<f64> {
    if dm.is_empty() || hemi.is_empty() {
        return None;
    }
    let v: f64 = parse_num(dm)?;
    let deg = libm::floor(v / 100.0);
    let minutes = v - deg * 100.0;
    let mut dec = deg + minutes / 60.0;
    if hemi == b"S" || hemi == b"W" {
        dec = -dec;
    }
    Some(dec)
}
