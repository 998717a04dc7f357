//! Conversions between index ticks and presentation seconds.
//!
//! For a tick `t` on an index timeline with timescale `ts` and
//! presentation time offset `pto` (ticks), inside a period starting at
//! `period_start` (seconds):
//!
//! ```text
//! presentation = (t - pto) / ts + period_start
//! t            = (presentation - period_start) * ts + pto
//! ```

/// Convert a presentation time (seconds) to index ticks.
///
/// The result is rounded to the nearest tick so that a time computed from
/// a previous segment's floating-point end lands exactly on the boundary
/// instead of one ulp below it.
#[must_use]
pub fn to_index_ticks(presentation: f64, timescale: u64, pto: u64, period_start: f64) -> i64 {
    let ticks = (presentation - period_start) * timescale as f64 + pto as f64;
    ticks.round() as i64
}

/// Convert index ticks to a presentation time in seconds.
#[must_use]
pub fn from_index_ticks(ticks: i64, timescale: u64, pto: u64, period_start: f64) -> f64 {
    (ticks as f64 - pto as f64) / timescale as f64 + period_start
}
