use crate::clock::Clock;

/// Availability window calculator for dynamic content.
///
/// Estimates, from wall-clock time, which part of the presentation a
/// server currently serves: the timeshift window behind the live edge and
/// the most recent segment whose production is complete.
#[derive(Clone, Debug)]
pub struct AvailabilityBounds {
    /// Presentation zero point, seconds since the Unix epoch.
    pub availability_start_time: f64,
    /// `server - client` clock delta, milliseconds, when known.
    pub clock_offset_ms: Option<i64>,
    /// Addressable window behind the live edge, seconds. `None` means the
    /// whole presentation stays addressable.
    pub timeshift_buffer_depth: Option<f64>,
    /// Segments become addressable this many seconds before their nominal
    /// end (low-latency packaging).
    pub availability_time_offset: f64,
    /// Ask for one extra segment of lookahead beyond the computed edge.
    pub aggressive_mode: bool,
    pub clock: Clock,
}

impl AvailabilityBounds {
    /// "Now" on the presentation timeline, seconds.
    #[must_use]
    pub fn now_presentation(&self) -> f64 {
        let client = self.clock.now_secs();
        let server = client + self.clock_offset_ms.unwrap_or(0) as f64 / 1000.0;
        server - self.availability_start_time
    }

    /// Earliest addressable presentation time, before period clamping.
    #[must_use]
    pub fn minimum(&self) -> Option<f64> {
        self.timeshift_buffer_depth
            .map(|depth| self.now_presentation() - depth)
    }

    /// Latest presentation time whose media is fully produced.
    #[must_use]
    pub fn maximum(&self) -> f64 {
        self.now_presentation() + self.availability_time_offset
    }
}

impl Default for AvailabilityBounds {
    fn default() -> Self {
        Self {
            availability_start_time: 0.0,
            clock_offset_ms: None,
            timeshift_buffer_depth: None,
            availability_time_offset: 0.0,
            aggressive_mode: false,
            clock: Clock::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presentation_now_applies_clock_offset() {
        let bounds = AvailabilityBounds {
            availability_start_time: 50.0,
            clock_offset_ms: Some(10_000),
            clock: Clock::Fixed(100.0),
            ..AvailabilityBounds::default()
        };
        // client 100s + offset 10s - start 50s
        assert_eq!(bounds.now_presentation(), 60.0);
    }

    #[test]
    fn timeshift_depth_defines_minimum() {
        let bounds = AvailabilityBounds {
            timeshift_buffer_depth: Some(20.0),
            clock: Clock::Fixed(100.0),
            ..AvailabilityBounds::default()
        };
        assert_eq!(bounds.minimum(), Some(80.0));
        assert_eq!(bounds.maximum(), 100.0);
    }

    #[test]
    fn availability_time_offset_moves_the_edge_forward() {
        let bounds = AvailabilityBounds {
            availability_time_offset: 2.0,
            clock: Clock::Fixed(100.0),
            ..AvailabilityBounds::default()
        };
        assert_eq!(bounds.maximum(), 102.0);
    }
}
