use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock source for availability computations.
///
/// Dynamic indexes derive what is currently addressable from "now"; tests
/// and tooling pin it with [`Clock::Fixed`].
#[derive(Clone, Debug)]
pub enum Clock {
    /// Use the system clock.
    System,
    /// A fixed number of seconds since the Unix epoch.
    Fixed(f64),
}

impl Clock {
    /// Seconds since the Unix epoch.
    #[must_use]
    pub fn now_secs(&self) -> f64 {
        match self {
            Self::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            Self::Fixed(secs) => *secs,
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::System
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_returns_its_value() {
        assert_eq!(Clock::Fixed(100.0).now_secs(), 100.0);
    }

    #[test]
    fn system_clock_is_past_2020() {
        assert!(Clock::System.now_secs() > 1_577_836_800.0);
    }
}
