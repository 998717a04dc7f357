use std::time::Duration;

/// Buffered time ranges of the media element.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeRanges {
    ranges: Vec<(f64, f64)>,
}

impl TimeRanges {
    #[must_use]
    pub fn new(ranges: Vec<(f64, f64)>) -> Self {
        Self { ranges }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[(f64, f64)] {
        &self.ranges
    }

    /// The range containing `time`, if any.
    #[must_use]
    pub fn range_containing(&self, time: f64) -> Option<(f64, f64)> {
        self.ranges
            .iter()
            .copied()
            .find(|&(start, end)| time >= start && time < end)
    }

    /// Seconds of buffered media ahead of `time`; infinite when `time`
    /// sits in no buffered range at all (nothing there to play).
    #[must_use]
    pub fn gap_from(&self, time: f64) -> f64 {
        match self.range_containing(time) {
            Some((_, end)) => end - time,
            None => f64::INFINITY,
        }
    }

    /// End of the last buffered range.
    #[must_use]
    pub fn end(&self) -> Option<f64> {
        self.ranges.last().map(|&(_, end)| end)
    }
}

/// Sampling environment of the observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObserverMode {
    /// Buffer fed through a media-source API.
    MediaSource,
    /// Media-source with low-latency content: tighter gaps, faster
    /// sampling.
    LowLatency,
    /// The element plays a URL directly; buffer internals are opaque.
    DirectFile,
}

/// A `{default, low_latency}` pair of gap thresholds, seconds.
#[derive(Clone, Copy, Debug)]
pub struct ResumeGaps {
    pub default: f64,
    pub low_latency: f64,
}

impl ResumeGaps {
    #[must_use]
    pub fn for_mode(&self, mode: ObserverMode) -> f64 {
        match mode {
            ObserverMode::LowLatency => self.low_latency,
            _ => self.default,
        }
    }
}

/// Observer tunables, with the stable defaults.
#[derive(Clone, Debug)]
pub struct ObserverOptions {
    pub mode: ObserverMode,
    pub sampling_interval_mediasource: Duration,
    pub sampling_interval_low_latency: Duration,
    pub sampling_interval_no_mediasource: Duration,
    /// Buffer gap at or below which rebuffering starts.
    pub rebuffering_gap: ResumeGaps,
    /// Gap to refill before leaving a seek-caused rebuffering.
    pub resume_gap_after_seeking: ResumeGaps,
    /// Gap to refill before leaving a not-ready rebuffering.
    pub resume_gap_not_enough_data: ResumeGaps,
    /// Gap to refill before leaving a starvation rebuffering.
    pub resume_gap_after_buffering: ResumeGaps,
    /// Minimum buffer ahead for a stuck position to count as freezing
    /// rather than starvation.
    pub freezing_minimum_buffer: f64,
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self {
            mode: ObserverMode::MediaSource,
            sampling_interval_mediasource: Duration::from_millis(1_000),
            sampling_interval_low_latency: Duration::from_millis(200),
            sampling_interval_no_mediasource: Duration::from_millis(500),
            rebuffering_gap: ResumeGaps { default: 0.5, low_latency: 0.2 },
            resume_gap_after_seeking: ResumeGaps { default: 1.5, low_latency: 0.5 },
            resume_gap_not_enough_data: ResumeGaps { default: 1.5, low_latency: 0.5 },
            resume_gap_after_buffering: ResumeGaps { default: 1.5, low_latency: 0.5 },
            freezing_minimum_buffer: 0.5,
        }
    }
}

impl ObserverOptions {
    #[must_use]
    pub fn sampling_interval(&self) -> Duration {
        match self.mode {
            ObserverMode::MediaSource => self.sampling_interval_mediasource,
            ObserverMode::LowLatency => self.sampling_interval_low_latency,
            ObserverMode::DirectFile => self.sampling_interval_no_mediasource,
        }
    }

    #[must_use]
    pub fn resume_gap(&self, reason: RebufferReason) -> f64 {
        let gaps = match reason {
            RebufferReason::Seeking | RebufferReason::InternalSeek => {
                self.resume_gap_after_seeking
            }
            RebufferReason::NotReady => self.resume_gap_not_enough_data,
            RebufferReason::Buffering => self.resume_gap_after_buffering,
        };
        gaps.for_mode(self.mode)
    }
}

/// What triggered a sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObservationEvent {
    /// First sample, taken at observer creation.
    Init,
    /// Periodic timer sample.
    Sample,
    Timeupdate,
    Canplay,
    Play,
    Seeking,
    /// A `seeking` raised by the player itself, not the user.
    InternalSeeking,
    Seeked,
    Loadedmetadata,
    Ratechange,
}

/// Why rebuffering started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebufferReason {
    Seeking,
    InternalSeek,
    NotReady,
    Buffering,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RebufferingStatus {
    pub reason: RebufferReason,
    /// Position at which rebuffering started.
    pub position: f64,
    /// Monotonic seconds when it started.
    pub since: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FreezingStatus {
    /// Monotonic seconds when the freeze was first observed.
    pub since: f64,
}

/// Raw state read from the media element in one go.
#[derive(Clone, Debug)]
pub struct MediaSnapshot {
    pub position: f64,
    pub duration: f64,
    pub buffered: TimeRanges,
    pub paused: bool,
    pub ended: bool,
    pub ready_state: u8,
    pub playback_rate: f64,
    pub seeking: bool,
}

/// One normalized playback observation.
#[derive(Clone, Debug)]
pub struct Observation {
    pub event: ObservationEvent,
    pub position: f64,
    pub duration: f64,
    pub buffer_gap: f64,
    pub buffered: TimeRanges,
    pub current_range: Option<(f64, f64)>,
    pub paused: bool,
    pub ended: bool,
    pub ready_state: u8,
    pub playback_rate: f64,
    pub seeking: bool,
    pub rebuffering: Option<RebufferingStatus>,
    pub freezing: Option<FreezingStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_is_infinite_outside_buffered_ranges() {
        let ranges = TimeRanges::new(vec![(0.0, 4.0), (8.0, 12.0)]);
        assert_eq!(ranges.gap_from(1.0), 3.0);
        assert_eq!(ranges.gap_from(5.0), f64::INFINITY);
        assert_eq!(ranges.range_containing(9.0), Some((8.0, 12.0)));
        assert_eq!(ranges.end(), Some(12.0));
    }

    #[test]
    fn resume_gaps_differ_by_mode() {
        let mut options = ObserverOptions::default();
        assert_eq!(options.resume_gap(RebufferReason::Seeking), 1.5);
        options.mode = ObserverMode::LowLatency;
        assert_eq!(options.resume_gap(RebufferReason::Seeking), 0.5);
    }
}
