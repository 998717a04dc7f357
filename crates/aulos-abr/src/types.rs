use web_time::Instant;

use crate::guess::GuessOptions;

/// The slice of a quality level the estimator needs to know about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepresentationRef {
    pub id: String,
    /// Bits per second.
    pub bitrate: u64,
    pub width: Option<u32>,
}

/// Playback sample relevant to adaptation decisions.
#[derive(Clone, Copy, Debug)]
pub struct ClockSample {
    /// Current position, presentation seconds.
    pub position: f64,
    /// Seconds of buffered media ahead of the position.
    pub buffer_gap: f64,
    /// Playback rate.
    pub speed: f64,
    /// Content duration, seconds (may be infinite for live).
    pub duration: f64,
    /// Distance to the live edge, seconds, when playing live content.
    pub live_gap: Option<f64>,
}

/// What a request was fetching, as the estimator sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentContent {
    pub representation_id: String,
    /// The representation's bitrate, bits per second.
    pub bitrate: u64,
    /// Media duration of the segment, seconds; `None` for init segments.
    pub segment_duration: Option<f64>,
    pub is_init: bool,
}

/// Events flowing from the streaming pipeline into the estimator.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// A request completed; feed the throughput and score estimators.
    Metrics {
        duration_ms: f64,
        size: u64,
        content: SegmentContent,
    },
    RequestBegin {
        id: String,
        content: SegmentContent,
        requested_at: Instant,
    },
    Progress {
        id: String,
        bytes: u64,
        at: Instant,
    },
    RequestEnd {
        id: String,
    },
    /// The pipeline actually switched to this quality.
    RepresentationChanged {
        representation: RepresentationRef,
    },
    /// A segment was pushed to the media buffer.
    AddedSegment {
        buffered_to: f64,
    },
}

/// One adaptation decision.
#[derive(Clone, Debug)]
pub struct Estimate {
    /// Chosen bitrate, bits per second.
    pub bitrate: u64,
    pub representation: RepresentationRef,
    /// The switch should happen immediately, aborting in-flight work.
    pub urgent: bool,
    /// Produced by a manual-bitrate override.
    pub manual: bool,
    /// Bitrate of the last quality with a high-confidence maintainability
    /// score ≥ 1, divided by the playback speed.
    pub known_stable_bitrate: Option<f64>,
}

/// Estimator configuration. Every threshold is a tunable with a stable
/// default.
#[derive(Clone, Debug)]
pub struct AbrOptions {
    /// Lower bound for automatic choices, bits per second.
    pub min_auto_bitrate: u64,
    /// Upper bound for automatic choices, bits per second.
    pub max_auto_bitrate: u64,
    /// Buffer gap above which the buffer-based chooser engages, seconds.
    pub buffer_based_activation_gap: f64,
    /// Buffer gap below which the buffer-based chooser disengages.
    pub buffer_based_deactivation_gap: f64,
    pub guess: GuessOptions,
}

impl Default for AbrOptions {
    fn default() -> Self {
        Self {
            min_auto_bitrate: 0,
            max_auto_bitrate: u64::MAX,
            buffer_based_activation_gap: 10.0,
            buffer_based_deactivation_gap: 5.0,
            guess: GuessOptions::default(),
        }
    }
}
