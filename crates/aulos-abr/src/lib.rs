#![forbid(unsafe_code)]

//! Adaptive bitrate estimation for the aulos streaming engine.
//!
//! One [`AbrEstimator`] is owned per (media type, period) pair. It combines
//! a throughput estimator fed by completed requests, an in-flight
//! correction from the pending-requests store, a per-quality
//! maintainability scorer, a buffer-occupancy chooser, and a probing
//! ("guess") mode, and emits [`Estimate`]s naming the quality to fetch
//! next.
//!
//! The crate is protocol-agnostic: qualities come in as plain
//! [`RepresentationRef`]s, sorted ascending by bitrate.

mod bandwidth;
mod buffer_based;
mod estimator;
mod guess;
mod pending;
mod score;
mod types;

pub use bandwidth::BandwidthEstimator;
pub use buffer_based::BufferBasedChooser;
pub use estimator::AbrEstimator;
pub use guess::{GuessEstimator, GuessOptions};
pub use pending::{PendingRequest, PendingRequestsStore, ProgressSnapshot};
pub use score::{RepresentationScorer, ScoreConfidence, ScoreLookup};
pub use types::{AbrOptions, ClockSample, Estimate, RepresentationRef, SegmentContent, StreamEvent};
