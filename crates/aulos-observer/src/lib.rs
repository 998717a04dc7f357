#![forbid(unsafe_code)]

//! Playback observation for the aulos streaming engine.
//!
//! A [`PlaybackObserver`] periodically samples the host media element and
//! classifies its state into `playing / rebuffering / freezing`
//! observations. The classification itself is a pure state machine
//! ([`ObservationGenerator`]) driven by snapshots, so every rule is
//! testable without a media element or timers.

mod generator;
mod observer;
mod types;

pub use generator::ObservationGenerator;
pub use observer::{MediaElement, PlaybackObserver};
pub use types::{
    FreezingStatus, MediaSnapshot, Observation, ObservationEvent, ObserverMode, ObserverOptions,
    RebufferReason, RebufferingStatus, ResumeGaps, TimeRanges,
};
