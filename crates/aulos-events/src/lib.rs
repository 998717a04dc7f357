#![forbid(unsafe_code)]

//! Event bus and event taxonomy for the aulos streaming engine.
//!
//! Every subsystem publishes into one [`EventBus`]; payloads are plain
//! values (ids, numbers, strings) so this crate depends on nothing else in
//! the workspace.

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{
    AbrEvent, Event, ManifestEvent, PlaybackEvent, RebufferReason, StreamEvent, TrackEvent,
};
