#![forbid(unsafe_code)]

//! Segment index algorithms for the aulos streaming engine.
//!
//! A segment index answers, for one quality of one track: where is the
//! initialization segment, which media segments cover a given time window,
//! what is currently addressable, and does the index need the manifest to
//! be refreshed. Five addressing schemes are supported behind one
//! capability set: fixed-duration templates, explicit timelines,
//! `sidx`-driven byte ranges, explicit lists, and smooth-streaming
//! timelines patched at runtime.

mod clock;
mod error;
mod index;
mod scale;
mod segment;
mod template;

pub use clock::Clock;
pub use error::{IndexError, IndexResult, TemplateError};
pub use index::{
    AddedSegment, AvailabilityBounds, BaseIndex, IndexPosition, ListEntry, ListIndex,
    RepresentationIndex, SegmentAvailability, SegmentIndexOps, SmoothIndex, TemplateIndex,
    TemplateIndexOptions, TimelineEntry, TimelineIndex, TimelineIndexOptions,
};
pub use scale::{from_index_ticks, to_index_ticks};
pub use segment::{ByteRange, SegmentInfo, TransportHint};
pub use template::{resolve_template, validate_template, ResolvedValues, TemplateContext};

/// A trailing segment shorter than this (seconds) is not worth a request
/// and is omitted from fixed-duration indexes.
pub const MINIMUM_SEGMENT_SIZE: f64 = 0.005;
