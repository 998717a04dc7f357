#![forbid(unsafe_code)]

//! Manifest model for the aulos streaming engine.
//!
//! A [`Manifest`] owns an ordered sequence of [`Period`]s, each owning its
//! [`Adaptation`]s (selectable tracks), each owning its bitrate-sorted
//! [`Representation`]s, each owning a segment index. Refreshes are
//! absorbed in place ([`Manifest::update`] / [`Manifest::replace`]) so
//! that components holding id-based references never dangle.
//!
//! Ingestion starts at an already-parsed intermediate representation
//! ([`MpdIr`] / [`SmoothIr`]); building may suspend on external resources
//! (UTC clock endpoints, xlinked periods), surfaced as [`ParseOutcome`]
//! continuations the caller drives to completion.

mod build;
mod error;
mod ir;
mod lang;
mod smooth;
mod types;
mod update;

pub use build::{build_dash_manifest, parse_utc_timestamp, ParseContext, ParseOutcome};
pub use error::{ManifestError, ManifestResult, ManifestWarning};
pub use ir::{
    AdaptationIr, MpdIr, PeriodIr, RepresentationIr, SegmentBaseIr, SegmentListEntryIr,
    SegmentListIr, SegmentTemplateIr, TimelineEntryIr, UtcTimingIr, UtcTimingScheme,
};
pub use lang::normalize_language;
pub use smooth::{build_smooth_manifest, SmoothIr, SmoothQualityIr, SmoothStreamIr};
pub use types::{
    Adaptation, HdrInfo, Manifest, MaximumTimeDescriptor, MediaType, Period, Representation,
    TimeBounds, TransportType,
};

/// Lifetime applied when a dynamic manifest advertises
/// `minimumUpdatePeriod="0"`: refresh as often as reasonable, not in a
/// tight loop.
pub const FALLBACK_LIFETIME_WHEN_UPDATE_PERIOD_ZERO: f64 = 3.0;
