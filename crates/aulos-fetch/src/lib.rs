#![forbid(unsafe_code)]

//! Segment fetching for the aulos streaming engine.
//!
//! One [`SegmentFetcher`] turns a segment descriptor into bytes: cache
//! consultation, custom-loader first refusal, URL fallbacks with jittered
//! retry, optional progressive chunk delivery, ISOBMFF integrity
//! validation, and a request-lifecycle event stream whose `RequestEnd` is
//! guaranteed even on cancellation.

mod cache;
mod error;
mod events;
mod fetcher;
mod isobmff;
mod loader;

pub use cache::SegmentCache;
pub use error::{FetchError, FetchResult};
pub use events::{FetchEvent, RequestId};
pub use fetcher::{FetchOptions, FetchedSegment, SegmentContext, SegmentFetcher};
pub use isobmff::{parse_sidx, parse_smooth_next_segments, validate_top_level_boxes};
pub use loader::{CustomLoaderOutcome, CustomSegmentLoader};
