//! The capability set shared by every segment-index variant, and the
//! tagged union tying them together.

mod base;
mod bounds;
mod list;
mod smooth;
mod template;
mod timeline;

pub use base::BaseIndex;
pub use bounds::AvailabilityBounds;
pub use list::{ListEntry, ListIndex};
pub use smooth::SmoothIndex;
pub use template::{TemplateIndex, TemplateIndexOptions};
pub use timeline::{TimelineEntry, TimelineIndex, TimelineIndexOptions};

use crate::segment::{ByteRange, SegmentInfo};

/// An addressable edge of an index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IndexPosition {
    /// The position, presentation seconds.
    At(f64),
    /// The index exists but currently produces no segment.
    Empty,
    /// Not determinable yet (e.g. a `sidx` not parsed).
    Unknown,
}

impl IndexPosition {
    #[must_use]
    pub fn as_time(self) -> Option<f64> {
        match self {
            Self::At(t) => Some(t),
            Self::Empty | Self::Unknown => None,
        }
    }
}

/// Tri-state answer to "can this segment still be fetched?".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentAvailability {
    Available,
    Unavailable,
    Unknown,
}

/// A segment handed to [`RepresentationIndex::add_segments`], e.g. parsed
/// out of a `sidx` box or predicted by a smooth `tfrf` box.
#[derive(Clone, Debug, PartialEq)]
pub struct AddedSegment {
    /// Start, index ticks.
    pub start: u64,
    /// Duration, index ticks.
    pub duration: u64,
    /// Byte range, for range-addressed media.
    pub byte_range: Option<ByteRange>,
}

/// The capability set every index variant implements.
pub trait SegmentIndexOps {
    /// The initialization segment, if the scheme has one.
    fn init_segment(&self) -> Option<SegmentInfo>;

    /// Media segments for the window `[from, from + duration)` seconds.
    ///
    /// Never fails: a window before the first available segment clips up,
    /// a window past the last yields an empty list. Returned segments are
    /// strictly increasing in time.
    fn segments(&self, from: f64, duration: f64) -> Vec<SegmentInfo>;

    /// Earliest addressable presentation time.
    fn first_position(&self) -> IndexPosition;

    /// Start of the last addressable segment.
    fn last_position(&self) -> IndexPosition;

    /// Hint that the manifest should be refreshed to describe segments up
    /// to `up_to` (presentation seconds).
    fn should_refresh(&self, up_to: f64) -> bool;

    /// If `time` falls in an index-declared gap, the presentation time at
    /// which the gap ends.
    fn check_discontinuity(&self, time: f64) -> Option<f64>;

    /// Whether a previously returned segment can still be fetched.
    fn is_segment_still_available(&self, segment: &SegmentInfo) -> SegmentAvailability;

    /// Whether a server 404 for a listed segment may mean this index is
    /// stale rather than the segment being gone.
    fn can_be_out_of_sync_error(&self) -> bool;

    /// Whether the index will never list further segments.
    fn is_finished(&self) -> bool;

    /// Whether the index can answer segment queries at all.
    fn is_initialized(&self) -> bool;
}

/// One Representation's segment index: a tagged union over the five
/// addressing schemes, uniformly consumed through [`SegmentIndexOps`].
#[derive(Clone, Debug)]
pub enum RepresentationIndex {
    Template(TemplateIndex),
    Timeline(TimelineIndex),
    Base(BaseIndex),
    List(ListIndex),
    Smooth(SmoothIndex),
}

macro_rules! dispatch {
    ($self:ident, $index:ident => $body:expr) => {
        match $self {
            Self::Template($index) => $body,
            Self::Timeline($index) => $body,
            Self::Base($index) => $body,
            Self::List($index) => $body,
            Self::Smooth($index) => $body,
        }
    };
}

impl RepresentationIndex {
    /// Fully adopt `other`'s view of the content.
    ///
    /// Used when a manifest refresh replaces the Representation wholesale.
    /// `replace` with an identical index is a no-op for every observable
    /// query.
    pub fn replace(&mut self, other: &Self) {
        *self = other.clone();
    }

    /// Merge `other` into this index, keeping locally-known history that
    /// the newer manifest no longer lists.
    pub fn update(&mut self, other: &Self) {
        match (self, other) {
            (Self::Timeline(old), Self::Timeline(new)) => old.merge_from(new),
            (Self::Smooth(old), Self::Smooth(new)) => old.merge_from(new),
            (Self::Base(old), Self::Base(new)) => {
                // A parsed sidx is ground truth; only adopt the new index
                // when ours has not been initialized yet.
                if !old.is_initialized() {
                    *old = new.clone();
                }
            }
            (this, other) => {
                tracing::debug!("index update falls back to replace");
                this.replace(other);
            }
        }
    }

    /// Feed externally discovered segments (sidx parse, smooth prediction).
    ///
    /// Idempotent: adding the same list twice does not duplicate segments.
    pub fn add_segments(&mut self, segments: &[AddedSegment]) {
        match self {
            Self::Base(index) => index.add_segments(segments),
            Self::Smooth(index) => index.add_segments(segments),
            Self::Timeline(index) => index.add_segments(segments),
            Self::Template(_) | Self::List(_) => {
                tracing::debug!("add_segments ignored by this index scheme");
            }
        }
    }

    /// The segment whose span contains `time`, if any.
    ///
    /// Companion to [`SegmentIndexOps::segments`] used for seek snapping:
    /// windowed lookups start at segment boundaries, while a seek must
    /// land on the segment covering an arbitrary position.
    #[must_use]
    pub fn segment_containing(&self, time: f64) -> Option<SegmentInfo> {
        match self {
            Self::Timeline(index) => index.segment_containing(time),
            Self::Smooth(index) => index.segment_containing(time),
            _ => {
                // Fixed-duration and list schemes include the containing
                // segment in windowed lookups already.
                self.segments(time, f64::EPSILON.max(1e-6))
                    .into_iter()
                    .next()
            }
        }
    }
}

impl SegmentIndexOps for RepresentationIndex {
    fn init_segment(&self) -> Option<SegmentInfo> {
        dispatch!(self, index => index.init_segment())
    }

    fn segments(&self, from: f64, duration: f64) -> Vec<SegmentInfo> {
        dispatch!(self, index => index.segments(from, duration))
    }

    fn first_position(&self) -> IndexPosition {
        dispatch!(self, index => index.first_position())
    }

    fn last_position(&self) -> IndexPosition {
        dispatch!(self, index => index.last_position())
    }

    fn should_refresh(&self, up_to: f64) -> bool {
        dispatch!(self, index => index.should_refresh(up_to))
    }

    fn check_discontinuity(&self, time: f64) -> Option<f64> {
        dispatch!(self, index => index.check_discontinuity(time))
    }

    fn is_segment_still_available(&self, segment: &SegmentInfo) -> SegmentAvailability {
        dispatch!(self, index => index.is_segment_still_available(segment))
    }

    fn can_be_out_of_sync_error(&self) -> bool {
        dispatch!(self, index => index.can_be_out_of_sync_error())
    }

    fn is_finished(&self) -> bool {
        dispatch!(self, index => index.is_finished())
    }

    fn is_initialized(&self) -> bool {
        dispatch!(self, index => index.is_initialized())
    }
}
