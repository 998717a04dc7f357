/// A byte range within a resource, inclusive start, optional inclusive end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    #[must_use]
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }
}

/// Transport-specific hints carried alongside a segment descriptor.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportHint {
    /// Smooth segments are patched back into their index from the `tfrf`
    /// box; the raw tick time identifies the entry to patch after.
    Smooth { tick_time: u64 },
    /// Byte range of the `sidx` box to parse out of the init payload.
    SidxRange(ByteRange),
}

/// One downloadable media unit, as produced by a segment index.
///
/// Pure value: times are presentation seconds, already shifted by the
/// index's presentation time offset and period start.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentInfo {
    /// Unique within one Representation.
    pub id: String,
    /// Segment number for `$Number$` addressing.
    pub number: Option<u64>,
    /// Presentation start time, seconds.
    pub time: f64,
    /// Duration, seconds.
    pub duration: f64,
    /// Presentation end time, seconds. Always greater than `time`.
    pub end: f64,
    /// Tick rate used to derive `timestamp_offset` without float drift.
    pub timescale: u64,
    /// Ordered URL fallbacks; `None` for segments carried in-band.
    pub media_urls: Option<Vec<String>>,
    /// Byte range within the target URL, if range-addressed.
    pub byte_range: Option<ByteRange>,
    /// Whether this is an initialization segment.
    pub is_init: bool,
    /// Offset to apply when pushing to the media pipeline, seconds.
    pub timestamp_offset: f64,
    /// Transport-specific hints.
    pub hint: Option<TransportHint>,
}

impl SegmentInfo {
    /// Complete-duration sanity: indexes must never hand out a segment
    /// whose end does not lie after its start.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.is_init || self.end > self.time
    }
}
