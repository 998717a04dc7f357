use crate::{
    index::{AddedSegment, IndexPosition, SegmentAvailability, SegmentIndexOps},
    scale::{from_index_ticks, to_index_ticks},
    segment::{ByteRange, SegmentInfo, TransportHint},
};

/// `SegmentBase` index: the init segment carries a `sidx` box whose parse
/// supplies the media segments later through `add_segments`.
#[derive(Clone, Debug)]
pub struct BaseIndex {
    representation_id: String,
    timescale: u64,
    presentation_time_offset: u64,
    period_start: f64,
    media_urls: Vec<String>,
    init_range: Option<ByteRange>,
    /// Where the `sidx` box sits inside the resource.
    index_range: Option<ByteRange>,
    segments: Vec<AddedSegment>,
    initialized: bool,
    /// Workaround for packagers that write a truncated byte range for the
    /// final segment: treat its range as open-ended.
    unbounded_last_segment_range: bool,
}

impl BaseIndex {
    #[must_use]
    pub fn new(
        representation_id: String,
        timescale: u64,
        presentation_time_offset: u64,
        period_start: f64,
        media_urls: Vec<String>,
        init_range: Option<ByteRange>,
        index_range: Option<ByteRange>,
        unbounded_last_segment_range: bool,
    ) -> Self {
        Self {
            representation_id,
            timescale,
            presentation_time_offset,
            period_start,
            media_urls,
            init_range,
            index_range,
            segments: Vec::new(),
            initialized: false,
            unbounded_last_segment_range,
        }
    }

    fn to_ticks(&self, t: f64) -> i64 {
        to_index_ticks(
            t,
            self.timescale,
            self.presentation_time_offset,
            self.period_start,
        )
    }

    fn to_secs(&self, ticks: i64) -> f64 {
        from_index_ticks(
            ticks,
            self.timescale,
            self.presentation_time_offset,
            self.period_start,
        )
    }

    /// Feed segments parsed out of the `sidx` box.
    ///
    /// Idempotent: entries already present (by start tick) are skipped.
    pub fn add_segments(&mut self, segments: &[AddedSegment]) {
        for added in segments {
            if self.segments.iter().any(|s| s.start == added.start) {
                continue;
            }
            self.segments.push(added.clone());
        }
        self.segments.sort_by_key(|s| s.start);
        if self.unbounded_last_segment_range {
            if let Some(last) = self.segments.last_mut() {
                if let Some(range) = &mut last.byte_range {
                    range.end = None;
                }
            }
        }
        self.initialized = true;
        tracing::debug!(
            representation = %self.representation_id,
            count = self.segments.len(),
            "sidx segments absorbed"
        );
    }

    fn make_segment(&self, entry: &AddedSegment, position: usize) -> SegmentInfo {
        let time = self.to_secs(entry.start as i64);
        let end = self.to_secs((entry.start + entry.duration) as i64);
        SegmentInfo {
            id: entry.start.to_string(),
            number: Some(position as u64 + 1),
            time,
            duration: end - time,
            end,
            timescale: self.timescale,
            media_urls: Some(self.media_urls.clone()),
            byte_range: entry.byte_range,
            is_init: false,
            timestamp_offset: self.period_start
                - self.presentation_time_offset as f64 / self.timescale as f64,
            hint: None,
        }
    }
}

impl SegmentIndexOps for BaseIndex {
    fn init_segment(&self) -> Option<SegmentInfo> {
        Some(SegmentInfo {
            id: "init".to_string(),
            number: None,
            time: 0.0,
            duration: 0.0,
            end: 0.0,
            timescale: self.timescale,
            media_urls: Some(self.media_urls.clone()),
            byte_range: self.init_range,
            is_init: true,
            timestamp_offset: self.period_start
                - self.presentation_time_offset as f64 / self.timescale as f64,
            hint: self.index_range.map(TransportHint::SidxRange),
        })
    }

    fn segments(&self, from: f64, duration: f64) -> Vec<SegmentInfo> {
        // Byte-range lists serve VOD; the window rule includes the segment
        // containing `from`.
        let from_ticks = self.to_ticks(from);
        let to_ticks = self.to_ticks(from + duration);
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                let start = s.start as i64;
                let end = (s.start + s.duration) as i64;
                end > from_ticks && start < to_ticks
            })
            .map(|(i, s)| self.make_segment(s, i))
            .collect()
    }

    fn first_position(&self) -> IndexPosition {
        if !self.initialized {
            return IndexPosition::Unknown;
        }
        match self.segments.first() {
            Some(s) => IndexPosition::At(self.to_secs(s.start as i64)),
            None => IndexPosition::Empty,
        }
    }

    fn last_position(&self) -> IndexPosition {
        if !self.initialized {
            return IndexPosition::Unknown;
        }
        match self.segments.last() {
            Some(s) => IndexPosition::At(self.to_secs(s.start as i64)),
            None => IndexPosition::Empty,
        }
    }

    fn should_refresh(&self, _up_to: f64) -> bool {
        false
    }

    fn check_discontinuity(&self, time: f64) -> Option<f64> {
        let tick = self.to_ticks(time);
        for pair in self.segments.windows(2) {
            let end = (pair[0].start + pair[0].duration) as i64;
            let next_start = pair[1].start as i64;
            if tick >= end && tick < next_start {
                return Some(self.to_secs(next_start));
            }
        }
        None
    }

    fn is_segment_still_available(&self, segment: &SegmentInfo) -> SegmentAvailability {
        if !self.initialized {
            return SegmentAvailability::Unknown;
        }
        if segment.is_init {
            return SegmentAvailability::Available;
        }
        let tick = self.to_ticks(segment.time);
        let listed = self.segments.iter().any(|s| s.start as i64 == tick);
        if listed {
            SegmentAvailability::Available
        } else {
            SegmentAvailability::Unavailable
        }
    }

    fn can_be_out_of_sync_error(&self) -> bool {
        false
    }

    fn is_finished(&self) -> bool {
        self.initialized
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sidx_entries() -> Vec<AddedSegment> {
        vec![
            AddedSegment {
                start: 0,
                duration: 90_000,
                byte_range: Some(ByteRange::new(800, Some(10_799))),
            },
            AddedSegment {
                start: 90_000,
                duration: 90_000,
                byte_range: Some(ByteRange::new(10_800, Some(20_399))),
            },
            AddedSegment {
                start: 180_000,
                duration: 90_000,
                byte_range: Some(ByteRange::new(20_400, Some(30_999))),
            },
        ]
    }

    fn index(unbounded_last: bool) -> BaseIndex {
        BaseIndex::new(
            "video-main".to_string(),
            90_000,
            0,
            0.0,
            vec!["video.mp4".to_string()],
            Some(ByteRange::new(0, Some(799))),
            Some(ByteRange::new(640, Some(799))),
            unbounded_last,
        )
    }

    #[test]
    fn uninitialized_index_reports_unknown_positions() {
        let index = index(false);
        assert_eq!(index.first_position(), IndexPosition::Unknown);
        assert_eq!(index.last_position(), IndexPosition::Unknown);
        assert!(!index.is_finished());
        assert!(index.segments(0.0, 10.0).is_empty());
    }

    #[test]
    fn init_segment_carries_ranges() {
        let index = index(false);
        let init = index.init_segment().unwrap();
        assert!(init.is_init);
        assert_eq!(init.byte_range, Some(ByteRange::new(0, Some(799))));
        assert_eq!(
            init.hint,
            Some(TransportHint::SidxRange(ByteRange::new(640, Some(799))))
        );
    }

    #[test]
    fn added_segments_become_addressable_and_finished() {
        let mut index = index(false);
        index.add_segments(&sidx_entries());
        assert!(index.is_finished());
        assert_eq!(index.first_position(), IndexPosition::At(0.0));
        assert_eq!(index.last_position(), IndexPosition::At(2.0));

        let segments = index.segments(0.5, 2.0);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].byte_range, Some(ByteRange::new(10_800, Some(20_399))));
    }

    #[test]
    fn adding_twice_does_not_duplicate() {
        let mut index = index(false);
        index.add_segments(&sidx_entries());
        index.add_segments(&sidx_entries());
        assert_eq!(index.segments(0.0, 100.0).len(), 3);
    }

    #[test]
    fn unbounded_last_segment_hook_opens_the_final_range() {
        let mut index = index(true);
        index.add_segments(&sidx_entries());
        let last = index.segments(0.0, 100.0).pop().unwrap();
        assert_eq!(last.byte_range, Some(ByteRange::new(20_400, None)));
    }
}
