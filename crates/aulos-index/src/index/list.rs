use crate::{
    index::{IndexPosition, SegmentAvailability, SegmentIndexOps},
    segment::{ByteRange, SegmentInfo},
};

/// One explicit `SegmentURL` entry.
#[derive(Clone, Debug, PartialEq)]
pub struct ListEntry {
    pub media_urls: Vec<String>,
    pub byte_range: Option<ByteRange>,
}

/// `SegmentList` index: every segment URL is spelled out, all with the
/// same fixed duration.
#[derive(Clone, Debug)]
pub struct ListIndex {
    timescale: u64,
    /// Fixed per-segment duration, index ticks.
    segment_duration: u64,
    presentation_time_offset: u64,
    period_start: f64,
    entries: Vec<ListEntry>,
    init_urls: Option<Vec<String>>,
    init_range: Option<ByteRange>,
}

impl ListIndex {
    #[must_use]
    pub fn new(
        timescale: u64,
        segment_duration: u64,
        presentation_time_offset: u64,
        period_start: f64,
        entries: Vec<ListEntry>,
        init_urls: Option<Vec<String>>,
        init_range: Option<ByteRange>,
    ) -> Self {
        Self {
            timescale,
            segment_duration,
            presentation_time_offset,
            period_start,
            entries,
            init_urls,
            init_range,
        }
    }

    fn duration_secs(&self) -> f64 {
        self.segment_duration as f64 / self.timescale as f64
    }

    fn segment_start(&self, k: usize) -> f64 {
        self.period_start + k as f64 * self.duration_secs()
    }

    fn make_segment(&self, k: usize) -> SegmentInfo {
        let entry = &self.entries[k];
        let time = self.segment_start(k);
        let end = self.segment_start(k + 1);
        SegmentInfo {
            id: (k + 1).to_string(),
            number: Some(k as u64 + 1),
            time,
            duration: end - time,
            end,
            timescale: self.timescale,
            media_urls: Some(entry.media_urls.clone()),
            byte_range: entry.byte_range,
            is_init: false,
            timestamp_offset: self.period_start
                - self.presentation_time_offset as f64 / self.timescale as f64,
            hint: None,
        }
    }
}

impl SegmentIndexOps for ListIndex {
    fn init_segment(&self) -> Option<SegmentInfo> {
        let urls = self.init_urls.clone()?;
        Some(SegmentInfo {
            id: "init".to_string(),
            number: None,
            time: 0.0,
            duration: 0.0,
            end: 0.0,
            timescale: self.timescale,
            media_urls: Some(urls),
            byte_range: self.init_range,
            is_init: true,
            timestamp_offset: self.period_start
                - self.presentation_time_offset as f64 / self.timescale as f64,
            hint: None,
        })
    }

    fn segments(&self, from: f64, duration: f64) -> Vec<SegmentInfo> {
        let d = self.duration_secs();
        if d <= 0.0 || self.entries.is_empty() {
            return Vec::new();
        }
        let to = from + duration;
        let wanted = ((from - self.period_start) / d).floor();
        let mut k = if wanted < 0.0 { 0 } else { wanted as usize };

        let mut out = Vec::new();
        while k < self.entries.len() && self.segment_start(k) < to {
            out.push(self.make_segment(k));
            k += 1;
        }
        out
    }

    fn first_position(&self) -> IndexPosition {
        if self.entries.is_empty() {
            IndexPosition::Empty
        } else {
            IndexPosition::At(self.period_start)
        }
    }

    fn last_position(&self) -> IndexPosition {
        if self.entries.is_empty() {
            IndexPosition::Empty
        } else {
            IndexPosition::At(self.segment_start(self.entries.len() - 1))
        }
    }

    fn should_refresh(&self, _up_to: f64) -> bool {
        false
    }

    fn check_discontinuity(&self, _time: f64) -> Option<f64> {
        None
    }

    fn is_segment_still_available(&self, segment: &SegmentInfo) -> SegmentAvailability {
        if segment.is_init {
            return SegmentAvailability::Available;
        }
        match segment.number {
            Some(n) if n >= 1 && (n as usize) <= self.entries.len() => {
                SegmentAvailability::Available
            }
            _ => SegmentAvailability::Unavailable,
        }
    }

    fn can_be_out_of_sync_error(&self) -> bool {
        false
    }

    fn is_finished(&self) -> bool {
        true
    }

    fn is_initialized(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<ListEntry> {
        (0..n)
            .map(|i| ListEntry {
                media_urls: vec![format!("seg-{i}.m4s")],
                byte_range: None,
            })
            .collect()
    }

    #[test]
    fn window_includes_containing_segment() {
        let index = ListIndex::new(1_000, 2_000, 0, 0.0, entries(5), None, None);
        let segments = index.segments(3.0, 2.0);
        let numbers: Vec<u64> = segments.iter().filter_map(|s| s.number).collect();
        assert_eq!(numbers, vec![2, 3]);
        assert_eq!(segments[0].media_urls.as_deref(), Some(&["seg-1.m4s".to_string()][..]));
    }

    #[test]
    fn positions_span_the_list() {
        let index = ListIndex::new(1_000, 2_000, 0, 10.0, entries(3), None, None);
        assert_eq!(index.first_position(), IndexPosition::At(10.0));
        assert_eq!(index.last_position(), IndexPosition::At(14.0));
        assert!(index.is_finished());
    }

    #[test]
    fn window_past_the_end_is_empty() {
        let index = ListIndex::new(1_000, 2_000, 0, 0.0, entries(3), None, None);
        assert!(index.segments(6.0, 5.0).is_empty());
    }
}
