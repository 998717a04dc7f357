use crate::{
    index::{AddedSegment, IndexPosition, SegmentAvailability, SegmentIndexOps, TimelineEntry},
    scale::{from_index_ticks, to_index_ticks},
    segment::{SegmentInfo, TransportHint},
};

/// Smooth-streaming index: a timeline patched at runtime.
///
/// Each fetched fragment advertises its successors (`tfrf` box); those are
/// merged back in through `add_segments`, and entries older than the
/// declared DVR depth are evicted.
#[derive(Clone, Debug)]
pub struct SmoothIndex {
    bitrate: u64,
    timescale: u64,
    period_start: f64,
    entries: Vec<TimelineEntry>,
    /// URL pattern with `{bitrate}` and `{start time}` placeholders.
    media_pattern: String,
    is_live: bool,
    /// Addressable window behind the live edge, seconds.
    dvr_window: Option<f64>,
}

impl SmoothIndex {
    #[must_use]
    pub fn new(
        bitrate: u64,
        timescale: u64,
        period_start: f64,
        entries: Vec<TimelineEntry>,
        media_pattern: String,
        is_live: bool,
        dvr_window: Option<f64>,
    ) -> Self {
        let mut index = Self {
            bitrate,
            timescale,
            period_start,
            entries,
            media_pattern,
            is_live,
            dvr_window,
        };
        index.evict_expired();
        index
    }

    fn to_ticks(&self, t: f64) -> i64 {
        to_index_ticks(t, self.timescale, 0, self.period_start)
    }

    fn to_secs(&self, ticks: i64) -> f64 {
        from_index_ticks(ticks, self.timescale, 0, self.period_start)
    }

    fn occurrences(&self, i: usize) -> u64 {
        let entry = self.entries[i];
        if entry.repeat >= 0 {
            entry.repeat as u64 + 1
        } else {
            // Open repeats only make sense up to the next entry.
            match self.entries.get(i + 1) {
                Some(next) if entry.duration > 0 && next.start > entry.start => {
                    (((next.start - entry.start) as f64) / entry.duration as f64)
                        .round()
                        .max(1.0) as u64
                }
                _ => 1,
            }
        }
    }

    fn last_segment_ticks(&self) -> Option<(u64, u64)> {
        let i = self.entries.len().checked_sub(1)?;
        let entry = self.entries[i];
        let occ = self.occurrences(i);
        Some((entry.start + (occ - 1) * entry.duration, entry.duration))
    }

    fn make_segment(&self, start_tick: u64, duration_ticks: u64) -> SegmentInfo {
        let url = self
            .media_pattern
            .replace("{bitrate}", &self.bitrate.to_string())
            .replace("{start time}", &start_tick.to_string());
        let time = self.to_secs(start_tick as i64);
        let end = self.to_secs((start_tick + duration_ticks) as i64);
        SegmentInfo {
            id: start_tick.to_string(),
            number: None,
            time,
            duration: end - time,
            end,
            timescale: self.timescale,
            media_urls: Some(vec![url]),
            byte_range: None,
            is_init: false,
            timestamp_offset: self.period_start,
            hint: Some(TransportHint::Smooth {
                tick_time: start_tick,
            }),
        }
    }

    /// Drop entries that fell behind the DVR window, anchored at the live
    /// edge (the end of the last known segment).
    fn evict_expired(&mut self) {
        let Some(dvr) = self.dvr_window else {
            return;
        };
        let Some((last_start, last_duration)) = self.last_segment_ticks() else {
            return;
        };
        let edge = (last_start + last_duration) as i64;
        let cutoff = edge - (dvr * self.timescale as f64).round() as i64;
        if cutoff <= 0 {
            return;
        }
        let cutoff = cutoff as u64;

        let mut kept = Vec::with_capacity(self.entries.len());
        for i in 0..self.entries.len() {
            let entry = self.entries[i];
            let occ = self.occurrences(i);
            let run_end = entry.start + occ * entry.duration;
            if run_end <= cutoff {
                continue;
            }
            if entry.start >= cutoff || entry.duration == 0 {
                kept.push(entry);
                continue;
            }
            // Truncate the run's leading occurrences whose end falls at or
            // before the cutoff.
            let expired = ((cutoff - entry.start) / entry.duration).min(occ - 1);
            kept.push(TimelineEntry {
                start: entry.start + expired * entry.duration,
                duration: entry.duration,
                repeat: (occ - expired) as i64 - 1,
            });
        }
        if kept.len() != self.entries.len() {
            tracing::debug!(
                evicted = self.entries.len() - kept.len(),
                "smooth index: entries fell out of the DVR window"
            );
        }
        self.entries = kept;
    }

    /// Merge the successor list of a fetched fragment into the index.
    /// Idempotent.
    pub fn add_segments(&mut self, segments: &[AddedSegment]) {
        for added in segments {
            let covered = (0..self.entries.len()).any(|i| {
                let entry = self.entries[i];
                let occ = self.occurrences(i);
                let run_end = entry.start + occ * entry.duration;
                added.start >= entry.start && added.start < run_end
            });
            if covered {
                continue;
            }
            self.entries.push(TimelineEntry {
                start: added.start,
                duration: added.duration,
                repeat: 0,
            });
        }
        self.entries.sort_by_key(|e| e.start);
        self.evict_expired();
    }

    /// Absorb a refreshed manifest's view of this track.
    pub fn merge_from(&mut self, new: &Self) {
        let mut merged = self.clone();
        let entries: Vec<AddedSegment> = new
            .entries
            .iter()
            .enumerate()
            .flat_map(|(i, entry)| {
                let occ = new.occurrences(i);
                (0..occ).map(move |k| AddedSegment {
                    start: entry.start + k * entry.duration,
                    duration: entry.duration,
                    byte_range: None,
                })
            })
            .collect();
        merged.dvr_window = new.dvr_window;
        merged.is_live = new.is_live;
        merged.add_segments(&entries);
        *self = merged;
    }

    /// The segment whose span contains `time`, for seek snapping.
    #[must_use]
    pub fn segment_containing(&self, time: f64) -> Option<SegmentInfo> {
        let tick = self.to_ticks(time);
        for (i, entry) in self.entries.iter().enumerate() {
            let occ = self.occurrences(i);
            let run_end = entry.start as i64 + (occ * entry.duration) as i64;
            if tick >= entry.start as i64 && tick < run_end {
                let k = (tick - entry.start as i64) as u64 / entry.duration;
                return Some(self.make_segment(entry.start + k * entry.duration, entry.duration));
            }
        }
        None
    }
}

impl SegmentIndexOps for SmoothIndex {
    fn init_segment(&self) -> Option<SegmentInfo> {
        // Smooth media carries its own initialization data in-band.
        None
    }

    fn segments(&self, from: f64, duration: f64) -> Vec<SegmentInfo> {
        let from_ticks = self.to_ticks(from);
        let to_ticks = self.to_ticks(from + duration);
        if to_ticks <= from_ticks {
            return Vec::new();
        }

        let mut out = Vec::new();
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.start as i64 >= to_ticks {
                break;
            }
            let occ = self.occurrences(i);
            let k0 = if from_ticks > entry.start as i64 && entry.duration > 0 {
                ((from_ticks - entry.start as i64) as u64).div_ceil(entry.duration)
            } else {
                0
            };
            let mut k = k0;
            while k < occ {
                let start_tick = entry.start + k * entry.duration;
                if start_tick as i64 >= to_ticks {
                    break;
                }
                out.push(self.make_segment(start_tick, entry.duration));
                k += 1;
            }
        }
        out
    }

    fn first_position(&self) -> IndexPosition {
        match self.entries.first() {
            Some(entry) => IndexPosition::At(self.to_secs(entry.start as i64)),
            None => IndexPosition::Empty,
        }
    }

    fn last_position(&self) -> IndexPosition {
        match self.last_segment_ticks() {
            Some((start, _)) => IndexPosition::At(self.to_secs(start as i64)),
            None => IndexPosition::Empty,
        }
    }

    fn should_refresh(&self, up_to: f64) -> bool {
        if !self.is_live {
            return false;
        }
        match self.last_segment_ticks() {
            Some((start, duration)) => self.to_ticks(up_to) > (start + duration) as i64,
            None => true,
        }
    }

    fn check_discontinuity(&self, time: f64) -> Option<f64> {
        let tick = self.to_ticks(time);
        for (i, entry) in self.entries.iter().enumerate() {
            let occ = self.occurrences(i);
            let run_end = (entry.start + occ * entry.duration) as i64;
            let Some(next) = self.entries.get(i + 1) else {
                break;
            };
            if tick >= run_end && tick < next.start as i64 {
                return Some(self.to_secs(next.start as i64));
            }
        }
        None
    }

    fn is_segment_still_available(&self, segment: &SegmentInfo) -> SegmentAvailability {
        let tick = self.to_ticks(segment.time);
        let Some(first) = self.entries.first() else {
            return SegmentAvailability::Unknown;
        };
        if tick < first.start as i64 {
            return SegmentAvailability::Unavailable;
        }
        if let Some((last_start, last_duration)) = self.last_segment_ticks() {
            if tick >= (last_start + last_duration) as i64 {
                return SegmentAvailability::Unknown;
            }
        }
        for (i, entry) in self.entries.iter().enumerate() {
            let occ = self.occurrences(i);
            let run_end = (entry.start + occ * entry.duration) as i64;
            if tick >= entry.start as i64 && tick < run_end {
                let aligned = (tick - entry.start as i64) as u64 % entry.duration == 0;
                return if aligned {
                    SegmentAvailability::Available
                } else {
                    SegmentAvailability::Unavailable
                };
            }
        }
        SegmentAvailability::Unavailable
    }

    fn can_be_out_of_sync_error(&self) -> bool {
        self.is_live
    }

    fn is_finished(&self) -> bool {
        !self.is_live
    }

    fn is_initialized(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<TimelineEntry> {
        vec![
            TimelineEntry { start: 0, duration: 20_000_000, repeat: 4 },
            TimelineEntry { start: 100_000_000, duration: 20_000_000, repeat: 0 },
        ]
    }

    fn index(dvr: Option<f64>) -> SmoothIndex {
        SmoothIndex::new(
            300_000,
            10_000_000,
            0.0,
            entries(),
            "QualityLevels({bitrate})/Fragments(video={start time})".to_string(),
            true,
            dvr,
        )
    }

    #[test]
    fn pattern_tokens_resolve_per_segment() {
        let index = index(None);
        let segments = index.segments(0.0, 2.0);
        assert_eq!(
            segments[0].media_urls.as_deref(),
            Some(&["QualityLevels(300000)/Fragments(video=0)".to_string()][..])
        );
        assert_eq!(
            segments[0].hint,
            Some(TransportHint::Smooth { tick_time: 0 })
        );
    }

    #[test]
    fn predicted_segments_merge_without_duplicates() {
        let mut index = index(None);
        let predicted = vec![
            AddedSegment { start: 120_000_000, duration: 20_000_000, byte_range: None },
            AddedSegment { start: 100_000_000, duration: 20_000_000, byte_range: None },
        ];
        index.add_segments(&predicted);
        index.add_segments(&predicted);
        let segments = index.segments(0.0, 100.0);
        assert_eq!(segments.len(), 7);
        assert_eq!(index.last_position(), IndexPosition::At(12.0));
    }

    #[test]
    fn dvr_window_evicts_old_entries() {
        // live edge 12s, dvr 6s: everything ending at or before 6s is gone
        let index = index(Some(6.0));
        match index.first_position() {
            IndexPosition::At(t) => assert!((t - 6.0).abs() < 1e-9, "first {t}"),
            other => panic!("unexpected {other:?}"),
        }
        let segment = SegmentInfo {
            time: 0.0,
            end: 2.0,
            ..index.segments(6.0, 2.0).remove(0)
        };
        assert_eq!(
            index.is_segment_still_available(&segment),
            SegmentAvailability::Unavailable
        );
    }

    #[test]
    fn live_index_wants_refresh_past_known_end() {
        let index = index(None);
        assert!(index.should_refresh(14.0));
        assert!(!index.should_refresh(10.0));
        assert!(index.can_be_out_of_sync_error());
    }
}
