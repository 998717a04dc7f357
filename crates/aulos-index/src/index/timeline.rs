use crate::{
    error::TemplateError,
    index::{AddedSegment, IndexPosition, SegmentAvailability, SegmentIndexOps},
    scale::{from_index_ticks, to_index_ticks},
    segment::SegmentInfo,
    template::{resolve_template, validate_template, TemplateContext},
};

/// One `<S t d r>` run: `repeat` additional occurrences follow the first
/// (`-1` = repeat until the next run or the period end).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimelineEntry {
    /// Start, index ticks (cumulative).
    pub start: u64,
    /// Duration of each occurrence, index ticks.
    pub duration: u64,
    pub repeat: i64,
}

/// Construction parameters for [`TimelineIndex`].
#[derive(Clone, Debug)]
pub struct TimelineIndexOptions {
    pub representation_id: String,
    pub bitrate: u64,
    pub timescale: u64,
    pub presentation_time_offset: u64,
    pub period_start: f64,
    pub period_end: Option<f64>,
    pub start_number: u64,
    pub entries: Vec<TimelineEntry>,
    pub media_templates: Vec<String>,
    pub init_templates: Option<Vec<String>>,
    pub is_dynamic: bool,
}

/// Explicit-timeline index (`SegmentTemplate` with `SegmentTimeline`).
#[derive(Clone, Debug)]
pub struct TimelineIndex {
    opts: TimelineIndexOptions,
}

impl TimelineIndex {
    pub fn new(opts: TimelineIndexOptions) -> Result<Self, TemplateError> {
        for template in &opts.media_templates {
            validate_template(template)?;
        }
        if let Some(init) = &opts.init_templates {
            for template in init {
                validate_template(template)?;
            }
        }
        Ok(Self { opts })
    }

    fn to_ticks(&self, t: f64) -> i64 {
        to_index_ticks(
            t,
            self.opts.timescale,
            self.opts.presentation_time_offset,
            self.opts.period_start,
        )
    }

    fn to_secs(&self, ticks: i64) -> f64 {
        from_index_ticks(
            ticks,
            self.opts.timescale,
            self.opts.presentation_time_offset,
            self.opts.period_start,
        )
    }

    fn period_end_ticks(&self) -> Option<i64> {
        self.opts.period_end.map(|end| self.to_ticks(end))
    }

    /// Number of occurrences of run `i`, resolving `repeat == -1` against
    /// the next run or the period end.
    fn occurrences(&self, i: usize) -> u64 {
        let entry = self.opts.entries[i];
        if entry.repeat >= 0 {
            return entry.repeat as u64 + 1;
        }
        let limit = self
            .opts
            .entries
            .get(i + 1)
            .map(|next| next.start as i64)
            .or_else(|| self.period_end_ticks());
        match limit {
            Some(limit) if limit > entry.start as i64 && entry.duration > 0 => {
                let span = (limit - entry.start as i64) as f64;
                (span / entry.duration as f64).round().max(1.0) as u64
            }
            _ => 1,
        }
    }

    fn last_segment_ticks(&self) -> Option<(u64, u64)> {
        let i = self.opts.entries.len().checked_sub(1)?;
        let entry = self.opts.entries[i];
        let occ = self.occurrences(i);
        let start = entry.start + (occ - 1) * entry.duration;
        Some((start, entry.duration))
    }

    fn make_segment(&self, start_tick: u64, duration_ticks: u64, number: u64) -> Option<SegmentInfo> {
        let opts = &self.opts;
        let ctx = TemplateContext {
            representation_id: Some(&opts.representation_id),
            bitrate: Some(opts.bitrate),
            number: Some(number),
            time: Some(start_tick),
        };
        let mut urls = Vec::with_capacity(opts.media_templates.len());
        for template in &opts.media_templates {
            match resolve_template(template, &ctx) {
                Ok(url) => urls.push(url),
                Err(error) => {
                    tracing::warn!(%error, template, "segment URL resolution failed");
                    return None;
                }
            }
        }

        let time = self.to_secs(start_tick as i64);
        let mut end = self.to_secs((start_tick + duration_ticks) as i64);
        if let Some(period_end) = opts.period_end {
            end = end.min(period_end);
        }

        Some(SegmentInfo {
            id: start_tick.to_string(),
            number: Some(number),
            time,
            duration: end - time,
            end,
            timescale: opts.timescale,
            media_urls: Some(urls),
            byte_range: None,
            is_init: false,
            timestamp_offset: opts.period_start
                - opts.presentation_time_offset as f64 / opts.timescale as f64,
            hint: None,
        })
    }

    /// The segment whose span contains `time`, for seek snapping.
    #[must_use]
    pub fn segment_containing(&self, time: f64) -> Option<SegmentInfo> {
        let tick = self.to_ticks(time);
        let mut number = self.opts.start_number;
        for (i, entry) in self.opts.entries.iter().enumerate() {
            let occ = self.occurrences(i);
            let run_end = entry.start as i64 + (occ * entry.duration) as i64;
            if tick >= entry.start as i64 && tick < run_end {
                let k = (tick - entry.start as i64) as u64 / entry.duration;
                return self.make_segment(
                    entry.start + k * entry.duration,
                    entry.duration,
                    number + k,
                );
            }
            number += occ;
        }
        None
    }

    /// Splice a refreshed timeline onto locally-known history: runs that
    /// predate the new timeline's first entry are kept, everything after
    /// comes from the new index.
    pub fn merge_from(&mut self, new: &Self) {
        let Some(new_first) = new.opts.entries.first().map(|e| e.start) else {
            return;
        };

        let mut kept: Vec<TimelineEntry> = Vec::new();
        for (i, entry) in self.opts.entries.iter().enumerate() {
            let occ = self.occurrences(i);
            let run_end = entry.start + occ * entry.duration;
            if run_end <= new_first {
                kept.push(*entry);
            } else if entry.start < new_first && entry.duration > 0 {
                let fitting = (new_first - entry.start) / entry.duration;
                if fitting > 0 {
                    kept.push(TimelineEntry {
                        start: entry.start,
                        duration: entry.duration,
                        repeat: fitting as i64 - 1,
                    });
                }
            }
        }

        kept.extend(new.opts.entries.iter().copied());
        let mut opts = new.opts.clone();
        opts.entries = kept;
        // The spliced history shifts numbering relative to the new
        // manifest; keep our original numbering origin.
        opts.start_number = self.opts.start_number;
        self.opts = opts;
    }

    /// Append externally discovered segments, skipping any tick already
    /// covered. Idempotent.
    pub fn add_segments(&mut self, segments: &[AddedSegment]) {
        for added in segments {
            let covered = self.opts.entries.iter().enumerate().any(|(i, entry)| {
                let occ = self.occurrences(i);
                let run_end = entry.start + occ * entry.duration;
                added.start >= entry.start && added.start < run_end
            });
            if covered {
                continue;
            }
            self.opts.entries.push(TimelineEntry {
                start: added.start,
                duration: added.duration,
                repeat: 0,
            });
        }
        self.opts.entries.sort_by_key(|e| e.start);
    }
}

impl SegmentIndexOps for TimelineIndex {
    fn init_segment(&self) -> Option<SegmentInfo> {
        let opts = &self.opts;
        let templates = opts.init_templates.as_ref()?;
        let ctx = TemplateContext {
            representation_id: Some(&opts.representation_id),
            bitrate: Some(opts.bitrate),
            number: None,
            time: None,
        };
        let mut urls = Vec::with_capacity(templates.len());
        for template in templates {
            match resolve_template(template, &ctx) {
                Ok(url) => urls.push(url),
                Err(error) => {
                    tracing::warn!(%error, template, "init URL resolution failed");
                    return None;
                }
            }
        }
        Some(SegmentInfo {
            id: "init".to_string(),
            number: None,
            time: 0.0,
            duration: 0.0,
            end: 0.0,
            timescale: opts.timescale,
            media_urls: Some(urls),
            byte_range: None,
            is_init: true,
            timestamp_offset: opts.period_start
                - opts.presentation_time_offset as f64 / opts.timescale as f64,
            hint: None,
        })
    }

    fn segments(&self, from: f64, duration: f64) -> Vec<SegmentInfo> {
        let from_ticks = self.to_ticks(from);
        let to_ticks = self.to_ticks(from + duration);
        if to_ticks <= from_ticks {
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut number = self.opts.start_number;
        for (i, entry) in self.opts.entries.iter().enumerate() {
            let occ = self.occurrences(i);
            if entry.start as i64 >= to_ticks {
                break;
            }

            // First occurrence starting at or after the window: a segment
            // merely grazed by the window start is the caller's previous
            // segment, not a new download (strict-less-than rule).
            let k0 = if from_ticks > entry.start as i64 && entry.duration > 0 {
                let diff = (from_ticks - entry.start as i64) as u64;
                diff.div_ceil(entry.duration)
            } else {
                0
            };

            let mut k = k0;
            while k < occ {
                let start_tick = entry.start + k * entry.duration;
                if (start_tick as i64) >= to_ticks {
                    break;
                }
                if let Some(segment) = self.make_segment(start_tick, entry.duration, number + k) {
                    out.push(segment);
                }
                k += 1;
            }
            number += occ;
        }
        out
    }

    fn first_position(&self) -> IndexPosition {
        match self.opts.entries.first() {
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
        if !self.opts.is_dynamic {
            return false;
        }
        match self.last_segment_ticks() {
            Some((start, duration)) => self.to_ticks(up_to) > (start + duration) as i64,
            None => true,
        }
    }

    fn check_discontinuity(&self, time: f64) -> Option<f64> {
        let tick = self.to_ticks(time);
        for (i, entry) in self.opts.entries.iter().enumerate() {
            let occ = self.occurrences(i);
            let run_end = (entry.start + occ * entry.duration) as i64;
            let Some(next) = self.opts.entries.get(i + 1) else {
                break;
            };
            if tick >= run_end && (tick as u64) < next.start {
                return Some(self.to_secs(next.start as i64));
            }
        }
        None
    }

    fn is_segment_still_available(&self, segment: &SegmentInfo) -> SegmentAvailability {
        if segment.is_init {
            return SegmentAvailability::Available;
        }
        let tick = self.to_ticks(segment.time);
        let Some(first) = self.opts.entries.first() else {
            return SegmentAvailability::Unknown;
        };
        if tick < first.start as i64 {
            return SegmentAvailability::Unavailable;
        }
        if let Some((last_start, last_duration)) = self.last_segment_ticks() {
            if tick >= (last_start + last_duration) as i64 {
                // Beyond what we know; a refresh may list it.
                return SegmentAvailability::Unknown;
            }
        }
        for (i, entry) in self.opts.entries.iter().enumerate() {
            let occ = self.occurrences(i);
            let run_end = (entry.start + occ * entry.duration) as i64;
            if tick >= entry.start as i64 && tick < run_end {
                let offset = (tick - entry.start as i64) as u64;
                let aligned = offset % entry.duration == 0;
                let same_duration = self.to_ticks(segment.end) - tick == entry.duration as i64;
                return if aligned && same_duration {
                    SegmentAvailability::Available
                } else {
                    SegmentAvailability::Unavailable
                };
            }
        }
        SegmentAvailability::Unavailable
    }

    fn can_be_out_of_sync_error(&self) -> bool {
        self.opts.is_dynamic
    }

    fn is_finished(&self) -> bool {
        if !self.opts.is_dynamic {
            return true;
        }
        match (self.period_end_ticks(), self.last_segment_ticks()) {
            (Some(end), Some((start, duration))) => (start + duration) as i64 >= end,
            _ => false,
        }
    }

    fn is_initialized(&self) -> bool {
        true
    }
}
