use crate::{
    error::TemplateError,
    index::{bounds::AvailabilityBounds, IndexPosition, SegmentAvailability, SegmentIndexOps},
    segment::SegmentInfo,
    template::{resolve_template, validate_template, TemplateContext},
    MINIMUM_SEGMENT_SIZE,
};

/// Construction parameters for [`TemplateIndex`].
#[derive(Clone, Debug)]
pub struct TemplateIndexOptions {
    pub representation_id: String,
    pub bitrate: u64,
    pub timescale: u64,
    /// Fixed segment duration, index ticks.
    pub segment_duration: u64,
    pub start_number: u64,
    /// Presentation time offset, index ticks.
    pub presentation_time_offset: u64,
    /// Period start, presentation seconds.
    pub period_start: f64,
    /// Period end, presentation seconds, when known.
    pub period_end: Option<f64>,
    /// Media URL templates, ordered fallbacks (`$Number$` / `$Time$`).
    pub media_templates: Vec<String>,
    /// Init URL templates (`$RepresentationID$` / `$Bitrate$` only).
    pub init_templates: Option<Vec<String>>,
    pub is_dynamic: bool,
    /// Live availability calculator; `None` for static content.
    pub bounds: Option<AvailabilityBounds>,
}

/// Fixed-duration index: segment `k` spans
/// `[k * duration, (k + 1) * duration)` on the index timeline and carries
/// number `start_number + k`.
#[derive(Clone, Debug)]
pub struct TemplateIndex {
    opts: TemplateIndexOptions,
}

impl TemplateIndex {
    /// Validates every URL template; a bad template fails this
    /// Representation without touching the rest of the manifest.
    pub fn new(opts: TemplateIndexOptions) -> Result<Self, TemplateError> {
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

    fn duration_secs(&self) -> f64 {
        self.opts.segment_duration as f64 / self.opts.timescale as f64
    }

    /// Total segment count derived from the period end, with the
    /// too-short-tail rule applied.
    fn count_from_period_end(&self) -> Option<u64> {
        let end = self.opts.period_end?;
        let span = end - self.opts.period_start;
        if span <= 0.0 {
            return Some(0);
        }
        let d = self.duration_secs();
        let full = (span / d).floor();
        let remainder = span - full * d;
        let total = if remainder < MINIMUM_SEGMENT_SIZE {
            full
        } else {
            full + 1.0
        };
        Some(total as u64)
    }

    /// Currently addressable 0-based segment range, inclusive.
    ///
    /// `(k_min, Some(k_max))` when bounded, `(k_min, None)` when the end is
    /// not determinable, `None` when nothing is addressable.
    fn available_range(&self) -> Option<(u64, Option<u64>)> {
        if self.opts.segment_duration == 0 {
            return None;
        }
        let d = self.duration_secs();
        let ps = self.opts.period_start;

        let static_count = self.count_from_period_end();
        let static_max = match static_count {
            Some(0) => return None,
            Some(n) => Some(n - 1),
            None => None,
        };

        let Some(bounds) = (if self.opts.is_dynamic {
            self.opts.bounds.as_ref()
        } else {
            None
        }) else {
            return Some((0, static_max));
        };

        let raw_min = bounds.minimum().map_or(ps, |m| m.max(ps));
        let k_min = (((raw_min - ps) / d).floor()).max(0.0) as u64;

        let produced = ((bounds.maximum() - ps) / d).floor();
        if produced < 1.0 {
            return None;
        }
        let mut k_max = produced as u64 - 1;
        if bounds.aggressive_mode {
            k_max += 1;
        }
        if let Some(cap) = static_max {
            k_max = k_max.min(cap);
        }
        if k_max < k_min {
            return None;
        }
        Some((k_min, Some(k_max)))
    }

    fn segment_start(&self, k: u64) -> f64 {
        self.opts.period_start + k as f64 * self.duration_secs()
    }

    fn make_segment(&self, k: u64) -> Option<SegmentInfo> {
        let opts = &self.opts;
        let number = opts.start_number + k;
        let tick_time = opts.presentation_time_offset + k * opts.segment_duration;
        let ctx = TemplateContext {
            representation_id: Some(&opts.representation_id),
            bitrate: Some(opts.bitrate),
            number: Some(number),
            time: Some(tick_time),
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

        let time = self.segment_start(k);
        let mut end = self.segment_start(k + 1);
        if let Some(period_end) = opts.period_end {
            end = end.min(period_end);
        }

        Some(SegmentInfo {
            id: number.to_string(),
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
}

impl SegmentIndexOps for TemplateIndex {
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
        let Some((k_min, k_max)) = self.available_range() else {
            return Vec::new();
        };
        let d = self.duration_secs();
        let ps = self.opts.period_start;
        let to = from + duration;

        let wanted = ((from - ps) / d).floor();
        let mut k = if wanted < 0.0 { 0 } else { wanted as u64 }.max(k_min);

        let mut out = Vec::new();
        while self.segment_start(k) < to {
            if let Some(k_max) = k_max {
                if k > k_max {
                    break;
                }
            }
            if let Some(segment) = self.make_segment(k) {
                out.push(segment);
            }
            k += 1;
        }
        out
    }

    fn first_position(&self) -> IndexPosition {
        match self.available_range() {
            Some((k_min, _)) => IndexPosition::At(self.segment_start(k_min)),
            None => IndexPosition::Empty,
        }
    }

    fn last_position(&self) -> IndexPosition {
        match self.available_range() {
            Some((_, Some(k_max))) => IndexPosition::At(self.segment_start(k_max)),
            Some((_, None)) => IndexPosition::Unknown,
            None => IndexPosition::Empty,
        }
    }

    fn should_refresh(&self, _up_to: f64) -> bool {
        // Fixed-duration grids move with the clock; refreshing the
        // manifest would teach us nothing new.
        false
    }

    fn check_discontinuity(&self, _time: f64) -> Option<f64> {
        None
    }

    fn is_segment_still_available(&self, segment: &SegmentInfo) -> SegmentAvailability {
        if segment.is_init {
            return SegmentAvailability::Available;
        }
        let Some(number) = segment.number else {
            return SegmentAvailability::Unknown;
        };
        let Some(k) = number.checked_sub(self.opts.start_number) else {
            return SegmentAvailability::Unavailable;
        };
        match self.available_range() {
            Some((k_min, k_max)) => {
                let in_range = k >= k_min && k_max.map_or(true, |m| k <= m);
                if in_range {
                    SegmentAvailability::Available
                } else {
                    SegmentAvailability::Unavailable
                }
            }
            None => SegmentAvailability::Unavailable,
        }
    }

    fn can_be_out_of_sync_error(&self) -> bool {
        false
    }

    fn is_finished(&self) -> bool {
        if !self.opts.is_dynamic {
            return true;
        }
        match (self.count_from_period_end(), self.available_range()) {
            (Some(total), Some((_, Some(k_max)))) => total != 0 && k_max == total - 1,
            _ => false,
        }
    }

    fn is_initialized(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Clock;

    fn dynamic_options() -> TemplateIndexOptions {
        TemplateIndexOptions {
            representation_id: "audio-128k".to_string(),
            bitrate: 128_000,
            timescale: 1_000,
            segment_duration: 4_000,
            start_number: 1,
            presentation_time_offset: 0,
            period_start: 0.0,
            period_end: None,
            media_templates: vec!["seg-$Number$.m4s".to_string()],
            init_templates: Some(vec!["init-$RepresentationID$.mp4".to_string()]),
            is_dynamic: true,
            bounds: Some(AvailabilityBounds {
                availability_start_time: 0.0,
                clock_offset_ms: None,
                timeshift_buffer_depth: Some(20.0),
                availability_time_offset: 0.0,
                aggressive_mode: false,
                clock: Clock::Fixed(100.0),
            }),
        }
    }

    #[test]
    fn dynamic_bounds_follow_clock_and_timeshift_depth() {
        let index = TemplateIndex::new(dynamic_options()).unwrap();
        assert_eq!(index.first_position(), IndexPosition::At(80.0));
        assert_eq!(index.last_position(), IndexPosition::At(96.0));
    }

    #[test]
    fn aggressive_mode_adds_one_segment_of_lookahead() {
        let mut opts = dynamic_options();
        opts.bounds.as_mut().unwrap().aggressive_mode = true;
        let index = TemplateIndex::new(opts).unwrap();
        assert_eq!(index.last_position(), IndexPosition::At(100.0));
    }

    #[test]
    fn window_lookup_returns_contained_and_numbered_segments() {
        let index = TemplateIndex::new(dynamic_options()).unwrap();
        let segments = index.segments(84.0, 8.0);
        let numbers: Vec<u64> = segments.iter().filter_map(|s| s.number).collect();
        // segment k covers [4k, 4k+4); numbers are 1-based
        assert_eq!(numbers, vec![22, 23]);
        assert_eq!(segments[0].time, 84.0);
        assert_eq!(segments[0].media_urls.as_deref(), Some(&["seg-22.m4s".to_string()][..]));
    }

    #[test]
    fn window_before_first_clips_up() {
        let index = TemplateIndex::new(dynamic_options()).unwrap();
        let segments = index.segments(0.0, 82.0);
        assert_eq!(segments.first().and_then(|s| s.number), Some(21));
        assert_eq!(segments.first().map(|s| s.time), Some(80.0));
    }

    #[test]
    fn window_past_the_edge_is_empty() {
        let index = TemplateIndex::new(dynamic_options()).unwrap();
        assert!(index.segments(101.0, 10.0).is_empty());
    }

    #[test]
    fn static_index_with_short_tail_omits_it() {
        let opts = TemplateIndexOptions {
            period_end: Some(8.003),
            is_dynamic: false,
            bounds: None,
            ..dynamic_options()
        };
        let index = TemplateIndex::new(opts).unwrap();
        // 8.003s at 4s per segment: the 3ms tail is below the minimum size
        assert_eq!(index.last_position(), IndexPosition::At(4.0));
        let segments = index.segments(0.0, 100.0);
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn static_index_clips_final_segment_to_period_end() {
        let opts = TemplateIndexOptions {
            period_end: Some(10.0),
            is_dynamic: false,
            bounds: None,
            ..dynamic_options()
        };
        let index = TemplateIndex::new(opts).unwrap();
        let segments = index.segments(0.0, 100.0);
        assert_eq!(segments.len(), 3);
        let last = segments.last().unwrap();
        assert_eq!(last.end, 10.0);
        assert!((last.duration - 2.0).abs() < 1e-9);
    }

    #[test]
    fn segment_availability_tracks_the_window() {
        let index = TemplateIndex::new(dynamic_options()).unwrap();
        let current = index.segments(84.0, 4.0).remove(0);
        assert_eq!(
            index.is_segment_still_available(&current),
            SegmentAvailability::Available
        );

        let stale = SegmentInfo {
            number: Some(2),
            ..current.clone()
        };
        assert_eq!(
            index.is_segment_still_available(&stale),
            SegmentAvailability::Unavailable
        );
    }

    #[test]
    fn bad_template_fails_construction() {
        let opts = TemplateIndexOptions {
            media_templates: vec!["seg-$Chapter$.m4s".to_string()],
            ..dynamic_options()
        };
        assert!(TemplateIndex::new(opts).is_err());
    }

    #[test]
    fn init_segment_resolves_identity_tokens() {
        let index = TemplateIndex::new(dynamic_options()).unwrap();
        let init = index.init_segment().unwrap();
        assert!(init.is_init);
        assert_eq!(
            init.media_urls.as_deref(),
            Some(&["init-audio-128k.mp4".to_string()][..])
        );
    }
}
