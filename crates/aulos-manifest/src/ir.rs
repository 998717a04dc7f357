//! Intermediate representation of a DASH MPD.
//!
//! Syntactic parsing of raw bytes lives outside this crate; ingestion
//! starts from this already-decoded tree. Field names follow the source
//! document's attributes.

/// How a `UTCTiming` element provides the server clock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UtcTimingScheme {
    /// `urn:mpeg:dash:utc:direct:2014` — the value is the date itself.
    Direct,
    /// `urn:mpeg:dash:utc:http-iso:2014` — the value is a URL to fetch.
    HttpIso,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtcTimingIr {
    pub scheme: UtcTimingScheme,
    /// An ISO date (direct) or a URL (http-iso).
    pub value: String,
}

/// One `<S>` element of a `SegmentTimeline`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimelineEntryIr {
    /// Start tick; defaults to the previous entry's end.
    pub t: Option<u64>,
    pub d: u64,
    /// Additional repetitions; `-1` repeats until the next entry or the
    /// period end.
    pub r: i64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentTemplateIr {
    pub timescale: Option<u64>,
    /// Fixed segment duration, ticks; absent when a timeline is given.
    pub duration: Option<u64>,
    pub start_number: Option<u64>,
    pub presentation_time_offset: Option<u64>,
    pub media: Option<String>,
    pub initialization: Option<String>,
    pub availability_time_offset: Option<f64>,
    pub timeline: Option<Vec<TimelineEntryIr>>,
}

impl SegmentTemplateIr {
    /// Representation-level attributes override adaptation-level ones.
    #[must_use]
    pub fn inherit(base: Option<&Self>, over: Option<&Self>) -> Self {
        let mut merged = base.cloned().unwrap_or_default();
        if let Some(over) = over {
            if over.timescale.is_some() {
                merged.timescale = over.timescale;
            }
            if over.duration.is_some() {
                merged.duration = over.duration;
            }
            if over.start_number.is_some() {
                merged.start_number = over.start_number;
            }
            if over.presentation_time_offset.is_some() {
                merged.presentation_time_offset = over.presentation_time_offset;
            }
            if over.media.is_some() {
                merged.media = over.media.clone();
            }
            if over.initialization.is_some() {
                merged.initialization = over.initialization.clone();
            }
            if over.availability_time_offset.is_some() {
                merged.availability_time_offset = over.availability_time_offset;
            }
            if over.timeline.is_some() {
                merged.timeline = over.timeline.clone();
            }
        }
        merged
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentBaseIr {
    pub timescale: Option<u64>,
    pub presentation_time_offset: Option<u64>,
    /// Byte range of the initialization data.
    pub initialization_range: Option<(u64, u64)>,
    /// Byte range of the `sidx` box.
    pub index_range: Option<(u64, u64)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentListEntryIr {
    pub media: String,
    pub media_range: Option<(u64, u64)>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentListIr {
    pub timescale: Option<u64>,
    pub duration: Option<u64>,
    pub presentation_time_offset: Option<u64>,
    pub initialization: Option<String>,
    pub initialization_range: Option<(u64, u64)>,
    pub entries: Vec<SegmentListEntryIr>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepresentationIr {
    pub id: Option<String>,
    pub bandwidth: Option<u64>,
    pub codecs: Option<String>,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub base_urls: Vec<String>,
    pub segment_template: Option<SegmentTemplateIr>,
    pub segment_base: Option<SegmentBaseIr>,
    pub segment_list: Option<SegmentListIr>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdaptationIr {
    pub id: Option<String>,
    /// `audio` / `video` / `text` / `image`.
    pub content_type: Option<String>,
    pub mime_type: Option<String>,
    pub language: Option<String>,
    /// DASH role schemes, lowercased (`main`, `caption`, `dub`,
    /// `description`, `sign`, ...).
    pub roles: Vec<String>,
    /// Set when this set is a trick-mode companion of another one.
    pub trick_mode_for: Option<String>,
    pub segment_template: Option<SegmentTemplateIr>,
    pub representations: Vec<RepresentationIr>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PeriodIr {
    pub id: Option<String>,
    pub start: Option<f64>,
    pub duration: Option<f64>,
    pub base_urls: Vec<String>,
    /// Remote period body to resolve before building.
    pub xlink_href: Option<String>,
    pub adaptations: Vec<AdaptationIr>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MpdIr {
    /// `static` or `dynamic`.
    pub mpd_type: Option<String>,
    pub minimum_update_period: Option<f64>,
    /// Seconds since the Unix epoch.
    pub availability_start_time: Option<f64>,
    pub publish_time: Option<f64>,
    pub suggested_presentation_delay: Option<f64>,
    pub time_shift_buffer_depth: Option<f64>,
    /// `mediaPresentationDuration`, seconds.
    pub duration: Option<f64>,
    pub profiles: Option<String>,
    pub base_urls: Vec<String>,
    /// Alternative manifest locations for refreshes.
    pub locations: Vec<String>,
    pub utc_timings: Vec<UtcTimingIr>,
    pub periods: Vec<PeriodIr>,
}

impl MpdIr {
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.mpd_type.as_deref() == Some("dynamic")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_inheritance_overrides_field_by_field() {
        let base = SegmentTemplateIr {
            timescale: Some(90_000),
            duration: Some(360_000),
            media: Some("seg-$Number$.m4s".to_string()),
            initialization: Some("init.mp4".to_string()),
            ..SegmentTemplateIr::default()
        };
        let over = SegmentTemplateIr {
            duration: Some(180_000),
            ..SegmentTemplateIr::default()
        };
        let merged = SegmentTemplateIr::inherit(Some(&base), Some(&over));
        assert_eq!(merged.timescale, Some(90_000));
        assert_eq!(merged.duration, Some(180_000));
        assert_eq!(merged.media.as_deref(), Some("seg-$Number$.m4s"));
    }
}
