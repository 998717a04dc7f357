use aulos_index::{IndexPosition, RepresentationIndex, SegmentIndexOps};

/// Media type of an adaptation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaType {
    Audio,
    Video,
    Text,
    Image,
}

impl MediaType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Text => "text",
            Self::Image => "image",
        }
    }
}

/// Source document family the manifest came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportType {
    Dash,
    Smooth,
}

/// High dynamic range signalling of a representation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HdrInfo {
    pub color_depth: Option<u8>,
    pub eotf: Option<String>,
    pub color_space: Option<String>,
}

/// How the presentation's maximum position evolves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaximumTimeDescriptor {
    /// `true`: the maximum grows linearly with wall-clock time (live
    /// edge); `false`: it is frozen (VOD or ended live).
    pub is_linear: bool,
    /// Maximum position, presentation seconds, as of `at_ms`.
    pub value: f64,
    /// Wall-clock milliseconds (Unix epoch) when `value` was computed.
    pub at_ms: f64,
}

/// Addressable extremities of the presentation.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeBounds {
    /// Absolute minimum position, presentation seconds.
    pub absolute_minimum_time: f64,
    /// Timeshift window behind the maximum, seconds; `None` = everything
    /// stays addressable.
    pub timeshift_depth: Option<f64>,
    pub maximum: MaximumTimeDescriptor,
}

/// One encoded quality of a track. Owns its segment index.
#[derive(Clone, Debug)]
pub struct Representation {
    pub id: String,
    /// Bits per second.
    pub bitrate: u64,
    pub codec: Option<String>,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub hdr: Option<HdrInfo>,
    /// `Some(false)` once a DRM layer reported its key unusable.
    pub decipherable: Option<bool>,
    pub is_supported: bool,
    pub index: RepresentationIndex,
}

/// A selectable track within a period, for one media type.
#[derive(Clone, Debug)]
pub struct Adaptation {
    pub id: String,
    pub media_type: MediaType,
    pub language: Option<String>,
    /// ISO 639-3 form of `language`, for track matching.
    pub normalized_language: Option<String>,
    pub is_audio_description: bool,
    pub is_closed_caption: bool,
    pub is_dub: bool,
    pub is_sign_interpreted: bool,
    pub is_trick_mode_track: bool,
    /// Added by the application, not listed in the source document.
    pub manually_added: bool,
    /// Companion trick-mode adaptations, by id (id indirection avoids
    /// cyclic ownership).
    pub trick_mode_ids: Vec<String>,
    /// Ascending bitrate order.
    pub representations: Vec<Representation>,
}

impl Adaptation {
    /// A track is supported when any of its representations is.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.representations.iter().any(|r| r.is_supported)
    }

    #[must_use]
    pub fn representation(&self, id: &str) -> Option<&Representation> {
        self.representations.iter().find(|r| r.id == id)
    }

    pub fn representation_mut(&mut self, id: &str) -> Option<&mut Representation> {
        self.representations.iter_mut().find(|r| r.id == id)
    }

    /// Restore the ascending-bitrate invariant after a mutation.
    pub fn sort_representations(&mut self) {
        self.representations.sort_by_key(|r| r.bitrate);
    }
}

/// A non-overlapping time window of the presentation.
#[derive(Clone, Debug)]
pub struct Period {
    /// Stable across refreshes.
    pub id: String,
    /// Presentation seconds.
    pub start: f64,
    pub end: Option<f64>,
    pub duration: Option<f64>,
    pub adaptations: Vec<Adaptation>,
    /// `false` once a refresh no longer lists this period; it is retained
    /// while subscribers still reference its adaptations.
    pub in_manifest: bool,
}

impl Period {
    #[must_use]
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && self.end.map_or(true, |end| time < end)
    }

    pub fn adaptations_of(&self, media_type: MediaType) -> impl Iterator<Item = &Adaptation> {
        self.adaptations
            .iter()
            .filter(move |a| a.media_type == media_type)
    }

    #[must_use]
    pub fn adaptation(&self, id: &str) -> Option<&Adaptation> {
        self.adaptations.iter().find(|a| a.id == id)
    }

    pub fn adaptation_mut(&mut self, id: &str) -> Option<&mut Adaptation> {
        self.adaptations.iter_mut().find(|a| a.id == id)
    }
}

/// Root of the model. Mutated only by the refresh path.
#[derive(Clone, Debug)]
pub struct Manifest {
    pub transport: TransportType,
    /// Document may change over time (live, or VOD still being appended).
    pub is_dynamic: bool,
    pub is_live: bool,
    pub is_last_period_known: bool,
    /// Presentation zero point, seconds since the Unix epoch.
    pub availability_start_time: Option<f64>,
    /// `server - client` clock delta, milliseconds.
    pub clock_offset_ms: Option<i64>,
    pub suggested_presentation_delay: Option<f64>,
    /// Seconds this document stays valid before a refresh is due.
    pub lifetime: Option<f64>,
    pub time_bounds: TimeBounds,
    /// Refresh URLs, in preference order.
    pub uris: Vec<String>,
    /// Ascending start order, non-overlapping.
    pub periods: Vec<Period>,
}

impl Manifest {
    #[must_use]
    pub fn period(&self, id: &str) -> Option<&Period> {
        self.periods.iter().find(|p| p.id == id)
    }

    pub fn period_mut(&mut self, id: &str) -> Option<&mut Period> {
        self.periods.iter_mut().find(|p| p.id == id)
    }

    #[must_use]
    pub fn period_for_time(&self, time: f64) -> Option<&Period> {
        self.periods
            .iter()
            .filter(|p| p.in_manifest)
            .find(|p| p.contains(time))
    }

    #[must_use]
    pub fn period_after(&self, period_id: &str) -> Option<&Period> {
        let pos = self.periods.iter().position(|p| p.id == period_id)?;
        self.periods[pos + 1..].iter().find(|p| p.in_manifest)
    }

    /// Earliest addressable position, presentation seconds.
    #[must_use]
    pub fn minimum_position(&self, now_ms: f64) -> f64 {
        match self.time_bounds.timeshift_depth {
            Some(depth) => {
                let max = self.maximum_position(now_ms);
                (max - depth).max(self.time_bounds.absolute_minimum_time)
            }
            None => self.time_bounds.absolute_minimum_time,
        }
    }

    /// Latest addressable position, presentation seconds.
    #[must_use]
    pub fn maximum_position(&self, now_ms: f64) -> f64 {
        let max = &self.time_bounds.maximum;
        if max.is_linear {
            max.value + (now_ms - max.at_ms) / 1_000.0
        } else {
            max.value
        }
    }

    /// First period's first supported audio/video positions give the
    /// earliest point playback can actually start from.
    #[must_use]
    pub fn first_playable_position(&self) -> Option<f64> {
        let period = self.periods.iter().find(|p| p.in_manifest)?;
        let mut earliest: Option<f64> = None;
        for adaptation in &period.adaptations {
            for representation in &adaptation.representations {
                if let IndexPosition::At(t) = representation.index.first_position() {
                    earliest = Some(earliest.map_or(t, |e: f64| e.min(t)));
                }
            }
        }
        earliest.or(Some(period.start))
    }
}
