//! Absorbing a refreshed manifest into the live model.

use crate::types::{Adaptation, Manifest, Period};

/// How deeply a refresh rewrites existing segment indexes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MergeMode {
    /// The new document is authoritative: indexes are replaced.
    Replace,
    /// The new document extends the old one: indexes merge, history kept.
    Update,
}

impl Manifest {
    /// Fully adopt a refreshed manifest. Existing period/adaptation/
    /// representation objects survive so id-based references stay valid.
    pub fn replace(&mut self, new: Manifest) {
        self.absorb(new, MergeMode::Replace);
    }

    /// Merge a refreshed manifest, keeping locally-known index history the
    /// new document no longer lists.
    pub fn update(&mut self, new: Manifest) {
        self.absorb(new, MergeMode::Update);
    }

    fn absorb(&mut self, new: Manifest, mode: MergeMode) {
        self.transport = new.transport;
        self.is_dynamic = new.is_dynamic;
        self.is_live = new.is_live;
        self.is_last_period_known = new.is_last_period_known;
        self.availability_start_time = new.availability_start_time;
        self.suggested_presentation_delay = new.suggested_presentation_delay;
        self.lifetime = new.lifetime;
        self.time_bounds = new.time_bounds;
        if !new.uris.is_empty() {
            self.uris = new.uris;
        }
        // A refresh parsed without a timing endpoint does not forget a
        // previously measured clock offset.
        if new.clock_offset_ms.is_some() {
            self.clock_offset_ms = new.clock_offset_ms;
        }

        // Everything currently listed becomes provisional until matched.
        for period in &mut self.periods {
            period.in_manifest = false;
        }

        for new_period in new.periods {
            let matched = self.periods.iter_mut().find(|p| {
                p.id == new_period.id
                    || (p.id != new_period.id && (p.start - new_period.start).abs() < 1e-3)
            });
            match matched {
                Some(old_period) => merge_period(old_period, new_period, mode),
                None => {
                    tracing::debug!(period = %new_period.id, "refresh added a period");
                    self.periods.push(new_period);
                }
            }
        }

        self.periods
            .sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

        for period in self.periods.iter().filter(|p| !p.in_manifest) {
            tracing::debug!(period = %period.id, "period no longer listed; retained for subscribers");
        }
    }

    /// Drop retained periods nobody references anymore.
    ///
    /// `still_referenced` is consulted for every unlisted period id.
    pub fn sweep_removed_periods(&mut self, still_referenced: impl Fn(&str) -> bool) {
        self.periods
            .retain(|p| p.in_manifest || still_referenced(&p.id));
    }
}

fn merge_period(old: &mut Period, new: Period, mode: MergeMode) {
    old.in_manifest = true;
    old.start = new.start;
    old.end = new.end;
    old.duration = new.duration;

    for new_adaptation in new.adaptations {
        match old.adaptation_mut(&new_adaptation.id) {
            Some(old_adaptation) => merge_adaptation(old_adaptation, new_adaptation, mode),
            None => {
                tracing::debug!(
                    period = %old.id,
                    adaptation = %new_adaptation.id,
                    "refresh added a track"
                );
                old.adaptations.push(new_adaptation);
            }
        }
    }
    // Adaptations absent from the new document are retained: buffered
    // data may still reference them until the track layer lets go.
}

fn merge_adaptation(old: &mut Adaptation, new: Adaptation, mode: MergeMode) {
    old.language = new.language;
    old.normalized_language = new.normalized_language;
    old.trick_mode_ids = new.trick_mode_ids;

    let mut appended = false;
    for new_representation in new.representations {
        match old.representation_mut(&new_representation.id) {
            Some(old_representation) => {
                match mode {
                    MergeMode::Replace => {
                        old_representation.index.replace(&new_representation.index);
                    }
                    MergeMode::Update => {
                        old_representation.index.update(&new_representation.index);
                    }
                }
                old_representation.decipherable = new_representation.decipherable;
                old_representation.is_supported = new_representation.is_supported;
            }
            None => {
                old.representations.push(new_representation);
                appended = true;
            }
        }
    }
    if appended {
        old.sort_representations();
    }
}

#[cfg(test)]
mod tests {
    use aulos_index::{
        RepresentationIndex, SegmentIndexOps, TimelineEntry, TimelineIndex, TimelineIndexOptions,
    };

    use super::*;
    use crate::types::{
        MaximumTimeDescriptor, MediaType, Representation, TimeBounds, TransportType,
    };

    fn timeline_index(entries: Vec<TimelineEntry>, is_dynamic: bool) -> RepresentationIndex {
        RepresentationIndex::Timeline(
            TimelineIndex::new(TimelineIndexOptions {
                representation_id: "rep".to_string(),
                bitrate: 800_000,
                timescale: 1_000,
                presentation_time_offset: 0,
                period_start: 0.0,
                period_end: None,
                start_number: 1,
                entries,
                media_templates: vec!["seg-$Time$.m4s".to_string()],
                init_templates: None,
                is_dynamic,
            })
            .unwrap(),
        )
    }

    fn representation(id: &str, bitrate: u64, index: RepresentationIndex) -> Representation {
        Representation {
            id: id.to_string(),
            bitrate,
            codec: None,
            mime_type: None,
            width: None,
            height: None,
            frame_rate: None,
            hdr: None,
            decipherable: None,
            is_supported: true,
            index,
        }
    }

    fn adaptation(id: &str, representations: Vec<Representation>) -> Adaptation {
        Adaptation {
            id: id.to_string(),
            media_type: MediaType::Video,
            language: None,
            normalized_language: None,
            is_audio_description: false,
            is_closed_caption: false,
            is_dub: false,
            is_sign_interpreted: false,
            is_trick_mode_track: false,
            manually_added: false,
            trick_mode_ids: Vec::new(),
            representations,
        }
    }

    fn period(id: &str, start: f64, adaptations: Vec<Adaptation>) -> Period {
        Period {
            id: id.to_string(),
            start,
            end: None,
            duration: None,
            adaptations,
            in_manifest: true,
        }
    }

    fn manifest(periods: Vec<Period>) -> Manifest {
        Manifest {
            transport: TransportType::Dash,
            is_dynamic: true,
            is_live: true,
            is_last_period_known: false,
            availability_start_time: Some(0.0),
            clock_offset_ms: Some(250),
            suggested_presentation_delay: None,
            lifetime: Some(4.0),
            time_bounds: TimeBounds {
                absolute_minimum_time: 0.0,
                timeshift_depth: None,
                maximum: MaximumTimeDescriptor {
                    is_linear: true,
                    value: 0.0,
                    at_ms: 0.0,
                },
            },
            uris: vec!["http://example.com/manifest.mpd".to_string()],
            periods,
        }
    }

    fn run(entries: Vec<(u64, u64)>, is_dynamic: bool) -> RepresentationIndex {
        timeline_index(
            entries
                .into_iter()
                .map(|(start, duration)| TimelineEntry {
                    start,
                    duration,
                    repeat: 0,
                })
                .collect(),
            is_dynamic,
        )
    }

    #[test]
    fn update_merges_indexes_and_keeps_history() {
        let old_index = run(vec![(0, 2_000), (2_000, 2_000)], true);
        let mut old = manifest(vec![period(
            "p1",
            0.0,
            vec![adaptation("video-main", vec![representation("r1", 800_000, old_index)])],
        )]);

        let new_index = run(vec![(4_000, 2_000), (6_000, 2_000)], true);
        let new = manifest(vec![period(
            "p1",
            0.0,
            vec![adaptation("video-main", vec![representation("r1", 800_000, new_index)])],
        )]);

        old.update(new);

        let segments = old.periods[0].adaptations[0].representations[0]
            .index
            .segments(0.0, 100.0);
        assert_eq!(segments.len(), 4, "history kept and tail appended");
    }

    #[test]
    fn disappeared_period_is_retained_but_unlisted() {
        let mut old = manifest(vec![
            period("p1", 0.0, vec![adaptation("a", vec![])]),
            period("p2", 10.0, vec![adaptation("a", vec![])]),
        ]);
        let new = manifest(vec![period("p2", 10.0, vec![adaptation("a", vec![])])]);

        old.update(new);

        assert_eq!(old.periods.len(), 2);
        assert!(!old.period("p1").unwrap().in_manifest);
        assert!(old.period("p2").unwrap().in_manifest);
        assert!(old.period_for_time(5.0).is_none(), "unlisted period not served");

        old.sweep_removed_periods(|_| false);
        assert_eq!(old.periods.len(), 1);
    }

    #[test]
    fn new_period_is_appended_in_start_order() {
        let mut old = manifest(vec![period("p2", 10.0, vec![])]);
        let new = manifest(vec![
            period("p2", 10.0, vec![]),
            period("p3", 20.0, vec![]),
        ]);
        old.update(new);
        let ids: Vec<&str> = old.periods.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p3"]);
    }

    #[test]
    fn period_matching_falls_back_to_start_time() {
        let mut old = manifest(vec![period("old-name", 10.0, vec![])]);
        let new = manifest(vec![period("new-name", 10.0, vec![])]);
        old.update(new);
        assert_eq!(old.periods.len(), 1);
        assert!(old.periods[0].in_manifest);
    }

    #[test]
    fn clock_offset_survives_a_refresh_without_timing_info() {
        let mut old = manifest(vec![]);
        let mut new = manifest(vec![]);
        new.clock_offset_ms = None;
        old.update(new);
        assert_eq!(old.clock_offset_ms, Some(250));
    }

    #[test]
    fn new_representation_keeps_bitrate_order() {
        let mut old = manifest(vec![period(
            "p1",
            0.0,
            vec![adaptation(
                "video-main",
                vec![representation("r-high", 2_000_000, run(vec![(0, 2_000)], false))],
            )],
        )]);
        let new = manifest(vec![period(
            "p1",
            0.0,
            vec![adaptation(
                "video-main",
                vec![
                    representation("r-high", 2_000_000, run(vec![(0, 2_000)], false)),
                    representation("r-low", 400_000, run(vec![(0, 2_000)], false)),
                ],
            )],
        )]);
        old.update(new);
        let bitrates: Vec<u64> = old.periods[0].adaptations[0]
            .representations
            .iter()
            .map(|r| r.bitrate)
            .collect();
        assert_eq!(bitrates, vec![400_000, 2_000_000]);
    }
}
