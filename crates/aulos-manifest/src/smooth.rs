//! Building a [`Manifest`] out of a Smooth-Streaming client manifest.

use aulos_index::{RepresentationIndex, SmoothIndex, TimelineEntry};

use crate::{
    build::{ParseContext, ParseOutcome},
    error::{ManifestResult, ManifestWarning},
    ir::TimelineEntryIr,
    lang::normalize_language,
    types::{
        Adaptation, Manifest, MaximumTimeDescriptor, MediaType, Period, Representation,
        TimeBounds, TransportType,
    },
};

/// Default Smooth tick rate (100-nanosecond units).
const SMOOTH_DEFAULT_TIMESCALE: u64 = 10_000_000;

/// One quality level of a stream index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SmoothQualityIr {
    pub bitrate: u64,
    /// FourCC (`H264`, `AACL`, ...).
    pub four_cc: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// One `<StreamIndex>` element.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SmoothStreamIr {
    /// `video` / `audio` / `text`.
    pub stream_type: String,
    pub name: Option<String>,
    pub language: Option<String>,
    /// URL pattern with `{bitrate}` and `{start time}` placeholders.
    pub url_pattern: String,
    pub timescale: Option<u64>,
    pub qualities: Vec<SmoothQualityIr>,
    /// `<c>` chunks; `t` defaults continue the previous chunk.
    pub chunks: Vec<TimelineEntryIr>,
}

/// Parsed Smooth client manifest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SmoothIr {
    pub is_live: bool,
    pub timescale: Option<u64>,
    /// Total duration, ticks, when known.
    pub duration_ticks: Option<u64>,
    /// Addressable window behind the live edge, ticks.
    pub dvr_window_length: Option<u64>,
    pub stream_indexes: Vec<SmoothStreamIr>,
}

fn media_type_of(stream_type: &str) -> Option<MediaType> {
    match stream_type {
        "audio" => Some(MediaType::Audio),
        "video" => Some(MediaType::Video),
        "text" => Some(MediaType::Text),
        _ => None,
    }
}

fn expand_chunks(chunks: &[TimelineEntryIr]) -> Vec<TimelineEntry> {
    let mut out = Vec::with_capacity(chunks.len());
    let mut cursor: u64 = 0;
    for chunk in chunks {
        let start = chunk.t.unwrap_or(cursor);
        out.push(TimelineEntry {
            start,
            duration: chunk.d,
            repeat: chunk.r,
        });
        let occurrences = if chunk.r >= 0 { chunk.r as u64 + 1 } else { 1 };
        cursor = start + occurrences * chunk.d;
    }
    out
}

/// Smooth codecs map onto a small FourCC set; anything else stays
/// unsupported.
fn four_cc_supported(four_cc: Option<&str>) -> bool {
    match four_cc {
        None => true,
        Some(cc) => matches!(cc, "H264" | "AVC1" | "AACL" | "AACH" | "EC-3" | "TTML"),
    }
}

/// Build a manifest from a Smooth client manifest. Never suspends: Smooth
/// documents carry no external resources.
pub fn build_smooth_manifest(ir: &SmoothIr, ctx: &ParseContext) -> ManifestResult<ParseOutcome> {
    let mut warnings = Vec::new();
    let root_timescale = ir.timescale.unwrap_or(SMOOTH_DEFAULT_TIMESCALE);

    let dvr_window = ir
        .dvr_window_length
        .filter(|&ticks| ticks > 0)
        .map(|ticks| ticks as f64 / root_timescale as f64);

    let mut adaptations = Vec::with_capacity(ir.stream_indexes.len());
    for (position, stream) in ir.stream_indexes.iter().enumerate() {
        let Some(media_type) = media_type_of(&stream.stream_type) else {
            tracing::debug!(stream_type = %stream.stream_type, "skipping unknown stream type");
            continue;
        };
        let timescale = stream.timescale.unwrap_or(root_timescale);
        let entries = expand_chunks(&stream.chunks);
        let pattern = match &ctx.manifest_url {
            Some(base) => join_pattern(base, &stream.url_pattern),
            None => stream.url_pattern.clone(),
        };

        let mut representations: Vec<Representation> = stream
            .qualities
            .iter()
            .enumerate()
            .map(|(quality_position, quality)| Representation {
                id: format!("{}-{}-{}", stream.stream_type, position, quality_position),
                bitrate: quality.bitrate,
                codec: quality.four_cc.clone(),
                mime_type: None,
                width: quality.width,
                height: quality.height,
                frame_rate: None,
                hdr: None,
                decipherable: None,
                is_supported: four_cc_supported(quality.four_cc.as_deref()),
                index: RepresentationIndex::Smooth(SmoothIndex::new(
                    quality.bitrate,
                    timescale,
                    0.0,
                    entries.clone(),
                    pattern.clone(),
                    ir.is_live,
                    dvr_window,
                )),
            })
            .collect();
        representations.sort_by_key(|r| r.bitrate);

        if representations.is_empty() {
            warnings.push(ManifestWarning::EmptyAdaptation {
                id: format!("{}-{position}", stream.stream_type),
            });
            continue;
        }

        adaptations.push(Adaptation {
            id: stream
                .name
                .clone()
                .unwrap_or_else(|| format!("{}-{position}", stream.stream_type)),
            media_type,
            language: stream.language.clone(),
            normalized_language: stream.language.as_deref().map(normalize_language),
            is_audio_description: false,
            is_closed_caption: false,
            is_dub: false,
            is_sign_interpreted: false,
            is_trick_mode_track: false,
            manually_added: false,
            trick_mode_ids: Vec::new(),
            representations,
        });
    }

    let duration = ir
        .duration_ticks
        .map(|ticks| ticks as f64 / root_timescale as f64);
    let client_now_ms = ctx.clock.now_secs() * 1_000.0;
    let maximum = if ir.is_live {
        MaximumTimeDescriptor {
            is_linear: true,
            value: client_now_ms / 1_000.0,
            at_ms: client_now_ms,
        }
    } else {
        MaximumTimeDescriptor {
            is_linear: false,
            value: duration.unwrap_or(0.0),
            at_ms: client_now_ms,
        }
    };

    let manifest = Manifest {
        transport: TransportType::Smooth,
        is_dynamic: ir.is_live,
        is_live: ir.is_live,
        is_last_period_known: !ir.is_live,
        availability_start_time: None,
        clock_offset_ms: None,
        suggested_presentation_delay: None,
        lifetime: None,
        time_bounds: TimeBounds {
            absolute_minimum_time: 0.0,
            timeshift_depth: dvr_window,
            maximum,
        },
        uris: ctx.manifest_url.iter().cloned().collect(),
        periods: vec![Period {
            id: "smooth-0".to_string(),
            start: 0.0,
            end: duration,
            duration,
            adaptations,
            in_manifest: true,
        }],
    };

    Ok(ParseOutcome::Done { manifest, warnings })
}

fn join_pattern(base: &str, pattern: &str) -> String {
    if pattern.starts_with("http://") || pattern.starts_with("https://") {
        return pattern.to_string();
    }
    let cut = base.find(['?', '#']).unwrap_or(base.len());
    let base = &base[..cut];
    match base.rfind('/') {
        Some(i) => format!("{}{pattern}", &base[..=i]),
        None => pattern.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use aulos_index::{SegmentIndexOps, TransportHint};

    use super::*;

    fn smooth_ir() -> SmoothIr {
        SmoothIr {
            is_live: false,
            timescale: None,
            duration_ticks: Some(60 * SMOOTH_DEFAULT_TIMESCALE),
            dvr_window_length: None,
            stream_indexes: vec![SmoothStreamIr {
                stream_type: "video".to_string(),
                name: Some("video".to_string()),
                language: None,
                url_pattern: "QualityLevels({bitrate})/Fragments(video={start time})".to_string(),
                timescale: None,
                qualities: vec![
                    SmoothQualityIr {
                        bitrate: 2_000_000,
                        four_cc: Some("H264".to_string()),
                        width: Some(1280),
                        height: Some(720),
                    },
                    SmoothQualityIr {
                        bitrate: 600_000,
                        four_cc: Some("H264".to_string()),
                        width: Some(640),
                        height: Some(360),
                    },
                ],
                chunks: vec![
                    TimelineEntryIr { t: Some(0), d: 20_000_000, r: 1 },
                    TimelineEntryIr { t: None, d: 20_000_000, r: 0 },
                ],
            }],
        }
    }

    fn build(ir: &SmoothIr) -> Manifest {
        let ctx = ParseContext {
            manifest_url: Some("http://example.com/stream/manifest".to_string()),
            ..ParseContext::default()
        };
        match build_smooth_manifest(ir, &ctx).unwrap() {
            ParseOutcome::Done { manifest, .. } => manifest,
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn builds_one_period_with_sorted_qualities() {
        let manifest = build(&smooth_ir());
        assert_eq!(manifest.transport, TransportType::Smooth);
        assert_eq!(manifest.periods.len(), 1);
        let adaptation = &manifest.periods[0].adaptations[0];
        let bitrates: Vec<u64> = adaptation.representations.iter().map(|r| r.bitrate).collect();
        assert_eq!(bitrates, vec![600_000, 2_000_000]);
    }

    #[test]
    fn fragment_urls_resolve_against_the_manifest_location() {
        let manifest = build(&smooth_ir());
        let rep = &manifest.periods[0].adaptations[0].representations[1];
        let segment = rep.index.segments(0.0, 1.0).remove(0);
        assert_eq!(
            segment.media_urls.as_deref(),
            Some(
                &["http://example.com/stream/QualityLevels(2000000)/Fragments(video=0)"
                    .to_string()][..]
            )
        );
        assert!(matches!(
            segment.hint,
            Some(TransportHint::Smooth { tick_time: 0 })
        ));
    }

    #[test]
    fn chunk_defaults_chain_and_cover_the_timeline() {
        let manifest = build(&smooth_ir());
        let rep = &manifest.periods[0].adaptations[0].representations[0];
        let segments = rep.index.segments(0.0, 100.0);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2].time, 4.0);
    }

    #[test]
    fn live_manifest_gets_linear_bounds_and_dvr_depth() {
        let mut ir = smooth_ir();
        ir.is_live = true;
        ir.dvr_window_length = Some(30 * SMOOTH_DEFAULT_TIMESCALE);
        let manifest = build(&ir);
        assert!(manifest.is_dynamic);
        assert!(!manifest.is_last_period_known);
        assert_eq!(manifest.time_bounds.timeshift_depth, Some(30.0));
        assert!(manifest.time_bounds.maximum.is_linear);
    }
}
