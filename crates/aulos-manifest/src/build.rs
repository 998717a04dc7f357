//! Building a [`Manifest`] out of the DASH intermediate representation.

use std::collections::HashMap;

use aulos_index::{
    AvailabilityBounds, BaseIndex, ByteRange, Clock, ListEntry, ListIndex, RepresentationIndex,
    TemplateIndex, TemplateIndexOptions, TimelineEntry, TimelineIndex, TimelineIndexOptions,
};

use crate::{
    error::{ManifestError, ManifestResult, ManifestWarning},
    ir::{
        AdaptationIr, MpdIr, PeriodIr, RepresentationIr, SegmentTemplateIr, TimelineEntryIr,
        UtcTimingScheme,
    },
    lang::normalize_language,
    types::{
        Adaptation, Manifest, MaximumTimeDescriptor, MediaType, Period, Representation,
        TimeBounds, TransportType,
    },
    FALLBACK_LIFETIME_WHEN_UPDATE_PERIOD_ZERO,
};

/// External inputs of a build attempt.
///
/// Continuations work by re-invoking the builder with more context: a
/// [`ParseOutcome::NeedsClock`] answer is satisfied by filling
/// `external_clock`, a [`ParseOutcome::NeedsResources`] answer by filling
/// `resolved_xlinks`.
#[derive(Clone, Debug, Default)]
pub struct ParseContext {
    /// URL the manifest was fetched from; first refresh URL.
    pub manifest_url: Option<String>,
    /// `(server_unix_ms, client_unix_ms_at_fetch)` from a timing endpoint.
    pub external_clock: Option<(f64, f64)>,
    /// Fetched xlink bodies, keyed by href.
    pub resolved_xlinks: HashMap<String, Vec<PeriodIr>>,
    /// Wall clock used for availability computations.
    pub clock: Clock,
    /// Request one extra segment of live lookahead.
    pub aggressive_mode: bool,
    /// Legacy-packaging hook: treat the final sidx segment's byte range as
    /// open-ended.
    pub unbounded_last_segment_range: bool,
}

/// Result of one build attempt.
#[derive(Debug)]
pub enum ParseOutcome {
    Done {
        manifest: Manifest,
        warnings: Vec<ManifestWarning>,
    },
    /// A clock must be fetched from `url` and fed back as
    /// [`ParseContext::external_clock`].
    NeedsClock { url: String },
    /// Remote period bodies must be fetched and fed back as
    /// [`ParseContext::resolved_xlinks`].
    NeedsResources { urls: Vec<String> },
}

/// Build a manifest from a parsed MPD, suspending on unresolved external
/// resources.
pub fn build_dash_manifest(ir: &MpdIr, ctx: &ParseContext) -> ManifestResult<ParseOutcome> {
    // Remote periods must be in hand before period timing can be laid out.
    let missing: Vec<String> = ir
        .periods
        .iter()
        .filter_map(|p| p.xlink_href.clone())
        .filter(|href| !ctx.resolved_xlinks.contains_key(href))
        .collect();
    if !missing.is_empty() {
        return Ok(ParseOutcome::NeedsResources { urls: missing });
    }

    let is_dynamic = ir.is_dynamic();

    let clock_offset_ms = match resolve_clock_offset(ir, ctx, is_dynamic)? {
        ClockResolution::Offset(offset) => offset,
        ClockResolution::Fetch(url) => return Ok(ParseOutcome::NeedsClock { url }),
    };

    let mut warnings = Vec::new();

    // Splice xlinked periods in place.
    let mut period_irs: Vec<&PeriodIr> = Vec::new();
    for period in &ir.periods {
        match &period.xlink_href {
            Some(href) => match ctx.resolved_xlinks.get(href) {
                Some(resolved) => period_irs.extend(resolved.iter()),
                None => unreachable!("missing xlinks returned above"),
            },
            None => period_irs.push(period),
        }
    }

    let base_urls = resolve_base_chain(
        &ctx.manifest_url
            .as_ref()
            .map(|u| vec![u.clone()])
            .unwrap_or_default(),
        &ir.base_urls,
    );

    let mut periods = build_periods(
        ir,
        &period_irs,
        &base_urls,
        clock_offset_ms,
        ctx,
        is_dynamic,
        &mut warnings,
    )?;
    periods.sort_by(|a, b| {
        a.start
            .partial_cmp(&b.start)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    clamp_overlaps(&mut periods, &mut warnings);

    let lifetime = match ir.minimum_update_period {
        Some(p) if p <= 0.0 => Some(FALLBACK_LIFETIME_WHEN_UPDATE_PERIOD_ZERO),
        other => other,
    };

    let availability_start_time = ir.availability_start_time.or(if is_dynamic {
        Some(0.0)
    } else {
        None
    });

    let absolute_minimum_time = periods.first().map_or(0.0, |p| p.start);
    let client_now_ms = ctx.clock.now_secs() * 1_000.0;
    let maximum = if is_dynamic {
        let server_now_ms = client_now_ms + clock_offset_ms.unwrap_or(0) as f64;
        MaximumTimeDescriptor {
            is_linear: true,
            value: server_now_ms / 1_000.0 - availability_start_time.unwrap_or(0.0),
            at_ms: client_now_ms,
        }
    } else {
        let end = ir
            .duration
            .or_else(|| periods.last().and_then(|p| p.end))
            .unwrap_or(0.0);
        MaximumTimeDescriptor {
            is_linear: false,
            value: end,
            at_ms: client_now_ms,
        }
    };

    let mut uris = Vec::new();
    if let Some(url) = &ctx.manifest_url {
        uris.push(url.clone());
    }
    uris.extend(ir.locations.iter().cloned());

    let manifest = Manifest {
        transport: TransportType::Dash,
        is_dynamic,
        is_live: is_dynamic,
        is_last_period_known: !is_dynamic || ir.duration.is_some(),
        availability_start_time,
        clock_offset_ms,
        suggested_presentation_delay: ir.suggested_presentation_delay,
        lifetime,
        time_bounds: TimeBounds {
            absolute_minimum_time,
            timeshift_depth: ir.time_shift_buffer_depth,
            maximum,
        },
        uris,
        periods,
    };

    Ok(ParseOutcome::Done { manifest, warnings })
}

/// Parse the body of a UTC-timing endpoint (an ISO-8601 date) into Unix
/// milliseconds.
pub fn parse_utc_timestamp(text: &str) -> ManifestResult<f64> {
    let trimmed = text.trim();
    chrono::DateTime::parse_from_rfc3339(trimmed)
        .map(|d| d.timestamp_millis() as f64)
        .map_err(|e| ManifestError::Parse(format!("bad UTC timing body {trimmed:?}: {e}")))
}

enum ClockResolution {
    Offset(Option<i64>),
    Fetch(String),
}

fn resolve_clock_offset(
    ir: &MpdIr,
    ctx: &ParseContext,
    is_dynamic: bool,
) -> ManifestResult<ClockResolution> {
    if !is_dynamic {
        return Ok(ClockResolution::Offset(None));
    }
    for timing in &ir.utc_timings {
        match timing.scheme {
            UtcTimingScheme::Direct => {
                let parsed = match chrono::DateTime::parse_from_rfc3339(&timing.value) {
                    Ok(parsed) => parsed,
                    Err(error) => {
                        tracing::warn!(value = %timing.value, %error, "unusable UTCTiming date");
                        continue;
                    }
                };
                let server_ms = parsed.timestamp_millis() as f64;
                let client_ms = ctx.clock.now_secs() * 1_000.0;
                return Ok(ClockResolution::Offset(Some(
                    (server_ms - client_ms).round() as i64,
                )));
            }
            UtcTimingScheme::HttpIso => match ctx.external_clock {
                Some((server_ms, client_ms)) => {
                    return Ok(ClockResolution::Offset(Some(
                        (server_ms - client_ms).round() as i64,
                    )));
                }
                None => return Ok(ClockResolution::Fetch(timing.value.clone())),
            },
        }
    }
    Ok(ClockResolution::Offset(None))
}

#[allow(clippy::too_many_arguments)]
fn build_periods(
    ir: &MpdIr,
    period_irs: &[&PeriodIr],
    base_urls: &[String],
    clock_offset_ms: Option<i64>,
    ctx: &ParseContext,
    is_dynamic: bool,
    warnings: &mut Vec<ManifestWarning>,
) -> ManifestResult<Vec<Period>> {
    let mut periods = Vec::with_capacity(period_irs.len());
    let mut prev_end: f64 = 0.0;

    for (i, period_ir) in period_irs.iter().enumerate() {
        let start = period_ir.start.unwrap_or(prev_end);
        let duration = period_ir.duration;
        let end = duration
            .map(|d| start + d)
            .or_else(|| period_irs.get(i + 1).and_then(|next| next.start))
            .or(if is_dynamic { None } else { ir.duration });
        prev_end = end.unwrap_or(start);

        let id = period_ir
            .id
            .clone()
            .unwrap_or_else(|| format!("period-{start}"));
        let period_bases = resolve_base_chain(base_urls, &period_ir.base_urls);

        let mut adaptations = Vec::with_capacity(period_ir.adaptations.len());
        for (adaptation_index, adaptation_ir) in period_ir.adaptations.iter().enumerate() {
            if let Some(adaptation) = build_adaptation(
                adaptation_ir,
                adaptation_index,
                &period_bases,
                BuildTiming {
                    period_start: start,
                    period_end: end,
                    availability_start_time: ir.availability_start_time,
                    time_shift_buffer_depth: ir.time_shift_buffer_depth,
                    clock_offset_ms,
                    is_dynamic,
                },
                ctx,
                warnings,
            ) {
                adaptations.push(adaptation);
            }
        }
        link_trick_mode_tracks(&mut adaptations, period_ir);

        periods.push(Period {
            id,
            start,
            end,
            duration: end.map(|e| e - start),
            adaptations,
            in_manifest: true,
        });
    }
    Ok(periods)
}

/// Timing inputs shared by every index built inside one period.
#[derive(Clone, Copy)]
struct BuildTiming {
    period_start: f64,
    period_end: Option<f64>,
    availability_start_time: Option<f64>,
    time_shift_buffer_depth: Option<f64>,
    clock_offset_ms: Option<i64>,
    is_dynamic: bool,
}

fn media_type_of(adaptation: &AdaptationIr) -> Option<MediaType> {
    let content_type = adaptation
        .content_type
        .as_deref()
        .or_else(|| adaptation.mime_type.as_deref().and_then(|m| m.split('/').next()));
    match content_type {
        Some("audio") => Some(MediaType::Audio),
        Some("video") => Some(MediaType::Video),
        Some("text") | Some("application") => Some(MediaType::Text),
        Some("image") => Some(MediaType::Image),
        _ => None,
    }
}

fn build_adaptation(
    ir: &AdaptationIr,
    position: usize,
    period_bases: &[String],
    timing: BuildTiming,
    ctx: &ParseContext,
    warnings: &mut Vec<ManifestWarning>,
) -> Option<Adaptation> {
    let media_type = media_type_of(ir)?;
    let id = ir
        .id
        .clone()
        .unwrap_or_else(|| format!("{}-{position}", media_type.as_str()));

    let mut representations = Vec::with_capacity(ir.representations.len());
    for representation_ir in &ir.representations {
        match build_representation(representation_ir, ir, period_bases, timing, ctx) {
            Ok(representation) => representations.push(representation),
            Err(reason) => {
                let rep_id = representation_ir.id.clone().unwrap_or_default();
                tracing::warn!(representation = %rep_id, %reason, "dropping representation");
                warnings.push(ManifestWarning::RepresentationDropped {
                    id: rep_id,
                    reason: reason.to_string(),
                });
            }
        }
    }
    if representations.is_empty() {
        warnings.push(ManifestWarning::EmptyAdaptation { id: id.clone() });
        return None;
    }
    representations.sort_by_key(|r| r.bitrate);

    let roles = &ir.roles;
    let has_role = |role: &str| roles.iter().any(|r| r == role);

    Some(Adaptation {
        id,
        media_type,
        language: ir.language.clone(),
        normalized_language: ir.language.as_deref().map(normalize_language),
        is_audio_description: has_role("description") && media_type == MediaType::Audio,
        is_closed_caption: has_role("caption"),
        is_dub: has_role("dub"),
        is_sign_interpreted: has_role("sign"),
        is_trick_mode_track: ir.trick_mode_for.is_some(),
        manually_added: false,
        trick_mode_ids: Vec::new(),
        representations,
    })
}

/// Wire trick-mode companions onto their main tracks by id.
fn link_trick_mode_tracks(adaptations: &mut [Adaptation], period_ir: &PeriodIr) {
    let links: Vec<(String, String)> = period_ir
        .adaptations
        .iter()
        .filter_map(|a| {
            let target = a.trick_mode_for.clone()?;
            let this = a.id.clone()?;
            Some((target, this))
        })
        .collect();
    for (target, trick) in links {
        if let Some(main) = adaptations.iter_mut().find(|a| a.id == target) {
            main.trick_mode_ids.push(trick);
        }
    }
}

/// Rough codec allowlist; anything unrecognized is kept unsupported so
/// track selection can skip it without failing the manifest.
fn codec_is_supported(codecs: Option<&str>) -> bool {
    let Some(codecs) = codecs else { return true };
    codecs.split(',').map(str::trim).all(|codec| {
        let family = codec.split('.').next().unwrap_or(codec);
        matches!(
            family,
            "avc1" | "avc3" | "hev1" | "hvc1" | "vp8" | "vp9" | "av01" | "mp4a" | "opus"
                | "vorbis" | "ac-3" | "ec-3" | "flac" | "stpp" | "wvtt"
        )
    })
}

fn build_representation(
    ir: &RepresentationIr,
    adaptation: &AdaptationIr,
    period_bases: &[String],
    timing: BuildTiming,
    ctx: &ParseContext,
) -> Result<Representation, ManifestError> {
    let id = ir
        .id
        .clone()
        .ok_or_else(|| ManifestError::Parse("representation without id".to_string()))?;
    let bitrate = ir.bandwidth.unwrap_or(0);
    let bases = resolve_base_chain(period_bases, &ir.base_urls);

    let template = SegmentTemplateIr::inherit(
        adaptation.segment_template.as_ref(),
        ir.segment_template.as_ref(),
    );

    let index = if template.media.is_some() {
        build_template_index(&id, bitrate, &template, &bases, timing, ctx)
            .map_err(|e| ManifestError::Parse(e.to_string()))?
    } else if let Some(list) = &ir.segment_list {
        let timescale = list.timescale.unwrap_or(1);
        let entries = list
            .entries
            .iter()
            .map(|e| ListEntry {
                media_urls: resolve_urls(&bases, &e.media),
                byte_range: e.media_range.map(|(s, e)| ByteRange::new(s, Some(e))),
            })
            .collect();
        RepresentationIndex::List(ListIndex::new(
            timescale,
            list.duration.unwrap_or(timescale),
            list.presentation_time_offset.unwrap_or(0),
            timing.period_start,
            entries,
            list.initialization.as_ref().map(|i| resolve_urls(&bases, i)),
            list.initialization_range
                .map(|(s, e)| ByteRange::new(s, Some(e))),
        ))
    } else {
        // SegmentBase, explicit or implied by a lone BaseURL.
        let base = ir.segment_base.clone().unwrap_or_default();
        RepresentationIndex::Base(BaseIndex::new(
            id.clone(),
            base.timescale.unwrap_or(1),
            base.presentation_time_offset.unwrap_or(0),
            timing.period_start,
            bases.clone(),
            base.initialization_range
                .map(|(s, e)| ByteRange::new(s, Some(e))),
            base.index_range.map(|(s, e)| ByteRange::new(s, Some(e))),
            ctx.unbounded_last_segment_range,
        ))
    };

    Ok(Representation {
        is_supported: codec_is_supported(ir.codecs.as_deref()),
        id,
        bitrate,
        codec: ir.codecs.clone(),
        mime_type: ir.mime_type.clone().or_else(|| adaptation.mime_type.clone()),
        width: ir.width,
        height: ir.height,
        frame_rate: ir.frame_rate,
        hdr: None,
        decipherable: None,
        index,
    })
}

fn build_template_index(
    id: &str,
    bitrate: u64,
    template: &SegmentTemplateIr,
    bases: &[String],
    timing: BuildTiming,
    ctx: &ParseContext,
) -> Result<RepresentationIndex, aulos_index::TemplateError> {
    let timescale = template.timescale.unwrap_or(1);
    let pto = template.presentation_time_offset.unwrap_or(0);
    let start_number = template.start_number.unwrap_or(1);
    let media = template.media.as_deref().unwrap_or_default();
    let media_templates = resolve_urls(bases, media);
    let init_templates = template
        .initialization
        .as_ref()
        .map(|init| resolve_urls(bases, init));

    if let Some(timeline) = &template.timeline {
        let entries = expand_timeline_entries(timeline);
        return Ok(RepresentationIndex::Timeline(TimelineIndex::new(
            TimelineIndexOptions {
                representation_id: id.to_string(),
                bitrate,
                timescale,
                presentation_time_offset: pto,
                period_start: timing.period_start,
                period_end: timing.period_end,
                start_number,
                entries,
                media_templates,
                init_templates,
                is_dynamic: timing.is_dynamic,
            },
        )?));
    }

    let Some(duration) = template.duration else {
        return Ok(RepresentationIndex::Template(TemplateIndex::new(
            TemplateIndexOptions {
                representation_id: id.to_string(),
                bitrate,
                timescale,
                segment_duration: timescale, // 1s placeholder, nothing addressable
                start_number,
                presentation_time_offset: pto,
                period_start: timing.period_start,
                period_end: Some(timing.period_start),
                media_templates,
                init_templates,
                is_dynamic: timing.is_dynamic,
                bounds: None,
            },
        )?));
    };

    let bounds = timing.is_dynamic.then(|| AvailabilityBounds {
        availability_start_time: timing.availability_start_time.unwrap_or(0.0),
        clock_offset_ms: timing.clock_offset_ms,
        timeshift_buffer_depth: timing.time_shift_buffer_depth,
        availability_time_offset: template.availability_time_offset.unwrap_or(0.0),
        aggressive_mode: ctx.aggressive_mode,
        clock: ctx.clock.clone(),
    });

    Ok(RepresentationIndex::Template(TemplateIndex::new(
        TemplateIndexOptions {
            representation_id: id.to_string(),
            bitrate,
            timescale,
            segment_duration: duration,
            start_number,
            presentation_time_offset: pto,
            period_start: timing.period_start,
            period_end: timing.period_end,
            media_templates,
            init_templates,
            is_dynamic: timing.is_dynamic,
            bounds,
        },
    )?))
}

/// Fill `<S>` defaults: a missing `t` continues where the previous run
/// ended.
fn expand_timeline_entries(entries: &[TimelineEntryIr]) -> Vec<TimelineEntry> {
    let mut out = Vec::with_capacity(entries.len());
    let mut cursor: u64 = 0;
    for entry in entries {
        let start = entry.t.unwrap_or(cursor);
        out.push(TimelineEntry {
            start,
            duration: entry.d,
            repeat: entry.r,
        });
        let occurrences = if entry.r >= 0 { entry.r as u64 + 1 } else { 1 };
        cursor = start + occurrences * entry.d;
    }
    out
}

fn clamp_overlaps(periods: &mut [Period], warnings: &mut Vec<ManifestWarning>) {
    for i in 1..periods.len() {
        let next_start = periods[i].start;
        let second_id = periods[i].id.clone();
        let prev = &mut periods[i - 1];
        if !prev.end.map_or(true, |end| end > next_start) {
            continue;
        }
        if prev.end.is_some() {
            warnings.push(ManifestWarning::OverlappingPeriods {
                first_id: prev.id.clone(),
                second_id,
            });
        }
        prev.end = Some(next_start);
        prev.duration = Some(next_start - prev.start);
    }
}

/// Resolve a child BaseURL list against its parents.
fn resolve_base_chain(parents: &[String], children: &[String]) -> Vec<String> {
    if children.is_empty() {
        return parents.to_vec();
    }
    let mut out = Vec::new();
    for child in children {
        if is_absolute(child) || parents.is_empty() {
            out.push(child.clone());
        } else {
            for parent in parents {
                out.push(join_url(parent, child));
            }
        }
    }
    out
}

/// Resolve a (possibly templated) path against every base URL.
fn resolve_urls(bases: &[String], relative: &str) -> Vec<String> {
    if is_absolute(relative) || bases.is_empty() {
        return vec![relative.to_string()];
    }
    bases.iter().map(|base| join_url(base, relative)).collect()
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

// URL templates contain `$` tokens that a URL parser would escape, so
// joining is done textually.
fn join_url(base: &str, relative: &str) -> String {
    if relative.starts_with('/') {
        if let Some(scheme_end) = base.find("://") {
            let authority_end = base[scheme_end + 3..]
                .find('/')
                .map_or(base.len(), |i| scheme_end + 3 + i);
            return format!("{}{relative}", &base[..authority_end]);
        }
        return relative.to_string();
    }

    let cut = base.find(['?', '#']).unwrap_or(base.len());
    let base = &base[..cut];
    if base.ends_with('/') {
        return format!("{base}{relative}");
    }
    let after_scheme = base.find("://").map_or(0, |i| i + 3);
    match base.rfind('/') {
        Some(i) if i >= after_scheme => format!("{}{relative}", &base[..=i]),
        _ => format!("{base}/{relative}"),
    }
}
