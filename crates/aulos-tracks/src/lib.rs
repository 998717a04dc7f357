#![forbid(unsafe_code)]

//! Track choice management for the aulos streaming engine.
//!
//! Holds, per period and media type, which adaptation the user wants, and
//! reconciles those choices with manifest refreshes: a chosen track that
//! disappears falls back to the first supported one with a notification,
//! and removed periods survive as long as someone still references them.
//!
//! Adaptations are referenced by id and resolved through the manifest at
//! query time, never owned here.

use std::collections::HashMap;

use aulos_manifest::{Adaptation, Manifest, MediaType, Period};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Track-selection errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackError {
    #[error("no track {track_id} of type {media_type} in period {period_id}")]
    TrackNotFound {
        period_id: String,
        media_type: &'static str,
        track_id: String,
    },
}

/// Snapshot of an adaptation for API consumers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackInfo {
    pub id: String,
    pub language: Option<String>,
    pub normalized_language: Option<String>,
    pub is_audio_description: bool,
    pub is_closed_caption: bool,
    pub is_dub: bool,
    pub is_sign_interpreted: bool,
    pub is_trick_mode_track: bool,
    pub is_supported: bool,
}

impl From<&Adaptation> for TrackInfo {
    fn from(adaptation: &Adaptation) -> Self {
        Self {
            id: adaptation.id.clone(),
            language: adaptation.language.clone(),
            normalized_language: adaptation.normalized_language.clone(),
            is_audio_description: adaptation.is_audio_description,
            is_closed_caption: adaptation.is_closed_caption,
            is_dub: adaptation.is_dub,
            is_sign_interpreted: adaptation.is_sign_interpreted,
            is_trick_mode_track: adaptation.is_trick_mode_track,
            is_supported: adaptation.is_supported(),
        }
    }
}

/// Notifications produced as choices change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackUpdate {
    /// The effective track for (period, type) changed; `None` = disabled.
    Changed {
        period_id: String,
        media_type: MediaType,
        adaptation_id: Option<String>,
    },
    /// The previously wanted track vanished from the manifest.
    NoLongerAvailable {
        period_id: String,
        media_type: MediaType,
        adaptation_id: String,
    },
}

/// What the user asked for, for one (period, type).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
enum Wanted {
    /// Nothing requested; follow the manifest's first supported track.
    #[default]
    Unset,
    /// Track explicitly turned off.
    Disabled,
    /// A specific adaptation id.
    Track(String),
}

#[derive(Clone, Debug, Default)]
struct TypeState {
    wanted: Wanted,
    /// Last adaptation id announced downstream (`Some(None)` = announced
    /// as disabled).
    last_emitted: Option<Option<String>>,
}

#[derive(Clone, Debug)]
struct PeriodRecord {
    period_id: String,
    start: f64,
    in_manifest: bool,
    /// References held by active streams; a removed period is dropped
    /// only when this reaches zero.
    references: u32,
    audio: TypeState,
    video: TypeState,
    text: TypeState,
    /// The "normal" video adaptation, remembered even while a trick-mode
    /// companion is selected.
    video_base_track: Option<String>,
}

impl PeriodRecord {
    fn new(period: &Period) -> Self {
        Self {
            period_id: period.id.clone(),
            start: period.start,
            in_manifest: true,
            references: 0,
            audio: TypeState::default(),
            video: TypeState::default(),
            text: TypeState::default(),
            video_base_track: None,
        }
    }

    fn state_mut(&mut self, media_type: MediaType) -> &mut TypeState {
        match media_type {
            MediaType::Audio => &mut self.audio,
            MediaType::Video | MediaType::Image => &mut self.video,
            MediaType::Text => &mut self.text,
        }
    }

    fn state(&self, media_type: MediaType) -> &TypeState {
        match media_type {
            MediaType::Audio => &self.audio,
            MediaType::Video | MediaType::Image => &self.video,
            MediaType::Text => &self.text,
        }
    }
}

const MANAGED_TYPES: [MediaType; 3] = [MediaType::Audio, MediaType::Video, MediaType::Text];

/// Ordered list of per-period track choices with a notification sink.
pub struct TrackChoiceManager {
    periods: Vec<PeriodRecord>,
    events: UnboundedSender<TrackUpdate>,
}

impl TrackChoiceManager {
    #[must_use]
    pub fn new() -> (Self, UnboundedReceiver<TrackUpdate>) {
        let (events, rx) = unbounded_channel();
        (
            Self {
                periods: Vec::new(),
                events,
            },
            rx,
        )
    }

    /// Merge the manifest's current period list into the records.
    ///
    /// Existing records (and their choices) survive; removed periods stay
    /// while referenced; every (period, type) is re-reconciled against
    /// what the manifest now offers.
    pub fn update_period_list(&mut self, manifest: &Manifest) {
        let listed: HashMap<&str, &Period> = manifest
            .periods
            .iter()
            .filter(|p| p.in_manifest)
            .map(|p| (p.id.as_str(), p))
            .collect();

        for record in &mut self.periods {
            record.in_manifest = listed.contains_key(record.period_id.as_str());
        }

        for period in manifest.periods.iter().filter(|p| p.in_manifest) {
            if !self.periods.iter().any(|r| r.period_id == period.id) {
                self.periods.push(PeriodRecord::new(period));
            }
        }
        self.periods
            .sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

        self.periods
            .retain(|r| r.in_manifest || r.references > 0);

        for record in &mut self.periods {
            let Some(period) = listed.get(record.period_id.as_str()) else {
                continue;
            };
            for media_type in MANAGED_TYPES {
                reconcile(record, period, media_type, &self.events);
            }
        }
    }

    /// A stream started using this period's choices.
    pub fn retain_period(&mut self, period_id: &str) {
        if let Some(record) = self.record_mut(period_id) {
            record.references += 1;
        }
    }

    /// A stream stopped using this period; removed periods with no
    /// remaining reference are dropped.
    pub fn release_period(&mut self, period_id: &str) {
        if let Some(record) = self.record_mut(period_id) {
            record.references = record.references.saturating_sub(1);
        }
        self.periods
            .retain(|r| r.in_manifest || r.references > 0);
    }

    fn record(&self, period_id: &str) -> Option<&PeriodRecord> {
        self.periods.iter().find(|r| r.period_id == period_id)
    }

    fn record_mut(&mut self, period_id: &str) -> Option<&mut PeriodRecord> {
        self.periods.iter_mut().find(|r| r.period_id == period_id)
    }

    /// The adaptation id a stream should use for (period, type).
    ///
    /// `None` = unknown period; `Some(None)` = track disabled.
    #[must_use]
    pub fn chosen_adaptation_id(
        &self,
        manifest: &Manifest,
        period_id: &str,
        media_type: MediaType,
    ) -> Option<Option<String>> {
        let record = self.record(period_id)?;
        match &record.state(media_type).wanted {
            Wanted::Disabled => Some(None),
            Wanted::Track(id) => Some(Some(id.clone())),
            Wanted::Unset => {
                let period = manifest.period(period_id)?;
                Some(first_supported(period, media_type).map(|a| a.id.clone()))
            }
        }
    }

    pub fn set_audio_track_by_id(
        &mut self,
        manifest: &Manifest,
        period_id: &str,
        track_id: &str,
    ) -> Result<(), TrackError> {
        self.set_track(manifest, period_id, MediaType::Audio, track_id)
    }

    pub fn set_text_track_by_id(
        &mut self,
        manifest: &Manifest,
        period_id: &str,
        track_id: &str,
    ) -> Result<(), TrackError> {
        self.set_track(manifest, period_id, MediaType::Text, track_id)
    }

    pub fn set_video_track_by_id(
        &mut self,
        manifest: &Manifest,
        period_id: &str,
        track_id: &str,
    ) -> Result<(), TrackError> {
        self.set_track(manifest, period_id, MediaType::Video, track_id)
    }

    fn set_track(
        &mut self,
        manifest: &Manifest,
        period_id: &str,
        media_type: MediaType,
        track_id: &str,
    ) -> Result<(), TrackError> {
        let events = self.events.clone();
        let Some(record) = self.record_mut(period_id) else {
            tracing::warn!(period_id, "setting a track on an unknown period");
            return Ok(());
        };
        let adaptation = manifest
            .period(period_id)
            .and_then(|p| p.adaptation(track_id))
            .filter(|a| a.media_type == media_type)
            .ok_or_else(|| TrackError::TrackNotFound {
                period_id: period_id.to_string(),
                media_type: media_type.as_str(),
                track_id: track_id.to_string(),
            })?;

        if media_type == MediaType::Video && !adaptation.is_trick_mode_track {
            record.video_base_track = Some(track_id.to_string());
        }

        let state = record.state_mut(media_type);
        state.wanted = Wanted::Track(track_id.to_string());
        emit_if_changed(state, &events, period_id, media_type, Some(track_id.to_string()));
        Ok(())
    }

    pub fn disable_audio_track(&mut self, period_id: &str) {
        self.disable(period_id, MediaType::Audio);
    }

    pub fn disable_text_track(&mut self, period_id: &str) {
        self.disable(period_id, MediaType::Text);
    }

    pub fn disable_video_track(&mut self, period_id: &str) {
        self.disable(period_id, MediaType::Video);
    }

    fn disable(&mut self, period_id: &str, media_type: MediaType) {
        let events = self.events.clone();
        let Some(record) = self.record_mut(period_id) else {
            tracing::warn!(period_id, "disabling a track on an unknown period");
            return;
        };
        let state = record.state_mut(media_type);
        state.wanted = Wanted::Disabled;
        emit_if_changed(state, &events, period_id, media_type, None);
    }

    /// Switch video between a base track and one of its trick-mode
    /// companions, preserving the base choice.
    pub fn set_video_trick_mode(
        &mut self,
        manifest: &Manifest,
        period_id: &str,
        enabled: bool,
    ) -> Result<(), TrackError> {
        let Some(record) = self.record(period_id) else {
            tracing::warn!(period_id, "toggling trick mode on an unknown period");
            return Ok(());
        };
        let base_id = record
            .video_base_track
            .clone()
            .or_else(|| {
                manifest
                    .period(period_id)
                    .and_then(|p| first_supported(p, MediaType::Video))
                    .map(|a| a.id.clone())
            });
        let Some(base_id) = base_id else {
            return Ok(());
        };

        if !enabled {
            return self.set_video_track_by_id(manifest, period_id, &base_id);
        }

        let trick_id = manifest
            .period(period_id)
            .and_then(|p| p.adaptation(&base_id))
            .and_then(|a| a.trick_mode_ids.first().cloned())
            .ok_or_else(|| TrackError::TrackNotFound {
                period_id: period_id.to_string(),
                media_type: MediaType::Video.as_str(),
                track_id: format!("trick mode of {base_id}"),
            })?;
        self.set_video_track_by_id(manifest, period_id, &trick_id)
    }

    #[must_use]
    pub fn get_chosen_audio_track(
        &self,
        manifest: &Manifest,
        period_id: &str,
    ) -> Option<TrackInfo> {
        self.get_chosen(manifest, period_id, MediaType::Audio)
    }

    #[must_use]
    pub fn get_chosen_text_track(&self, manifest: &Manifest, period_id: &str) -> Option<TrackInfo> {
        self.get_chosen(manifest, period_id, MediaType::Text)
    }

    #[must_use]
    pub fn get_chosen_video_track(
        &self,
        manifest: &Manifest,
        period_id: &str,
    ) -> Option<TrackInfo> {
        self.get_chosen(manifest, period_id, MediaType::Video)
    }

    fn get_chosen(
        &self,
        manifest: &Manifest,
        period_id: &str,
        media_type: MediaType,
    ) -> Option<TrackInfo> {
        let chosen = self.chosen_adaptation_id(manifest, period_id, media_type)??;
        manifest
            .period(period_id)?
            .adaptation(&chosen)
            .map(TrackInfo::from)
    }

    #[must_use]
    pub fn get_available_audio_tracks(
        &self,
        manifest: &Manifest,
        period_id: &str,
    ) -> Vec<TrackInfo> {
        available(manifest, period_id, MediaType::Audio)
    }

    #[must_use]
    pub fn get_available_text_tracks(
        &self,
        manifest: &Manifest,
        period_id: &str,
    ) -> Vec<TrackInfo> {
        available(manifest, period_id, MediaType::Text)
    }

    #[must_use]
    pub fn get_available_video_tracks(
        &self,
        manifest: &Manifest,
        period_id: &str,
    ) -> Vec<TrackInfo> {
        available(manifest, period_id, MediaType::Video)
    }
}

fn available(manifest: &Manifest, period_id: &str, media_type: MediaType) -> Vec<TrackInfo> {
    manifest
        .period(period_id)
        .map(|period| {
            period
                .adaptations_of(media_type)
                .filter(|a| !a.is_trick_mode_track)
                .map(TrackInfo::from)
                .collect()
        })
        .unwrap_or_default()
}

fn first_supported(period: &Period, media_type: MediaType) -> Option<&Adaptation> {
    period
        .adaptations_of(media_type)
        .find(|a| a.is_supported() && !a.is_trick_mode_track)
}

fn emit_if_changed(
    state: &mut TypeState,
    events: &UnboundedSender<TrackUpdate>,
    period_id: &str,
    media_type: MediaType,
    adaptation_id: Option<String>,
) {
    if state.last_emitted.as_ref() == Some(&adaptation_id) {
        return;
    }
    state.last_emitted = Some(adaptation_id.clone());
    let _ = events.send(TrackUpdate::Changed {
        period_id: period_id.to_string(),
        media_type,
        adaptation_id,
    });
}

/// Re-derive the effective choice for one (period, type) after a refresh.
fn reconcile(
    record: &mut PeriodRecord,
    period: &Period,
    media_type: MediaType,
    events: &UnboundedSender<TrackUpdate>,
) {
    let wanted = record.state(media_type).wanted.clone();
    match wanted {
        Wanted::Disabled => {
            let state = record.state_mut(media_type);
            emit_if_changed(state, events, &period.id, media_type, None);
        }
        Wanted::Track(id) => {
            let still_there = period.adaptation(&id).is_some_and(Adaptation::is_supported);
            if still_there {
                let state = record.state_mut(media_type);
                emit_if_changed(state, events, &period.id, media_type, Some(id));
                return;
            }
            tracing::warn!(
                period = %period.id,
                adaptation = %id,
                "chosen track disappeared; falling back"
            );
            let _ = events.send(TrackUpdate::NoLongerAvailable {
                period_id: period.id.clone(),
                media_type,
                adaptation_id: id.clone(),
            });
            let fallback = first_supported(period, media_type).map(|a| a.id.clone());
            if media_type == MediaType::Video {
                record.video_base_track = fallback.clone();
            }
            let state = record.state_mut(media_type);
            state.wanted = match &fallback {
                Some(id) => Wanted::Track(id.clone()),
                None => Wanted::Unset,
            };
            emit_if_changed(state, events, &period.id, media_type, fallback);
        }
        Wanted::Unset => {
            let default = first_supported(period, media_type).map(|a| a.id.clone());
            if media_type == MediaType::Video && record.video_base_track.is_none() {
                record.video_base_track = default.clone();
            }
            let state = record.state_mut(media_type);
            emit_if_changed(state, events, &period.id, media_type, default);
        }
    }
}

#[cfg(test)]
mod tests;
