use aulos_index::{ListIndex, RepresentationIndex};
use aulos_manifest::{
    Adaptation, Manifest, MaximumTimeDescriptor, MediaType, Period, Representation, TimeBounds,
    TransportType,
};
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;

fn representation(id: &str) -> Representation {
    Representation {
        id: id.to_string(),
        bitrate: 128_000,
        codec: Some("mp4a.40.2".to_string()),
        mime_type: None,
        width: None,
        height: None,
        frame_rate: None,
        hdr: None,
        decipherable: None,
        is_supported: true,
        index: RepresentationIndex::List(ListIndex::new(
            1_000,
            4_000,
            0,
            0.0,
            Vec::new(),
            None,
            None,
        )),
    }
}

fn audio_adaptation(id: &str, language: &str) -> Adaptation {
    Adaptation {
        id: id.to_string(),
        media_type: MediaType::Audio,
        language: Some(language.to_string()),
        normalized_language: Some(aulos_manifest::normalize_language(language)),
        is_audio_description: false,
        is_closed_caption: false,
        is_dub: false,
        is_sign_interpreted: false,
        is_trick_mode_track: false,
        manually_added: false,
        trick_mode_ids: Vec::new(),
        representations: vec![representation(&format!("{id}-rep"))],
    }
}

fn video_adaptation(id: &str, trick_of: Option<&str>) -> Adaptation {
    Adaptation {
        id: id.to_string(),
        media_type: MediaType::Video,
        language: None,
        normalized_language: None,
        is_audio_description: false,
        is_closed_caption: false,
        is_dub: false,
        is_sign_interpreted: false,
        is_trick_mode_track: trick_of.is_some(),
        manually_added: false,
        trick_mode_ids: Vec::new(),
        representations: vec![representation(&format!("{id}-rep"))],
    }
}

fn manifest(periods: Vec<Period>) -> Manifest {
    Manifest {
        transport: TransportType::Dash,
        is_dynamic: true,
        is_live: true,
        is_last_period_known: false,
        availability_start_time: Some(0.0),
        clock_offset_ms: None,
        suggested_presentation_delay: None,
        lifetime: None,
        time_bounds: TimeBounds {
            absolute_minimum_time: 0.0,
            timeshift_depth: None,
            maximum: MaximumTimeDescriptor {
                is_linear: true,
                value: 0.0,
                at_ms: 0.0,
            },
        },
        uris: Vec::new(),
        periods,
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

fn drain(rx: &mut UnboundedReceiver<TrackUpdate>) -> Vec<TrackUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

#[test]
fn defaults_to_first_supported_track_with_notification() {
    let manifest = manifest(vec![period(
        "p1",
        0.0,
        vec![
            audio_adaptation("audio-fr", "fr"),
            audio_adaptation("audio-de", "de"),
        ],
    )]);
    let (mut manager, mut rx) = TrackChoiceManager::new();
    manager.update_period_list(&manifest);

    assert_eq!(
        manager.chosen_adaptation_id(&manifest, "p1", MediaType::Audio),
        Some(Some("audio-fr".to_string()))
    );
    let updates = drain(&mut rx);
    assert!(updates.contains(&TrackUpdate::Changed {
        period_id: "p1".to_string(),
        media_type: MediaType::Audio,
        adaptation_id: Some("audio-fr".to_string()),
    }));
}

#[test]
fn chosen_track_lost_on_refresh_falls_back_and_notifies() {
    let first = manifest(vec![period(
        "p1",
        0.0,
        vec![
            audio_adaptation("audio-fr", "fr"),
            audio_adaptation("audio-de", "de"),
        ],
    )]);
    let (mut manager, mut rx) = TrackChoiceManager::new();
    manager.update_period_list(&first);
    manager
        .set_audio_track_by_id(&first, "p1", "audio-fr")
        .unwrap();
    drain(&mut rx);

    // refresh: only the German track remains
    let refreshed = manifest(vec![period(
        "p1",
        0.0,
        vec![audio_adaptation("audio-de", "de")],
    )]);
    manager.update_period_list(&refreshed);

    let updates = drain(&mut rx);
    assert!(updates.contains(&TrackUpdate::NoLongerAvailable {
        period_id: "p1".to_string(),
        media_type: MediaType::Audio,
        adaptation_id: "audio-fr".to_string(),
    }));
    assert!(updates.contains(&TrackUpdate::Changed {
        period_id: "p1".to_string(),
        media_type: MediaType::Audio,
        adaptation_id: Some("audio-de".to_string()),
    }));
    assert_eq!(
        manager.chosen_adaptation_id(&refreshed, "p1", MediaType::Audio),
        Some(Some("audio-de".to_string()))
    );
}

#[test]
fn setting_an_unknown_track_is_a_hard_error() {
    let manifest = manifest(vec![period(
        "p1",
        0.0,
        vec![audio_adaptation("audio-fr", "fr")],
    )]);
    let (mut manager, _rx) = TrackChoiceManager::new();
    manager.update_period_list(&manifest);

    let error = manager
        .set_audio_track_by_id(&manifest, "p1", "audio-xx")
        .unwrap_err();
    assert!(matches!(error, TrackError::TrackNotFound { .. }));
}

#[test]
fn setting_a_track_on_an_unknown_period_is_a_noop() {
    let manifest = manifest(vec![period(
        "p1",
        0.0,
        vec![audio_adaptation("audio-fr", "fr")],
    )]);
    let (mut manager, mut rx) = TrackChoiceManager::new();
    manager.update_period_list(&manifest);
    drain(&mut rx);

    manager
        .set_audio_track_by_id(&manifest, "p99", "audio-fr")
        .unwrap();
    assert!(drain(&mut rx).is_empty());
}

#[test]
fn disabling_a_track_emits_none() {
    let manifest = manifest(vec![period(
        "p1",
        0.0,
        vec![audio_adaptation("audio-fr", "fr")],
    )]);
    let (mut manager, mut rx) = TrackChoiceManager::new();
    manager.update_period_list(&manifest);
    drain(&mut rx);

    manager.disable_text_track("p1");
    let updates = drain(&mut rx);
    assert!(updates.contains(&TrackUpdate::Changed {
        period_id: "p1".to_string(),
        media_type: MediaType::Text,
        adaptation_id: None,
    }));
    assert_eq!(
        manager.chosen_adaptation_id(&manifest, "p1", MediaType::Text),
        Some(None)
    );
}

#[test]
fn removed_period_survives_while_referenced() {
    let first = manifest(vec![
        period("p1", 0.0, vec![audio_adaptation("audio-fr", "fr")]),
        period("p2", 10.0, vec![audio_adaptation("audio-fr", "fr")]),
    ]);
    let (mut manager, _rx) = TrackChoiceManager::new();
    manager.update_period_list(&first);
    manager.retain_period("p1");

    let refreshed = manifest(vec![period(
        "p2",
        10.0,
        vec![audio_adaptation("audio-fr", "fr")],
    )]);
    manager.update_period_list(&refreshed);
    // still queryable: a stream is playing buffered data from it
    assert!(manager
        .chosen_adaptation_id(&first, "p1", MediaType::Audio)
        .is_some());

    manager.release_period("p1");
    assert!(manager
        .chosen_adaptation_id(&first, "p1", MediaType::Audio)
        .is_none());
}

#[test]
fn trick_mode_toggle_keeps_the_base_choice() {
    let mut main = video_adaptation("video-main", None);
    main.trick_mode_ids = vec!["video-trick".to_string()];
    let trick = video_adaptation("video-trick", Some("video-main"));
    let manifest = manifest(vec![period("p1", 0.0, vec![main, trick])]);

    let (mut manager, mut rx) = TrackChoiceManager::new();
    manager.update_period_list(&manifest);
    drain(&mut rx);

    manager
        .set_video_trick_mode(&manifest, "p1", true)
        .unwrap();
    assert_eq!(
        manager.chosen_adaptation_id(&manifest, "p1", MediaType::Video),
        Some(Some("video-trick".to_string()))
    );

    manager
        .set_video_trick_mode(&manifest, "p1", false)
        .unwrap();
    assert_eq!(
        manager.chosen_adaptation_id(&manifest, "p1", MediaType::Video),
        Some(Some("video-main".to_string()))
    );
}

#[test]
fn available_tracks_exclude_trick_mode_companions() {
    let mut main = video_adaptation("video-main", None);
    main.trick_mode_ids = vec!["video-trick".to_string()];
    let trick = video_adaptation("video-trick", Some("video-main"));
    let manifest = manifest(vec![period("p1", 0.0, vec![main, trick])]);

    let (mut manager, _rx) = TrackChoiceManager::new();
    manager.update_period_list(&manifest);

    let tracks = manager.get_available_video_tracks(&manifest, "p1");
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].id, "video-main");

    let chosen = manager.get_chosen_video_track(&manifest, "p1").unwrap();
    assert_eq!(chosen.id, "video-main");
}
