use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aulos::{
    DocumentIr, Engine, EngineConfig, Event, ManifestParser, MediaBufferSink, MediaElement,
    MediaType,
};
use aulos_events::PlaybackEvent;
use aulos_manifest::{
    AdaptationIr, ManifestResult, MpdIr, PeriodIr, RepresentationIr, SegmentTemplateIr,
};
use aulos_observer::TimeRanges;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;

fn valid_mp4() -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&24_u32.to_be_bytes());
    data.extend_from_slice(b"free");
    data.extend_from_slice(&[0_u8; 16]);
    data
}

async fn run_media_server() -> String {
    use axum::routing::get;
    let app = axum::Router::new()
        .route("/content/manifest.mpd", get(|| async { "mpd-bytes" }))
        .route("/content/init-v.mp4", get(|| async { valid_mp4() }))
        .route("/content/seg-v-1.m4s", get(|| async { valid_mp4() }))
        .route("/content/seg-v-2.m4s", get(|| async { valid_mp4() }))
        .route("/content/seg-v-3.m4s", get(|| async { valid_mp4() }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", addr.port())
}

/// Parser stub: the engine starts at the intermediate representation, so
/// the "XML" here is irrelevant; what matters is the tree we hand back.
struct StubParser;

impl ManifestParser for StubParser {
    fn parse_document(&self, _bytes: &[u8]) -> ManifestResult<DocumentIr> {
        Ok(DocumentIr::Dash(MpdIr {
            mpd_type: Some("static".to_string()),
            duration: Some(6.0),
            periods: vec![PeriodIr {
                id: Some("p1".to_string()),
                start: Some(0.0),
                adaptations: vec![AdaptationIr {
                    id: Some("video-main".to_string()),
                    content_type: Some("video".to_string()),
                    mime_type: Some("video/mp4".to_string()),
                    segment_template: Some(SegmentTemplateIr {
                        timescale: Some(1_000),
                        duration: Some(2_000),
                        start_number: Some(1),
                        media: Some("seg-v-$Number$.m4s".to_string()),
                        initialization: Some("init-v.mp4".to_string()),
                        ..SegmentTemplateIr::default()
                    }),
                    representations: vec![RepresentationIr {
                        id: Some("v-main".to_string()),
                        bandwidth: Some(800_000),
                        codecs: Some("avc1.42c01e".to_string()),
                        ..RepresentationIr::default()
                    }],
                    ..AdaptationIr::default()
                }],
                ..PeriodIr::default()
            }],
            ..MpdIr::default()
        }))
    }

    fn parse_xlink_periods(&self, _bytes: &[u8]) -> ManifestResult<Vec<PeriodIr>> {
        Ok(Vec::new())
    }
}

struct StillElement;

impl MediaElement for StillElement {
    fn position(&self) -> f64 {
        0.0
    }
    fn duration(&self) -> f64 {
        6.0
    }
    fn buffered(&self) -> TimeRanges {
        TimeRanges::new(vec![(0.0, 6.0)])
    }
    fn paused(&self) -> bool {
        true
    }
    fn ended(&self) -> bool {
        false
    }
    fn ready_state(&self) -> u8 {
        4
    }
    fn playback_rate(&self) -> f64 {
        1.0
    }
    fn seeking(&self) -> bool {
        false
    }
}

#[derive(Default)]
struct RecordingSink {
    pushes: Mutex<Vec<(bool, f64)>>,
    buffered_to: Mutex<f64>,
}

#[async_trait]
impl MediaBufferSink for RecordingSink {
    async fn push(
        &self,
        init: Option<Bytes>,
        _chunk: Bytes,
        timestamp_offset: f64,
        _append_window: (f64, Option<f64>),
        codec: &str,
    ) -> Result<TimeRanges, aulos::MediaError> {
        assert_eq!(codec, "avc1.42c01e");
        let mut buffered = self.buffered_to.lock();
        *buffered += 2.0;
        self.pushes.lock().push((init.is_some(), timestamp_offset));
        Ok(TimeRanges::new(vec![(0.0, *buffered)]))
    }

    fn buffered(&self) -> TimeRanges {
        TimeRanges::new(vec![(0.0, *self.buffered_to.lock())])
    }
}

#[tokio::test]
async fn loads_a_static_presentation_to_end_of_stream() {
    let base = run_media_server().await;
    let engine = Engine::with_default_net(EngineConfig::new(), Arc::new(StubParser));
    let mut events = engine.events().subscribe();

    let sink = Arc::new(RecordingSink::default());
    let session = engine
        .load(
            &format!("{base}/content/manifest.mpd"),
            Arc::new(StillElement),
            vec![(
                MediaType::Video,
                Arc::clone(&sink) as Arc<dyn MediaBufferSink>,
            )],
        )
        .await
        .unwrap();

    // drive until the engine reports the end of the stream
    let deadline = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(Event::Playback(PlaybackEvent::EndOfStream)) => break,
                Ok(Event::Playback(PlaybackEvent::Failed { error })) => {
                    panic!("load failed: {error}");
                }
                Ok(_) => {}
                Err(e) => panic!("event bus closed early: {e}"),
            }
        }
    })
    .await;
    assert!(deadline.is_ok(), "end of stream never reached");

    let pushes = sink.pushes.lock().clone();
    assert_eq!(pushes.len(), 3, "three media segments pushed");
    assert!(pushes[0].0, "first push carries the init segment");
    assert!(!pushes[1].0, "init is not resent");
    assert!(pushes.iter().all(|&(_, offset)| offset == 0.0));

    session.stop().await;
}

#[tokio::test]
async fn track_apis_resolve_through_the_live_manifest() {
    let base = run_media_server().await;
    let engine = Engine::with_default_net(EngineConfig::new(), Arc::new(StubParser));

    let sink = Arc::new(RecordingSink::default()) as Arc<dyn MediaBufferSink>;
    let session = engine
        .load(
            &format!("{base}/content/manifest.mpd"),
            Arc::new(StillElement),
            vec![(MediaType::Video, sink)],
        )
        .await
        .unwrap();

    let tracks = session.get_available_video_tracks("p1");
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].id, "video-main");

    assert!(session
        .set_video_track_by_id("p1", "video-main")
        .is_ok());
    assert!(session
        .set_video_track_by_id("p1", "video-bogus")
        .is_err());

    session.stop().await;
}
