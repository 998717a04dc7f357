use std::sync::Arc;
use std::time::Duration;

use aulos_abr::AbrEstimator;
use aulos_events::{EventBus, ManifestEvent, PlaybackEvent, TrackEvent as BusTrackEvent};
use aulos_fetch::SegmentFetcher;
use aulos_manifest::{Manifest, MediaType};
use aulos_net::{HttpClient, Net};
use aulos_observer::{MediaElement, PlaybackObserver};
use aulos_tracks::{TrackChoiceManager, TrackError, TrackInfo, TrackUpdate};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig,
    controls::AbrControls,
    error::{EngineError, EngineResult, MediaError},
    manifest_loader::{ManifestLoader, ManifestParser},
    refresh::{next_refresh_delay, RefreshSignal},
    sink::MediaBufferSink,
    stream::{spawn_stream, StreamTuning},
};

fn map_rebuffer_reason(reason: aulos_observer::RebufferReason) -> aulos_events::RebufferReason {
    match reason {
        aulos_observer::RebufferReason::Seeking => aulos_events::RebufferReason::Seeking,
        aulos_observer::RebufferReason::InternalSeek => aulos_events::RebufferReason::InternalSeek,
        aulos_observer::RebufferReason::NotReady => aulos_events::RebufferReason::NotReady,
        aulos_observer::RebufferReason::Buffering => aulos_events::RebufferReason::Buffering,
    }
}

/// The top-level engine: configuration plus the injected collaborators
/// (transport, syntactic parser). One engine can run many loads.
pub struct Engine {
    config: EngineConfig,
    net: Arc<dyn Net>,
    parser: Arc<dyn ManifestParser>,
    bus: EventBus,
}

impl Engine {
    #[must_use]
    pub fn new(config: EngineConfig, net: Arc<dyn Net>, parser: Arc<dyn ManifestParser>) -> Self {
        let bus = EventBus::new(config.event_capacity);
        Self {
            config,
            net,
            parser,
            bus,
        }
    }

    /// Engine with the default reqwest transport.
    #[must_use]
    pub fn with_default_net(config: EngineConfig, parser: Arc<dyn ManifestParser>) -> Self {
        let net = Arc::new(HttpClient::new(config.net.clone()));
        Self::new(config, net, parser)
    }

    #[must_use]
    pub fn events(&self) -> EventBus {
        self.bus.clone()
    }

    /// Load a presentation: fetch and build the manifest, start playback
    /// observation, and spawn one stream pipeline per provided sink.
    pub async fn load<M: MediaElement + 'static>(
        &self,
        url: &str,
        element: Arc<M>,
        sinks: Vec<(MediaType, Arc<dyn MediaBufferSink>)>,
    ) -> EngineResult<LoadSession<M>> {
        let cancel = CancellationToken::new();
        let loader = Arc::new(ManifestLoader::new(
            Arc::clone(&self.net),
            Arc::clone(&self.parser),
            self.config.aggressive_mode,
            self.config.unbounded_last_segment_range,
        ));

        let (manifest, _warnings) = loader.load(url, &cancel).await?;
        if manifest.first_playable_position().is_none() {
            return Err(MediaError::StartingTimeNotFound.into());
        }

        let manifest = Arc::new(RwLock::new(manifest));
        let (mut tracks, track_updates) = TrackChoiceManager::new();
        tracks.update_period_list(&manifest.read());
        let tracks = Arc::new(Mutex::new(tracks));

        let observer = Arc::new(PlaybackObserver::new(
            element,
            self.config.observer.clone(),
        ));
        let observer_task = observer.start();

        let fetcher = Arc::new(SegmentFetcher::new(
            Arc::clone(&self.net),
            self.config.fetch.clone(),
        ));

        let controls = AbrControls::new();
        let refresh = RefreshSignal::new();
        let refresh_task = self.spawn_refresh_loop(
            Arc::clone(&manifest),
            Arc::clone(&tracks),
            Arc::clone(&loader),
            refresh.clone(),
            cancel.clone(),
        );

        let track_forwarder = self.spawn_track_forwarder(track_updates, cancel.clone());
        let health_forwarder = self.spawn_health_forwarder(&observer, cancel.clone());

        let mut pipelines = Vec::new();
        for (media_type, sink) in sinks {
            pipelines.push(self.spawn_type_pipeline(
                Arc::clone(&manifest),
                Arc::clone(&tracks),
                Arc::clone(&fetcher),
                sink,
                &observer,
                refresh.clone(),
                controls.clone(),
                media_type,
                cancel.clone(),
            ));
        }

        let supervisor = self.spawn_supervisor(pipelines, cancel.clone());

        self.bus.publish(PlaybackEvent::Loaded);

        Ok(LoadSession {
            manifest,
            tracks,
            observer,
            controls,
            bus: self.bus.clone(),
            cancel,
            background: vec![
                observer_task,
                refresh_task,
                track_forwarder,
                health_forwarder,
                supervisor,
            ],
        })
    }

    /// One media type's pipeline: walk the periods in order, running a
    /// stream task for each.
    #[allow(clippy::too_many_arguments)]
    fn spawn_type_pipeline<M: MediaElement + 'static>(
        &self,
        manifest: Arc<RwLock<Manifest>>,
        tracks: Arc<Mutex<TrackChoiceManager>>,
        fetcher: Arc<SegmentFetcher>,
        sink: Arc<dyn MediaBufferSink>,
        observer: &Arc<PlaybackObserver<M>>,
        refresh: RefreshSignal,
        controls: AbrControls,
        media_type: MediaType,
        cancel: CancellationToken,
    ) -> JoinHandle<EngineResult<()>> {
        let bus = self.bus.clone();
        let abr_options = self.config.abr.clone();
        let tuning = StreamTuning {
            buffer_goal: self.config.tunables.buffer_goal,
            segment_lookahead: self.config.tunables.segment_lookahead,
        };
        let observer = Arc::clone(observer);

        tokio::spawn(async move {
            let mut current_period: Option<String> = None;
            loop {
                if cancel.is_cancelled() {
                    return Ok(());
                }

                let next = {
                    let m = manifest.read();
                    match &current_period {
                        None => m
                            .periods
                            .iter()
                            .find(|p| p.in_manifest)
                            .map(|p| p.id.clone()),
                        Some(id) => m.period_after(id).map(|p| p.id.clone()),
                    }
                };
                let Some(period_id) = next else {
                    let finished = manifest.read().is_last_period_known;
                    if finished {
                        tracing::debug!(
                            media_type = media_type.as_str(),
                            "no further period; pipeline done"
                        );
                        return Ok(());
                    }
                    // A dynamic manifest may still grow another period.
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    }
                };

                let adaptation_id = {
                    let m = manifest.read();
                    let chosen = tracks
                        .lock()
                        .chosen_adaptation_id(&m, &period_id, media_type);
                    match chosen {
                        Some(Some(id)) => Some(id),
                        // Disabled or unknown: this type sits the period out.
                        Some(None) | None => None,
                    }
                };
                let Some(adaptation_id) = adaptation_id else {
                    current_period = Some(period_id);
                    continue;
                };

                tracks.lock().retain_period(&period_id);
                let outcome = spawn_stream(
                    Arc::clone(&manifest),
                    Arc::clone(&fetcher),
                    Arc::clone(&sink),
                    AbrEstimator::new(abr_options.clone()),
                    &observer,
                    bus.clone(),
                    refresh.clone(),
                    controls.clone(),
                    tuning,
                    period_id.clone(),
                    adaptation_id,
                    media_type,
                    cancel.clone(),
                )
                .await;
                tracks.lock().release_period(&period_id);

                match outcome {
                    Ok(Ok(())) => current_period = Some(period_id),
                    Ok(Err(error)) => return Err(error),
                    Err(join_error) => {
                        return Err(EngineError::Other(format!(
                            "stream task crashed: {join_error}"
                        )))
                    }
                }
            }
        })
    }

    fn spawn_refresh_loop(
        &self,
        manifest: Arc<RwLock<Manifest>>,
        tracks: Arc<Mutex<TrackChoiceManager>>,
        loader: Arc<ManifestLoader>,
        refresh: RefreshSignal,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let minimum = Duration::from_secs_f64(self.config.tunables.minimum_refresh_interval);

        tokio::spawn(async move {
            loop {
                let scheduled = next_refresh_delay(&manifest.read(), minimum);
                if let Some(delay) = scheduled {
                    bus.publish(ManifestEvent::RefreshScheduled { delay });
                }
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = refresh.wait() => {}
                    () = async {
                        match scheduled {
                            Some(delay) => tokio::time::sleep(delay).await,
                            None => std::future::pending().await,
                        }
                    } => {}
                }
                if cancel.is_cancelled() {
                    return;
                }

                let url = manifest.read().uris.first().cloned();
                let Some(url) = url else {
                    tracing::warn!("refresh wanted but no manifest URL is known");
                    continue;
                };
                match loader.load(&url, &cancel).await {
                    Ok((new_manifest, _warnings)) => {
                        let mut m = manifest.write();
                        m.update(new_manifest);
                        tracks.lock().update_period_list(&m);
                        drop(m);
                        bus.publish(ManifestEvent::Updated);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "manifest refresh failed");
                        bus.publish(ManifestEvent::RefreshFailed {
                            error: error.to_string(),
                        });
                    }
                }
            }
        })
    }

    /// Map playback-health transitions onto the public bus.
    fn spawn_health_forwarder<M: MediaElement + 'static>(
        &self,
        observer: &Arc<PlaybackObserver<M>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let bus = self.bus.clone();
        let mut observations = observer.subscribe();
        tokio::spawn(async move {
            let mut was_rebuffering = false;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    changed = observations.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let rebuffering = observations.borrow().rebuffering;
                        match (was_rebuffering, rebuffering) {
                            (false, Some(status)) => {
                                was_rebuffering = true;
                                bus.publish(PlaybackEvent::Stalled);
                                bus.publish(PlaybackEvent::RebufferStarted {
                                    reason: map_rebuffer_reason(status.reason),
                                });
                            }
                            (true, None) => {
                                was_rebuffering = false;
                                bus.publish(PlaybackEvent::RebufferEnded);
                            }
                            _ => {}
                        }
                    }
                }
            }
        })
    }

    /// Forward track-manager notifications onto the public bus.
    fn spawn_track_forwarder(
        &self,
        mut updates: tokio::sync::mpsc::UnboundedReceiver<TrackUpdate>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let bus = self.bus.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    update = updates.recv() => {
                        let Some(update) = update else { return };
                        match update {
                            TrackUpdate::Changed { period_id, media_type, adaptation_id } => {
                                bus.publish(BusTrackEvent::Changed {
                                    period_id,
                                    media_type: media_type.as_str(),
                                    adaptation_id,
                                });
                            }
                            TrackUpdate::NoLongerAvailable { period_id, media_type, adaptation_id } => {
                                bus.publish(BusTrackEvent::NoLongerAvailable {
                                    period_id,
                                    media_type: media_type.as_str(),
                                    adaptation_id,
                                });
                            }
                        }
                    }
                }
            }
        })
    }

    /// Wait on every pipeline; the first terminal error fails the whole
    /// load, a clean run ends the stream.
    fn spawn_supervisor(
        &self,
        pipelines: Vec<JoinHandle<EngineResult<()>>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let mut failed = false;
            for pipeline in pipelines {
                match pipeline.await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        tracing::error!(%error, "pipeline failed; tearing the load down");
                        bus.publish(PlaybackEvent::Failed {
                            error: error.to_string(),
                        });
                        failed = true;
                        cancel.cancel();
                    }
                    Err(join_error) => {
                        bus.publish(PlaybackEvent::Failed {
                            error: join_error.to_string(),
                        });
                        failed = true;
                        cancel.cancel();
                    }
                }
            }
            if !failed {
                bus.publish(PlaybackEvent::EndOfStream);
            }
        })
    }
}

/// A running load. Dropping it does not stop playback; call
/// [`LoadSession::stop`].
pub struct LoadSession<M: MediaElement + 'static> {
    manifest: Arc<RwLock<Manifest>>,
    tracks: Arc<Mutex<TrackChoiceManager>>,
    observer: Arc<PlaybackObserver<M>>,
    controls: AbrControls,
    bus: EventBus,
    cancel: CancellationToken,
    background: Vec<JoinHandle<()>>,
}

impl<M: MediaElement + 'static> LoadSession<M> {
    #[must_use]
    pub fn events(&self) -> EventBus {
        self.bus.clone()
    }

    #[must_use]
    pub fn observer(&self) -> &Arc<PlaybackObserver<M>> {
        &self.observer
    }

    /// Call right before moving the element's position yourself, so the
    /// resulting `seeking` event is classified as internal.
    pub fn announce_internal_seek(&self) {
        self.observer.announce_internal_seek();
    }

    /// Handle for bitrate bounds, ceilings and manual quality selection.
    #[must_use]
    pub fn abr_controls(&self) -> AbrControls {
        self.controls.clone()
    }

    pub fn set_audio_track_by_id(&self, period_id: &str, track_id: &str) -> Result<(), TrackError> {
        let manifest = self.manifest.read();
        self.tracks
            .lock()
            .set_audio_track_by_id(&manifest, period_id, track_id)
    }

    pub fn set_text_track_by_id(&self, period_id: &str, track_id: &str) -> Result<(), TrackError> {
        let manifest = self.manifest.read();
        self.tracks
            .lock()
            .set_text_track_by_id(&manifest, period_id, track_id)
    }

    pub fn set_video_track_by_id(&self, period_id: &str, track_id: &str) -> Result<(), TrackError> {
        let manifest = self.manifest.read();
        self.tracks
            .lock()
            .set_video_track_by_id(&manifest, period_id, track_id)
    }

    pub fn disable_audio_track(&self, period_id: &str) {
        self.tracks.lock().disable_audio_track(period_id);
    }

    pub fn disable_text_track(&self, period_id: &str) {
        self.tracks.lock().disable_text_track(period_id);
    }

    pub fn disable_video_track(&self, period_id: &str) {
        self.tracks.lock().disable_video_track(period_id);
    }

    pub fn set_video_trick_mode(&self, period_id: &str, enabled: bool) -> Result<(), TrackError> {
        let manifest = self.manifest.read();
        self.tracks
            .lock()
            .set_video_trick_mode(&manifest, period_id, enabled)
    }

    #[must_use]
    pub fn get_available_audio_tracks(&self, period_id: &str) -> Vec<TrackInfo> {
        let manifest = self.manifest.read();
        self.tracks
            .lock()
            .get_available_audio_tracks(&manifest, period_id)
    }

    #[must_use]
    pub fn get_available_video_tracks(&self, period_id: &str) -> Vec<TrackInfo> {
        let manifest = self.manifest.read();
        self.tracks
            .lock()
            .get_available_video_tracks(&manifest, period_id)
    }

    #[must_use]
    pub fn get_available_text_tracks(&self, period_id: &str) -> Vec<TrackInfo> {
        let manifest = self.manifest.read();
        self.tracks
            .lock()
            .get_available_text_tracks(&manifest, period_id)
    }

    #[must_use]
    pub fn get_chosen_audio_track(&self, period_id: &str) -> Option<TrackInfo> {
        let manifest = self.manifest.read();
        self.tracks
            .lock()
            .get_chosen_audio_track(&manifest, period_id)
    }

    #[must_use]
    pub fn get_chosen_text_track(&self, period_id: &str) -> Option<TrackInfo> {
        let manifest = self.manifest.read();
        self.tracks
            .lock()
            .get_chosen_text_track(&manifest, period_id)
    }

    #[must_use]
    pub fn get_chosen_video_track(&self, period_id: &str) -> Option<TrackInfo> {
        let manifest = self.manifest.read();
        self.tracks
            .lock()
            .get_chosen_video_track(&manifest, period_id)
    }

    /// Read access to the live manifest model.
    #[must_use]
    pub fn manifest(&self) -> Arc<RwLock<Manifest>> {
        Arc::clone(&self.manifest)
    }

    /// Tear the load down: cancels every task and stops observation.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        self.observer.stop();
        for task in self.background.drain(..) {
            let _ = task.await;
        }
    }
}
